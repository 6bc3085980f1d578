//! Reverse name resolution for peer addresses.

use std::net::IpAddr;

use thiserror::Error;
use trust_dns_resolver::Resolver;

/// Failure to map an address back to a host name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reverse lookup of {address} failed: {message}")]
pub struct ResolveError {
    /// Address that was looked up.
    pub address: IpAddr,
    /// Resolver's description of the failure.
    pub message: String,
}

impl ResolveError {
    /// Builds an error for `address`.
    #[must_use]
    pub fn new(address: IpAddr, message: impl Into<String>) -> Self {
        Self {
            address,
            message: message.into(),
        }
    }
}

/// Maps a peer address to its canonical host name.
///
/// Lookups may block; callers run them off the event loop thread.
pub trait ReverseResolver: Send + Sync {
    /// Resolves `address` to a host name.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when no name can be found.
    fn reverse(&self, address: IpAddr) -> Result<String, ResolveError>;
}

/// Resolver backed by the host's DNS configuration.
///
/// Loopback addresses always map to `localhost` without a query.
pub struct SystemResolver {
    inner: Resolver,
}

impl SystemResolver {
    /// Builds a resolver from `/etc/resolv.conf` or the platform equivalent.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while reading the system configuration.
    pub fn from_system_conf() -> std::io::Result<Self> {
        Ok(Self {
            inner: Resolver::from_system_conf()?,
        })
    }
}

impl std::fmt::Debug for SystemResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemResolver").finish_non_exhaustive()
    }
}

impl ReverseResolver for SystemResolver {
    fn reverse(&self, address: IpAddr) -> Result<String, ResolveError> {
        if address.is_loopback() {
            return Ok("localhost".to_owned());
        }
        let lookup = self
            .inner
            .reverse_lookup(address)
            .map_err(|error| ResolveError::new(address, error.to_string()))?;
        lookup
            .iter()
            .next()
            .map(|name| normalise_host(&name.to_string()))
            .ok_or_else(|| ResolveError::new(address, "no PTR records"))
    }
}

/// Lowercases a host name and strips the root label's trailing dot.
pub(crate) fn normalise_host(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Host.Example.org.", "host.example.org")]
    #[case("localhost", "localhost")]
    fn normalises_names(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalise_host(raw), expected);
    }
}
