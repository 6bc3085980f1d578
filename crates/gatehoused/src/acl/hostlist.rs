//! Cached allow-list verdicts keyed by peer address.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::ACL_TARGET;
use super::resolver::{ReverseResolver, normalise_host};

const LOOPBACK_NAMES: [&str; 2] = ["localhost", "localhost.localdomain"];

/// Cached verdict for one peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostlistEntry {
    pub address: IpAddr,
    pub hostname: Option<String>,
    pub created: SystemTime,
    pub last_used: SystemTime,
    pub count: u64,
    pub accepted: bool,
    pub error: Option<String>,
}

/// Allow-list check with a cache of recent verdicts.
///
/// Holds at most one entry per address. Entries idle for longer than the
/// configured window are evicted whenever the cache is scanned.
pub struct HostlistCache {
    resolver: Arc<dyn ReverseResolver>,
    allowed: Vec<String>,
    ttl: Duration,
    entries: Mutex<Vec<HostlistEntry>>,
}

impl std::fmt::Debug for HostlistCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostlistCache")
            .field("allowed", &self.allowed)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl HostlistCache {
    /// Builds a cache that admits `allowed` host names.
    #[must_use]
    pub fn new(resolver: Arc<dyn ReverseResolver>, allowed: &[String], ttl: Duration) -> Self {
        Self {
            resolver,
            allowed: allowed.iter().map(|host| normalise_host(host)).collect(),
            ttl,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Decides whether `address` may connect, resolving it on a cache miss.
    ///
    /// May block on name resolution.
    pub fn check(&self, address: IpAddr) -> bool {
        self.check_at(address, SystemTime::now())
    }

    /// [`HostlistCache::check`] with an explicit clock.
    pub fn check_at(&self, address: IpAddr, now: SystemTime) -> bool {
        if let Some(accepted) = self.cached_at(address, now) {
            return accepted;
        }

        // Resolve without holding the lock; concurrent misses for the same
        // address collapse onto one entry below.
        let outcome = self.resolver.reverse(address);
        let (hostname, accepted, error) = match outcome {
            Ok(name) => {
                let host = normalise_host(&name);
                let accepted = self.admits(&host);
                (Some(host), accepted, None)
            }
            Err(error) => {
                warn!(
                    target: ACL_TARGET,
                    address = %address,
                    error = %error,
                    "reverse lookup failed; rejecting"
                );
                (None, false, Some(error.message))
            }
        };
        debug!(
            target: ACL_TARGET,
            address = %address,
            hostname = hostname.as_deref().unwrap_or("-"),
            accepted,
            "hostlist verdict cached"
        );

        let mut entries = self.lock();
        evict_idle(&mut entries, now, self.ttl);
        if let Some(existing) = entries.iter_mut().find(|entry| entry.address == address) {
            existing.last_used = now;
            existing.count += 1;
            return existing.accepted;
        }
        entries.push(HostlistEntry {
            address,
            hostname,
            created: now,
            last_used: now,
            count: 1,
            accepted,
            error,
        });
        accepted
    }

    /// Returns the cached verdict for `address` without resolving.
    pub fn cached(&self, address: IpAddr) -> Option<bool> {
        self.cached_at(address, SystemTime::now())
    }

    /// [`HostlistCache::cached`] with an explicit clock.
    pub fn cached_at(&self, address: IpAddr, now: SystemTime) -> Option<bool> {
        let mut entries = self.lock();
        evict_idle(&mut entries, now, self.ttl);
        let entry = entries.iter_mut().find(|entry| entry.address == address)?;
        entry.last_used = now;
        entry.count += 1;
        Some(entry.accepted)
    }

    /// Copies the current entries for diagnostics.
    #[must_use]
    pub fn entries(&self) -> Vec<HostlistEntry> {
        self.lock().clone()
    }

    fn admits(&self, host: &str) -> bool {
        LOOPBACK_NAMES.contains(&host) || self.allowed.iter().any(|allowed| allowed == host)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<HostlistEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn evict_idle(entries: &mut Vec<HostlistEntry>, now: SystemTime, ttl: Duration) {
    entries.retain(|entry| {
        now.duration_since(entry.last_used)
            .map_or(true, |idle| idle <= ttl)
    });
}
