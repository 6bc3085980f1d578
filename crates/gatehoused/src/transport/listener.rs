//! Binding of TCP listeners for the event loop.

use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};

use gatehouse_config::ListenEndpoint;
use mio::net::TcpListener;
use tracing::info;

use super::{ListenerError, TRANSPORT_TARGET};

/// A bound, non-blocking listener and its access policy.
#[derive(Debug)]
pub(crate) struct BoundListener {
    pub(crate) listener: TcpListener,
    pub(crate) local_addr: SocketAddr,
    /// Connections from this listener must pass the hostlist.
    pub(crate) require_acl: bool,
}

impl BoundListener {
    /// Binds `endpoint`, trying each resolved address until one succeeds.
    pub(crate) fn bind(endpoint: &ListenEndpoint, require_acl: bool) -> Result<Self, ListenerError> {
        let std_listener = bind_tcp(endpoint.host(), endpoint.port())?;
        std_listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|source| ListenerError::NonBlocking { source })?;
        info!(
            target: TRANSPORT_TARGET,
            endpoint = %endpoint,
            local_addr = %local_addr,
            require_acl,
            "listener bound"
        );
        Ok(Self {
            listener: TcpListener::from_std(std_listener),
            local_addr,
            require_acl,
        })
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<StdTcpListener, ListenerError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let mut last_error = None;
    for addr in addrs {
        match StdTcpListener::bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(source) => last_error = Some(ListenerError::BindTcp { addr, source }),
        }
    }
    Err(last_error.unwrap_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn binds_an_ephemeral_loopback_port() {
        let bound = BoundListener::bind(&ListenEndpoint::tcp("127.0.0.1", 0), true)
            .expect("bind loopback");
        assert!(bound.local_addr.ip().is_loopback());
        assert_ne!(bound.local_addr.port(), 0);
        assert!(bound.require_acl);
    }

    #[rstest]
    fn reports_bind_failures() {
        let first = BoundListener::bind(&ListenEndpoint::tcp("127.0.0.1", 0), false)
            .expect("bind loopback");
        let port = first.local_addr.port();
        let error = BoundListener::bind(&ListenEndpoint::tcp("127.0.0.1", port), false)
            .expect_err("port already taken");
        assert!(matches!(error, ListenerError::BindTcp { .. }));
    }
}
