//! Error types for listener and event loop operations.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced while binding a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The endpoint's host name could not be resolved.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Host taken from the endpoint.
        host: String,
        /// Port taken from the endpoint.
        port: u16,
        /// Underlying resolution failure.
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no addresses.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host taken from the endpoint.
        host: String,
        /// Port taken from the endpoint.
        port: u16,
    },
    /// The socket could not be bound.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying bind failure.
        #[source]
        source: io::Error,
    },
    /// The bound socket could not be switched to non-blocking mode.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying socket option failure.
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener could not be set up.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The poller or its waker could not be created.
    #[error("failed to create the event poller: {source}")]
    Poll {
        /// Underlying poller failure.
        #[source]
        source: io::Error,
    },
    /// A listener could not be registered with the poller.
    #[error("failed to register a listener with the poller: {source}")]
    Register {
        /// Underlying registration failure.
        #[source]
        source: io::Error,
    },
    /// A server thread could not be started.
    #[error("failed to spawn the {role} thread: {source}")]
    Spawn {
        /// Which thread failed: `event loop` or `resolver`.
        role: &'static str,
        /// Underlying spawn failure.
        #[source]
        source: io::Error,
    },
    /// The event loop thread panicked before it could be joined.
    #[error("event loop thread panicked")]
    ThreadPanic,
}
