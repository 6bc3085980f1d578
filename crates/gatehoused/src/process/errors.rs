//! Error surface for launching and supervising the server process.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::transport::ServerError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the server.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration, telemetry, credentials or resolver setup failed.
    #[error("server bootstrap failed: {source}")]
    Bootstrap {
        /// Failing bootstrap stage.
        #[source]
        source: BootstrapError,
    },
    /// Binding a listener, spawning a thread, or joining the loop failed.
    #[error("server failed: {source}")]
    Server {
        /// Underlying server failure.
        #[source]
        source: ServerError,
    },
    /// Waiting for a termination signal failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying signal failure.
        #[source]
        source: ShutdownError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ServerError> for LaunchError {
    fn from(source: ServerError) -> Self {
        Self::Server { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
