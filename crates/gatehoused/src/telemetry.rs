//! Process-wide tracing setup.
//!
//! Events go to stderr through a single `fmt` layer chosen by
//! [`LogFormat`]. Worker and resolver threads are named, so thread names are
//! kept on every line.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use gatehouse_config::{Config, LogFormat};

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Proof that the global subscriber is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Format chosen by whichever call installed the subscriber.
    #[must_use]
    pub const fn format(self) -> LogFormat {
        self.format
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another global subscriber was already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber the first time it is called.
///
/// Later calls leave the installed subscriber alone and report its format,
/// even if `config` asks for a different one.
///
/// # Errors
///
/// Fails when the filter does not parse or a subscriber was installed by
/// someone else.
///
/// # Examples
///
/// ```rust
/// use gatehouse_config::Config;
/// use gatehoused::telemetry;
///
/// # fn main() -> Result<(), gatehoused::TelemetryError> {
/// let config = Config::default();
/// let first = telemetry::initialise(&config)?;
/// assert_eq!(telemetry::initialise(&config)?, first);
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install(config))
        .map(|&format| TelemetryHandle { format })
}

fn install(config: &Config) -> Result<LogFormat, TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let format = config.log_format();
    let subscriber = Registry::default()
        .with(output_layer(format))
        .with(filter);
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    Ok(format)
}

fn output_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let base = fmt::layer()
        .with_writer(io::stderr)
        .with_thread_names(true)
        .with_timer(UtcTime::rfc_3339());
    match format {
        LogFormat::Json => base.json().flatten_event(true).boxed(),
        LogFormat::Compact => base
            .compact()
            .with_ansi(io::stderr().is_terminal())
            .boxed(),
    }
}
