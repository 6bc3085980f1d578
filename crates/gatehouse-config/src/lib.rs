//! Shared configuration for the gatehouse web server.
//!
//! Configuration is layered with `ortho_config`: built-in defaults are
//! overridden by a configuration file, then by `GATEHOUSE_*` environment
//! variables, then by command-line flags. The resulting [`Config`] carries the
//! listener endpoints, the access-control and authentication switches, and the
//! knobs that bound the worker pool and the request trace archive.

mod defaults;
mod endpoint;
mod logging;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_HOSTLIST_TTL_SECS, DEFAULT_HTTP_PORT, DEFAULT_LOG_FILTER, DEFAULT_NONCE_TTL_SECS,
    DEFAULT_REALM, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_TRACE_CAPACITY, default_http_endpoint,
    default_log_filter, default_log_filter_string, default_log_format, default_realm,
};
pub use endpoint::{EndpointParseError, ListenEndpoint};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "GATEHOUSE")]
pub struct Config {
    /// Public listener; connections accepted here are subject to the hostlist.
    #[ortho_config(default = default_http_endpoint())]
    pub http_endpoint: ListenEndpoint,
    /// Optional loopback-only listener that skips the hostlist check.
    pub localhost_port: Option<u16>,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Digest authentication realm.
    #[ortho_config(default = default_realm())]
    pub realm: String,
    /// Credentials table in `user:realm:hash` form.
    pub password_file: Option<Utf8PathBuf>,
    /// Disables digest authentication entirely.
    #[ortho_config(default = false)]
    pub no_passwords: bool,
    /// Disables the hostlist access check.
    #[ortho_config(default = false)]
    pub no_hostlist: bool,
    /// Runs every request inline on the event loop thread.
    #[ortho_config(default = false)]
    pub no_multithread: bool,
    /// Host names allowed to connect to the public listener.
    #[ortho_config(merge_strategy = "append")]
    pub allowed_hosts: Vec<String>,
    /// Seconds a hostlist verdict survives without being used.
    #[ortho_config(default = DEFAULT_HOSTLIST_TTL_SECS)]
    pub hostlist_ttl_secs: u64,
    /// Seconds a digest nonce remains acceptable.
    #[ortho_config(default = DEFAULT_NONCE_TTL_SECS)]
    pub nonce_ttl_secs: u64,
    /// Upper bound on worker threads; zero leaves the pool unbounded.
    #[ortho_config(default = 0)]
    pub max_worker_threads: usize,
    /// Bounded wait for worker threads during shutdown, in milliseconds.
    #[ortho_config(default = DEFAULT_SHUTDOWN_TIMEOUT_MS)]
    pub shutdown_timeout_ms: u64,
    /// Emits every completed request trace through `tracing`.
    #[ortho_config(default = false)]
    pub trace_requests: bool,
    /// Number of completed traces retained in the archive.
    #[ortho_config(default = DEFAULT_TRACE_CAPACITY)]
    pub trace_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_endpoint: default_http_endpoint(),
            localhost_port: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            realm: default_realm(),
            password_file: None,
            no_passwords: false,
            no_hostlist: false,
            no_multithread: false,
            allowed_hosts: Vec::new(),
            hostlist_ttl_secs: DEFAULT_HOSTLIST_TTL_SECS,
            nonce_ttl_secs: DEFAULT_NONCE_TTL_SECS,
            max_worker_threads: 0,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            trace_requests: false,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

impl Config {
    /// Public listener endpoint.
    #[must_use]
    pub fn http_endpoint(&self) -> &ListenEndpoint {
        &self.http_endpoint
    }

    /// Loopback listener endpoint, when enabled.
    #[must_use]
    pub fn localhost_endpoint(&self) -> Option<ListenEndpoint> {
        self.localhost_port
            .map(|port| ListenEndpoint::tcp("127.0.0.1", port))
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Digest authentication realm.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Credentials table location, when configured.
    #[must_use]
    pub fn password_file(&self) -> Option<&Utf8Path> {
        self.password_file.as_deref()
    }

    /// Whether digest authentication is enforced.
    #[must_use]
    pub const fn passwords_enabled(&self) -> bool {
        !self.no_passwords
    }

    /// Whether the hostlist check runs on the public listener.
    #[must_use]
    pub const fn hostlist_enabled(&self) -> bool {
        !self.no_hostlist
    }

    /// Whether requests are handed to worker threads.
    #[must_use]
    pub const fn multithread_enabled(&self) -> bool {
        !self.no_multithread
    }

    /// Host names allowed to connect.
    #[must_use]
    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// Inactivity window after which hostlist entries are evicted.
    #[must_use]
    pub const fn hostlist_ttl(&self) -> Duration {
        Duration::from_secs(self.hostlist_ttl_secs)
    }

    /// Freshness window for digest nonces.
    #[must_use]
    pub const fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs)
    }

    /// Worker thread cap; `None` means unbounded.
    #[must_use]
    pub const fn max_worker_threads(&self) -> Option<usize> {
        if self.max_worker_threads == 0 {
            None
        } else {
            Some(self.max_worker_threads)
        }
    }

    /// Bounded wait for worker threads during shutdown.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Whether completed traces are logged.
    #[must_use]
    pub const fn trace_requests(&self) -> bool {
        self.trace_requests
    }

    /// Number of completed traces retained.
    #[must_use]
    pub const fn trace_capacity(&self) -> usize {
        self.trace_capacity
    }
}
