use crate::endpoint::ListenEndpoint;
use crate::logging::LogFormat;

/// Default port for the public HTTP listener.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default log filter expression used by the server.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default digest authentication realm.
pub const DEFAULT_REALM: &str = "gatehouse";

/// Hostlist verdicts are forgotten after a day without use.
pub const DEFAULT_HOSTLIST_TTL_SECS: u64 = 24 * 60 * 60;

/// Digest nonces older than an hour are stale.
pub const DEFAULT_NONCE_TTL_SECS: u64 = 60 * 60;

/// Bounded wait for worker threads during shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Number of completed request traces retained for inspection.
pub const DEFAULT_TRACE_CAPACITY: usize = 1024;

/// Default log filter expression used by the server.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the server.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default realm as an owned string.
#[must_use]
pub fn default_realm() -> String {
    DEFAULT_REALM.to_owned()
}

/// Public listener bound on every interface.
#[must_use]
pub fn default_http_endpoint() -> ListenEndpoint {
    ListenEndpoint::tcp("0.0.0.0", DEFAULT_HTTP_PORT)
}
