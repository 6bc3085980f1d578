//! A multithreaded HTTP server core.
//!
//! One event loop thread owns every socket. It accepts connections, screens
//! them against a reverse-DNS hostlist, frames HTTP requests, enforces digest
//! authentication and hands each request to a worker thread bound to its
//! connection. Workers run a [`ContentBuilder`](content::ContentBuilder) under
//! a single database lock and post the finished response back through
//! [`ResponseDelivery`](transport::ResponseDelivery), which wakes the loop to
//! write it. Responses on one connection leave in the order their requests
//! arrived.
//!
//! Every request carries a [`RequestTrace`](trace::RequestTrace) recording
//! when it was received, when it held the database lock and when it was sent.
//! Completed traces land in a bounded [`TraceBuffer`](trace::TraceBuffer).
//!
//! The binary wraps this in [`run_server`]: load configuration, install
//! telemetry, load credentials, start, wait for a termination signal, then
//! shut down with a bounded wait for workers.

pub mod acl;
pub mod auth;
mod bootstrap;
pub mod content;
pub mod dispatch;
mod health;
pub mod pool;
mod process;
pub mod telemetry;
pub mod trace;
pub mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Gatehouse, ResolverProvider, StaticConfigLoader,
    SystemConfigLoader, SystemResolverProvider, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, LaunchPlan, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_server,
    run_server_with,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{ServerBuilder, ServerError, ServerHandle};

#[cfg(test)]
mod tests;
