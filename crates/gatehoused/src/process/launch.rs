//! Launch sequencing for the server process.

use std::sync::Arc;

use tracing::{info, warn};

use crate::bootstrap::{
    ConfigLoader, ResolverProvider, SystemConfigLoader, SystemResolverProvider, bootstrap_with,
};
use crate::content::{MemoryStore, StoreContentBuilder};
use crate::dispatch::SharedDatabase;
use crate::health::{HealthReporter, StructuredHealthReporter};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Collaborators needed to launch the server.
pub struct LaunchPlan<L, P, S> {
    pub loader: L,
    pub resolvers: P,
    pub reporter: Arc<dyn HealthReporter>,
    pub shutdown: S,
}

/// Runs the server with production collaborators until a termination signal
/// arrives.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, startup, signal handling or the
/// final join fails.
pub fn run_server() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        loader: SystemConfigLoader,
        resolvers: SystemResolverProvider,
        reporter: Arc::new(StructuredHealthReporter::new()),
        shutdown: SystemShutdownSignal::new(),
    };
    run_server_with(plan)
}

/// Runs the server with injected collaborators.
///
/// # Errors
///
/// See [`run_server`].
pub fn run_server_with<L, P, S>(plan: LaunchPlan<L, P, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    P: ResolverProvider,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        resolvers,
        reporter,
        shutdown,
    } = plan;

    let gatehouse = bootstrap_with(&loader, Arc::clone(&reporter), &resolvers)?;
    info!(target: PROCESS_TARGET, "starting server runtime");
    let database = SharedDatabase::new(MemoryStore::new());
    let mut handle = gatehouse
        .server_builder(database, Arc::new(StoreContentBuilder::new()))
        .start()?;
    reporter.server_ready(handle.local_addrs());

    let waited = shutdown.wait();
    if let Err(error) = &waited {
        warn!(
            target: PROCESS_TARGET,
            error = %error,
            "shutdown signal unavailable; stopping"
        );
    }
    reporter.server_stopping();
    handle.shutdown();
    handle.join()?;
    reporter.server_stopped();
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    waited.map_err(LaunchError::from)
}
