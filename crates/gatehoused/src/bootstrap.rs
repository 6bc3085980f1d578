//! Server bootstrap orchestration.
//!
//! Bootstrap turns a [`Config`] into the collaborators the server needs: the
//! tracing subscriber, the digest authenticator, the hostlist cache and the
//! request trace archive. Nothing is bound here; [`Gatehouse::server_builder`]
//! hands the pieces to a [`ServerBuilder`] when the caller is ready.

use std::io;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use gatehouse_config::Config;

use crate::acl::{HostlistCache, ReverseResolver, SystemResolver};
use crate::auth::{CredentialsError, DigestAuthenticator, load_credentials};
use crate::content::ContentBuilder;
use crate::dispatch::SharedDatabase;
use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::trace::TraceBuffer;
use crate::transport::ServerBuilder;

/// Abstracts configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that returns a configuration resolved earlier.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Supplies the reverse resolver behind the hostlist.
///
/// Only consulted when the hostlist is enabled.
pub trait ResolverProvider {
    /// Builds the resolver.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while reading resolver configuration.
    fn resolver(&self) -> io::Result<Arc<dyn ReverseResolver>>;
}

/// Provider backed by the host's DNS configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolverProvider;

impl ResolverProvider for SystemResolverProvider {
    fn resolver(&self) -> io::Result<Arc<dyn ReverseResolver>> {
        Ok(Arc::new(SystemResolver::from_system_conf()?))
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration layers could not be merged.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader failure.
        #[source]
        source: Arc<OrthoError>,
    },
    /// The tracing subscriber could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry failure.
        #[source]
        source: TelemetryError,
    },
    /// Passwords are enabled but the credentials table is unusable.
    #[error("failed to load credentials: {source}")]
    Credentials {
        /// Underlying credentials failure.
        #[source]
        source: CredentialsError,
    },
    /// The hostlist is enabled but no resolver could be built.
    #[error("failed to configure the hostlist resolver: {source}")]
    Resolver {
        /// Underlying resolver configuration failure.
        #[source]
        source: io::Error,
    },
}

/// Everything bootstrap produced, ready to be turned into a running server.
pub struct Gatehouse {
    config: Config,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
    authenticator: Option<Arc<DigestAuthenticator>>,
    hostlist: Option<Arc<HostlistCache>>,
    traces: Arc<TraceBuffer>,
}

impl Gatehouse {
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    #[must_use]
    pub fn reporter(&self) -> &Arc<dyn HealthReporter> {
        &self.reporter
    }

    /// `None` when passwords are disabled.
    #[must_use]
    pub fn authenticator(&self) -> Option<&Arc<DigestAuthenticator>> {
        self.authenticator.as_ref()
    }

    /// `None` when the hostlist is disabled.
    #[must_use]
    pub fn hostlist(&self) -> Option<&Arc<HostlistCache>> {
        self.hostlist.as_ref()
    }

    #[must_use]
    pub fn traces(&self) -> &Arc<TraceBuffer> {
        &self.traces
    }

    /// Builds a server configured from this bootstrap over `database`.
    ///
    /// The public endpoint is screened by the hostlist; the loopback
    /// endpoint, when configured, is not.
    #[must_use]
    pub fn server_builder<D: Send + 'static>(
        &self,
        database: SharedDatabase<D>,
        content: Arc<dyn ContentBuilder<D>>,
    ) -> ServerBuilder<D> {
        let mut builder = ServerBuilder::new(database, content)
            .listen(self.config.http_endpoint().clone(), true)
            .authenticator(self.authenticator.clone())
            .hostlist(self.hostlist.clone())
            .multithread(self.config.multithread_enabled())
            .max_worker_threads(self.config.max_worker_threads())
            .shutdown_timeout(self.config.shutdown_timeout())
            .traces(Arc::clone(&self.traces));
        if let Some(endpoint) = self.config.localhost_endpoint() {
            builder = builder.listen(endpoint, false);
        }
        builder
    }
}

/// Bootstraps the server using the supplied collaborators.
///
/// # Errors
///
/// Returns the first failing stage; the reporter has already been told.
pub fn bootstrap_with<P>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    resolvers: &P,
) -> Result<Gatehouse, BootstrapError>
where
    P: ResolverProvider + ?Sized,
{
    reporter.bootstrap_starting();
    match assemble(loader, resolvers) {
        Ok((config, telemetry, authenticator, hostlist)) => {
            reporter.bootstrap_succeeded(&config);
            let traces = Arc::new(TraceBuffer::new(
                config.trace_capacity(),
                config.trace_requests(),
            ));
            Ok(Gatehouse {
                config,
                telemetry,
                reporter,
                authenticator,
                hostlist,
                traces,
            })
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

type Assembled = (
    Config,
    TelemetryHandle,
    Option<Arc<DigestAuthenticator>>,
    Option<Arc<HostlistCache>>,
);

fn assemble<P>(loader: &dyn ConfigLoader, resolvers: &P) -> Result<Assembled, BootstrapError>
where
    P: ResolverProvider + ?Sized,
{
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    let authenticator = load_authenticator(&config)
        .map_err(|source| BootstrapError::Credentials { source })?;
    let hostlist = if config.hostlist_enabled() {
        let resolver = resolvers
            .resolver()
            .map_err(|source| BootstrapError::Resolver { source })?;
        Some(Arc::new(HostlistCache::new(
            resolver,
            config.allowed_hosts(),
            config.hostlist_ttl(),
        )))
    } else {
        None
    };
    Ok((config, telemetry, authenticator, hostlist))
}

fn load_authenticator(
    config: &Config,
) -> Result<Option<Arc<DigestAuthenticator>>, CredentialsError> {
    if !config.passwords_enabled() {
        return Ok(None);
    }
    let path = config.password_file().ok_or(CredentialsError::Missing)?;
    let entries = load_credentials(path, config.realm())?;
    Ok(Some(Arc::new(DigestAuthenticator::new(
        config.realm(),
        entries,
        config.nonce_ttl(),
    ))))
}
