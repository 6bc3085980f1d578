//! Test harness utilities for the bootstrap and launch suites.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use gatehouse_config::{Config, ListenEndpoint};

use crate::acl::{ResolveError, ReverseResolver};
use crate::auth::DigestAuthenticator;
use crate::bootstrap::{
    BootstrapError, ConfigLoader, Gatehouse, ResolverProvider, bootstrap_with,
};
use crate::health::HealthReporter;
use crate::process::{ShutdownError, ShutdownSignal};

pub const REALM: &str = "gatehouse-test";

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    configured: Option<TestConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    pub resolvers: RecordingResolverProvider,
    gatehouse: Option<Gatehouse>,
    bootstrap_error: Option<BootstrapError>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self {
            loader: Box::new(TestConfigLoader::new()),
            configured: None,
            reporter: Arc::new(RecordingHealthReporter::default()),
            resolvers: RecordingResolverProvider::default(),
            gatehouse: None,
            bootstrap_error: None,
        }
    }

    pub fn use_loader(&mut self, loader: impl ConfigLoader + 'static) {
        self.loader = Box::new(loader);
        self.configured = None;
        self.reset_results();
    }

    /// Refines the test configuration; steps compose.
    pub fn configure(&mut self, refine: impl FnOnce(TestConfigLoader) -> TestConfigLoader) {
        let loader = self.configured.take().unwrap_or_default();
        self.configured = Some(refine(loader));
        self.reset_results();
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.gatehouse.is_some() || self.bootstrap_error.is_some() {
            return;
        }
        let loader: &dyn ConfigLoader = match &self.configured {
            Some(configured) => configured,
            None => &*self.loader,
        };
        match bootstrap_with(loader, self.reporter.clone(), &self.resolvers) {
            Ok(gatehouse) => self.gatehouse = Some(gatehouse),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    pub fn gatehouse(&self) -> Option<&Gatehouse> {
        self.gatehouse.as_ref()
    }

    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    fn reset_results(&mut self) {
        self.gatehouse = None;
        self.bootstrap_error = None;
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Default test world fixture.
pub fn world() -> std::cell::RefCell<TestWorld> {
    std::cell::RefCell::new(TestWorld::new())
}

/// Loader serving a loopback configuration with optional credentials.
pub struct TestConfigLoader {
    config: Config,
    _dir: Option<Arc<TempDir>>,
}

impl TestConfigLoader {
    /// Loopback listener on an ephemeral port, passwords and hostlist off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config {
                http_endpoint: ListenEndpoint::tcp("127.0.0.1", 0),
                no_passwords: true,
                no_hostlist: true,
                ..Config::default()
            },
            _dir: None,
        }
    }

    /// Enables digest authentication with one `user`/`password` pair.
    #[must_use]
    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        let dir = TempDir::new().expect("failed to create temporary directory");
        let path = dir.path().join("passwords");
        let hash = DigestAuthenticator::hash_password(user, REALM, password);
        fs::write(&path, format!("# test table\n{user}:{REALM}:{hash}\n"))
            .expect("failed to write password file");
        self.config.password_file =
            Some(Utf8PathBuf::from_path_buf(path).expect("temporary path was not valid UTF-8"));
        self.config.realm = REALM.to_owned();
        self.config.no_passwords = false;
        self._dir = Some(Arc::new(dir));
        self
    }

    /// Enables passwords without configuring a password file.
    #[must_use]
    pub fn without_password_file(mut self) -> Self {
        self.config.no_passwords = false;
        self.config.password_file = None;
        self
    }

    /// Enables the hostlist with `allowed` host names.
    #[must_use]
    pub fn with_hostlist(mut self, allowed: &[&str]) -> Self {
        self.config.no_hostlist = false;
        self.config.allowed_hosts = allowed.iter().map(|host| (*host).to_owned()).collect();
        self
    }

    /// Adds the loopback listener on `port`.
    pub fn set_localhost_port(&mut self, port: u16) {
        self.config.localhost_port = Some(port);
    }

    /// Serves every request on the loop thread.
    #[must_use]
    pub fn single_threaded(mut self) -> Self {
        self.config.no_multithread = true;
        self
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Loader that fails by passing an unsupported endpoint scheme.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("gatehoused"),
            OsString::from("--http-endpoint"),
            OsString::from("invalid://endpoint"),
        ];
        Config::load_from_iter(args)
    }
}

/// Resolver that maps every address to one fixed name.
pub struct FixedResolver(pub String);

impl ReverseResolver for FixedResolver {
    fn reverse(&self, _address: std::net::IpAddr) -> Result<String, ResolveError> {
        Ok(self.0.clone())
    }
}

/// Provider that counts how often a resolver was requested.
#[derive(Clone)]
pub struct RecordingResolverProvider {
    name: String,
    requests: Arc<Mutex<usize>>,
}

impl Default for RecordingResolverProvider {
    fn default() -> Self {
        Self::resolving_to("localhost")
    }
}

impl RecordingResolverProvider {
    pub fn resolving_to(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            requests: Arc::new(Mutex::new(0)),
        }
    }

    pub fn requests(&self) -> usize {
        *self.requests.lock().expect("resolver provider mutex poisoned")
    }
}

impl ResolverProvider for RecordingResolverProvider {
    fn resolver(&self) -> io::Result<Arc<dyn ReverseResolver>> {
        *self.requests.lock().expect("resolver provider mutex poisoned") += 1;
        Ok(Arc::new(FixedResolver(self.name.clone())))
    }
}

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
    changed: Condvar,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Blocks until the server reports its bound addresses.
    pub fn wait_until_ready(&self, timeout: Duration) -> Vec<SocketAddr> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().expect("health reporter mutex poisoned");
        loop {
            let ready = events.iter().find_map(|event| match event {
                HealthEvent::ServerReady(addresses) => Some(addresses.clone()),
                _ => None,
            });
            if let Some(addresses) = ready {
                return addresses;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert!(!remaining.is_zero(), "server never became ready: {events:?}");
            events = self
                .changed
                .wait_timeout(events, remaining)
                .expect("health reporter mutex poisoned")
                .0;
        }
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
        self.changed.notify_all();
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn server_ready(&self, addresses: &[SocketAddr]) {
        self.record(HealthEvent::ServerReady(addresses.to_vec()));
    }

    fn server_stopping(&self) {
        self.record(HealthEvent::ServerStopping);
    }

    fn server_stopped(&self) {
        self.record(HealthEvent::ServerStopped);
    }
}

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ServerReady(Vec<SocketAddr>),
    ServerStopping,
    ServerStopped,
}

/// Shutdown signal released by the test instead of the operating system.
#[derive(Clone, Default)]
pub struct ManualShutdown {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl ManualShutdown {
    pub fn trigger(&self) {
        let (flag, signalled) = &*self.state;
        *flag.lock().expect("shutdown mutex poisoned") = true;
        signalled.notify_all();
    }
}

impl ShutdownSignal for ManualShutdown {
    fn wait(&self) -> Result<(), ShutdownError> {
        let (flag, signalled) = &*self.state;
        let mut raised = flag.lock().expect("shutdown mutex poisoned");
        while !*raised {
            raised = signalled.wait(raised).expect("shutdown mutex poisoned");
        }
        Ok(())
    }
}
