//! Unit tests for the bootstrap sequence.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use crate::auth::CredentialsError;
use crate::bootstrap::{BootstrapError, bootstrap_with};
use crate::content::{MemoryStore, StoreContentBuilder};
use crate::dispatch::SharedDatabase;
use crate::telemetry;

use super::support::{
    FailingConfigLoader, HealthEvent, REALM, RecordingHealthReporter, RecordingResolverProvider,
    TestConfigLoader,
};

#[rstest]
fn bootstrap_without_passwords_or_hostlist_builds_neither() {
    let loader = TestConfigLoader::new();
    let reporter = Arc::new(RecordingHealthReporter::default());
    let resolvers = RecordingResolverProvider::default();

    let gatehouse =
        bootstrap_with(&loader, reporter.clone(), &resolvers).expect("bootstrap should succeed");

    assert!(gatehouse.authenticator().is_none());
    assert!(gatehouse.hostlist().is_none());
    assert_eq!(resolvers.requests(), 0);
    assert_eq!(
        reporter.events(),
        vec![HealthEvent::BootstrapStarting, HealthEvent::BootstrapSucceeded]
    );
    let reinstalled = telemetry::initialise(gatehouse.config()).expect("telemetry is installed");
    assert_eq!(gatehouse.telemetry(), reinstalled);
}

#[rstest]
fn credentials_are_loaded_for_the_configured_realm() {
    let loader = TestConfigLoader::new().with_credentials("operator", "secret");
    let reporter = Arc::new(RecordingHealthReporter::default());

    let gatehouse = bootstrap_with(&loader, reporter, &RecordingResolverProvider::default())
        .expect("bootstrap should succeed");

    let authenticator = gatehouse.authenticator().expect("passwords enabled");
    assert_eq!(authenticator.realm(), REALM);
}

#[rstest]
fn passwords_without_a_table_abort_startup() {
    let loader = TestConfigLoader::new().without_password_file();
    let reporter = Arc::new(RecordingHealthReporter::default());

    let Err(error) = bootstrap_with(&loader, reporter.clone(), &RecordingResolverProvider::default())
    else {
        panic!("bootstrap should fail without a password file");
    };

    assert!(matches!(
        error,
        BootstrapError::Credentials {
            source: CredentialsError::Missing
        }
    ));
    assert!(
        reporter
            .events()
            .iter()
            .any(|event| matches!(event, HealthEvent::BootstrapFailed(_)))
    );
}

#[rstest]
fn configuration_errors_are_reported() {
    let reporter = Arc::new(RecordingHealthReporter::default());

    let Err(error) = bootstrap_with(
        &FailingConfigLoader,
        reporter.clone(),
        &RecordingResolverProvider::default(),
    ) else {
        panic!("bootstrap should fail on an invalid endpoint");
    };

    assert!(matches!(error, BootstrapError::Configuration { .. }));
    assert!(!reporter.events().contains(&HealthEvent::BootstrapSucceeded));
}

#[rstest]
fn hostlist_requests_one_resolver() {
    let loader = TestConfigLoader::new().with_hostlist(&["daq.example.org"]);
    let resolvers = RecordingResolverProvider::resolving_to("daq.example.org");

    let gatehouse = bootstrap_with(
        &loader,
        Arc::new(RecordingHealthReporter::default()),
        &resolvers,
    )
    .expect("bootstrap should succeed");

    assert!(gatehouse.hostlist().is_some());
    assert_eq!(resolvers.requests(), 1);
}

#[rstest]
fn server_builder_binds_the_configured_listeners() {
    let mut loader = TestConfigLoader::new().single_threaded();
    loader.set_localhost_port(0);
    let gatehouse = bootstrap_with(
        &loader,
        Arc::new(RecordingHealthReporter::default()),
        &RecordingResolverProvider::default(),
    )
    .expect("bootstrap should succeed");
    assert_eq!(gatehouse.traces().len(), 0);

    let mut handle = gatehouse
        .server_builder(
            SharedDatabase::new(MemoryStore::new()),
            Arc::new(StoreContentBuilder::new()),
        )
        .shutdown_timeout(Duration::from_secs(1))
        .start()
        .expect("server should start");

    let addresses = handle.local_addrs().to_vec();
    assert_eq!(addresses.len(), 2);
    assert!(addresses.iter().all(|address| address.ip().is_loopback()));
    assert!(addresses.iter().all(|address| address.port() != 0));
    assert_eq!(handle.worker_threads(), 0);

    handle.shutdown();
    handle.join().expect("event loop should stop cleanly");
}
