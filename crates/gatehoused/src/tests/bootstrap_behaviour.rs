//! Behavioural tests for the server bootstrap sequence.

use std::cell::RefCell;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use super::support::{self, FailingConfigLoader, HealthEvent, TestConfigLoader, TestWorld};

type StepResult = Result<(), String>;

#[fixture]
fn world() -> RefCell<TestWorld> {
    support::world()
}

#[given("a configuration with credentials for \"{user}\"")]
fn given_credentials(world: &RefCell<TestWorld>, user: String) {
    world
        .borrow_mut()
        .configure(|loader| loader.with_credentials(&user, "secret"));
}

#[given("the hostlist allows \"{host}\"")]
fn given_hostlist(world: &RefCell<TestWorld>, host: String) {
    world
        .borrow_mut()
        .configure(|loader| loader.with_hostlist(&[host.as_str()]));
}

#[given("a configuration that enables passwords without a password file")]
fn given_missing_password_file(world: &RefCell<TestWorld>) {
    world
        .borrow_mut()
        .configure(TestConfigLoader::without_password_file);
}

#[given("a failing configuration loader")]
fn given_failing_loader(world: &RefCell<TestWorld>) {
    world.borrow_mut().use_loader(FailingConfigLoader);
}

#[when("the server bootstrap runs")]
fn when_bootstrap_runs(world: &RefCell<TestWorld>) {
    world.borrow_mut().bootstrap();
}

#[then("bootstrap succeeds")]
fn then_bootstrap_succeeds(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    assert!(
        world.bootstrap_error().is_none(),
        "bootstrap error: {:?}",
        world.bootstrap_error()
    );
    assert!(world.gatehouse().is_some(), "server should have been assembled");
}

#[then("bootstrap fails")]
fn then_bootstrap_fails(world: &RefCell<TestWorld>) {
    assert!(
        world.borrow().bootstrap_error().is_some(),
        "bootstrap succeeded unexpectedly"
    );
}

#[then("the authenticator is configured")]
fn then_authenticator_configured(world: &RefCell<TestWorld>) -> StepResult {
    let world = world.borrow();
    let gatehouse = world.gatehouse().ok_or("bootstrap did not succeed")?;
    gatehouse
        .authenticator()
        .map(|_| ())
        .ok_or_else(|| "authenticator missing".to_owned())
}

#[then("one resolver was requested")]
fn then_one_resolver(world: &RefCell<TestWorld>) {
    assert_eq!(world.borrow().resolvers.requests(), 1);
}

#[then("no resolver was requested")]
fn then_no_resolver(world: &RefCell<TestWorld>) {
    assert_eq!(world.borrow().resolvers.requests(), 0);
}

#[then("the reporter recorded bootstrap success")]
fn then_reporter_success(world: &RefCell<TestWorld>) {
    assert!(
        world
            .borrow()
            .reporter
            .events()
            .contains(&HealthEvent::BootstrapSucceeded),
        "bootstrap success event missing"
    );
}

#[then("the reporter recorded bootstrap failure")]
fn then_reporter_failure(world: &RefCell<TestWorld>) {
    let events = world.borrow().reporter.events();
    let failed = events
        .iter()
        .any(|event| matches!(event, HealthEvent::BootstrapFailed(_)));
    assert!(failed, "bootstrap failure event missing: {events:?}");
}

#[scenario(path = "tests/features/server_bootstrap.feature")]
fn server_bootstrap(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/bootstrap_missing_credentials.feature")]
fn bootstrap_missing_credentials(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/bootstrap_configuration_failure.feature")]
fn bootstrap_configuration_failure(world: RefCell<TestWorld>) {
    let _ = world;
}
