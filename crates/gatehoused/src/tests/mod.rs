//! Test suites for bootstrap and process supervision.

mod bootstrap_behaviour;
mod support;
mod unit;
