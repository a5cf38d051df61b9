//! Scenario tests for the default Python pipeline

mod cancellation;
mod failure_handling;
mod lint_scope;
mod publishing;
