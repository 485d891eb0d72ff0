//! Test doubles shared between unit and integration tests.

pub mod mocks;

pub use mocks::{MockConfig, MockGasOracle, MockPoolClient, MockStore};
