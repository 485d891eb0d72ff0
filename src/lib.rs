//! Asset pool withdrawal relayer.
//!
//! REST API over a withdrawal lifecycle backed by Postgres, with a background
//! scheduler that drains pending withdrawals to EVM asset pool contracts,
//! sequentially per network and concurrently across networks.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
