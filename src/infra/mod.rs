//! Infrastructure layer: concrete implementations of the domain traits.

pub mod chain;
pub mod database;

pub use chain::{
    AssetPoolClient, ChainGasOracle, ContractProvider, Network, NetworkConfig, TransactionConfig,
    TransactionService, TxOutcome,
};
pub use database::{PostgresConfig, PostgresStore};
