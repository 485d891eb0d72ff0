//! EVM infrastructure: provider registry, transaction submission, contract
//! bindings and gas price sourcing.

pub mod gas;
pub mod nonce;
pub mod pool;
pub mod provider;
pub mod transactions;

pub use gas::{ChainGasOracle, fetch_oracle_fee};
pub use nonce::{NonceLease, NonceTracker};
pub use pool::AssetPoolClient;
pub use provider::{ContractProvider, Network, NetworkConfig};
pub use transactions::{TransactionConfig, TransactionService, TxOutcome};
