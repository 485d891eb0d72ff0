//! Per-network RPC provider registry.
//!
//! One admin signer per configured network; every outbound transaction on a
//! network goes through its provider with the wallet attached.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::network::Ethereum;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::Signer;
use alloy::signers::local::PrivateKeySigner;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;
use url::Url;

use crate::domain::{AppError, ChainError, ConfigError};

/// Connection settings for one EVM network
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    /// Hex-encoded admin signer key
    pub private_key: SecretString,
    /// External gas price endpoint; node estimation is used when absent
    pub gas_oracle_url: Option<String>,
}

/// A connected network: provider with the admin wallet attached
#[derive(Clone)]
pub struct Network {
    pub chain_id: u64,
    pub provider: Arc<dyn Provider<Ethereum>>,
    pub signer_address: Address,
}

/// Registry of connected networks, keyed by chain id
pub struct ContractProvider {
    networks: HashMap<u64, Network>,
}

impl ContractProvider {
    /// Connect to every configured network and verify its reported chain id.
    pub async fn connect(configs: &[NetworkConfig]) -> Result<Self, AppError> {
        let mut networks = HashMap::with_capacity(configs.len());

        for config in configs {
            let url = Url::parse(&config.rpc_url).map_err(|e| {
                ConfigError::Invalid {
                    field: format!("NETWORK_{}_RPC_URL", config.chain_id),
                    message: e.to_string(),
                }
            })?;

            let signer = PrivateKeySigner::from_str(config.private_key.expose_secret())
                .map_err(|e| ConfigError::Invalid {
                    field: format!("NETWORK_{}_PRIVATE_KEY", config.chain_id),
                    message: e.to_string(),
                })?
                .with_chain_id(Some(config.chain_id));
            let signer_address = signer.address();

            let provider = ProviderBuilder::new().wallet(signer).connect_http(url);

            let reported = provider
                .get_chain_id()
                .await
                .map_err(|e| ChainError::Connection(e.to_string()))?;
            if reported != config.chain_id {
                return Err(ChainError::Connection(format!(
                    "chain id mismatch: expected {}, node reports {}",
                    config.chain_id, reported
                ))
                .into());
            }

            info!(
                chain_id = config.chain_id,
                signer = %signer_address,
                "Connected to network"
            );

            networks.insert(
                config.chain_id,
                Network {
                    chain_id: config.chain_id,
                    provider: Arc::new(provider),
                    signer_address,
                },
            );
        }

        Ok(Self { networks })
    }

    /// Look up a connected network by chain id.
    pub fn network(&self, chain_id: u64) -> Result<&Network, AppError> {
        self.networks
            .get(&chain_id)
            .ok_or_else(|| ChainError::UnknownNetwork(chain_id).into())
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.networks.keys().copied()
    }

    /// Block number probe against every network.
    pub async fn health_check(&self) -> Result<(), AppError> {
        for network in self.networks.values() {
            network
                .provider
                .get_block_number()
                .await
                .map_err(|e| ChainError::Connection(e.to_string()))?;
        }
        Ok(())
    }
}
