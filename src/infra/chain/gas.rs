//! Gas price sourcing.
//!
//! Networks with a configured oracle endpoint are queried over HTTP; anything
//! else falls back to the node's EIP-1559 fee estimation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::domain::{AppError, ChainError, GasOracle};

use super::provider::ContractProvider;

const ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleResponse {
    /// Wei, as a decimal string
    max_fee_per_gas: String,
}

/// Fetch the current max fee from an oracle endpoint.
pub async fn fetch_oracle_fee(http: &reqwest::Client, url: &str) -> Result<u128, AppError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| ChainError::Connection(e.to_string()))?
        .error_for_status()
        .map_err(|e| ChainError::Rpc(e.to_string()))?;

    let body: OracleResponse = response
        .json()
        .await
        .map_err(|e| ChainError::Rpc(format!("gas oracle response: {e}")))?;

    body.max_fee_per_gas
        .parse::<u128>()
        .map_err(|e| ChainError::Rpc(format!("gas oracle fee parse: {e}")).into())
}

/// Gas oracle backed by per-network HTTP endpoints with node fallback
pub struct ChainGasOracle {
    http: reqwest::Client,
    provider: Arc<ContractProvider>,
    endpoints: HashMap<u64, String>,
}

impl ChainGasOracle {
    pub fn new(provider: Arc<ContractProvider>, endpoints: HashMap<u64, String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(ORACLE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            provider,
            endpoints,
        }
    }

    async fn estimate_from_node(&self, chain_id: u64) -> Result<u128, AppError> {
        let network = self.provider.network(chain_id)?;
        let estimate = network
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(estimate.max_fee_per_gas)
    }
}

#[async_trait]
impl GasOracle for ChainGasOracle {
    #[instrument(skip(self))]
    async fn max_fee_per_gas(&self, chain_id: u64) -> Result<u128, AppError> {
        if let Some(url) = self.endpoints.get(&chain_id) {
            match fetch_oracle_fee(&self.http, url).await {
                Ok(fee) => return Ok(fee),
                Err(e) => {
                    warn!(chain_id, error = %e, "Gas oracle unavailable, using node estimation");
                }
            }
        }
        self.estimate_from_node(chain_id).await
    }
}
