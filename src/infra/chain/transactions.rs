//! Transaction submission with per-network nonce serialization.
//!
//! Every state-changing call on a network goes through one mutex-guarded
//! path: the nonce is tracked locally (seeded from the chain's pending
//! transaction count, re-synced after any send error), fees are sourced from
//! the gas oracle and checked against the configured ceiling, and a
//! `TransactionRecord` is persisted for every attempt regardless of outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, TxKind};
use alloy::providers::Provider;
use alloy::rpc::types::{TransactionInput, TransactionReceipt, TransactionRequest};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, ChainError, Store, TransactionRecord, TransactionStatus,
};

use super::nonce::NonceTracker;
use super::provider::ContractProvider;

/// Submission limits and receipt polling cadence
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Hard ceiling in wei; submission is refused above it
    pub max_fee_per_gas: u128,
    pub receipt_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_fee_per_gas: 250_000_000_000,
            receipt_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// A mined transaction: its persisted record id and the receipt
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub record_id: String,
    pub tx_hash: String,
    pub receipt: TransactionReceipt,
}

/// Serialized transaction submission over the provider registry
pub struct TransactionService {
    provider: Arc<ContractProvider>,
    store: Arc<dyn Store>,
    gas_oracle: Arc<dyn crate::domain::GasOracle>,
    config: TransactionConfig,
    nonces: NonceTracker,
}

impl TransactionService {
    pub fn new(
        provider: Arc<ContractProvider>,
        store: Arc<dyn Store>,
        gas_oracle: Arc<dyn crate::domain::GasOracle>,
        config: TransactionConfig,
    ) -> Self {
        Self {
            provider,
            store,
            gas_oracle,
            config,
            nonces: NonceTracker::new(),
        }
    }

    /// Submit a state-changing call and wait for its receipt.
    #[instrument(skip(self, call_data), fields(data_len = call_data.len()))]
    pub async fn send(
        &self,
        chain_id: u64,
        to: Address,
        call_data: Vec<u8>,
        gas_limit: Option<u64>,
        withdrawal_ref: Option<&str>,
    ) -> Result<TxOutcome, AppError> {
        self.submit(chain_id, TxKind::Call(to), call_data, gas_limit, withdrawal_ref)
            .await
    }

    /// Submit a contract creation, sharing the same nonce serialization.
    #[instrument(skip(self, bytecode), fields(code_len = bytecode.len()))]
    pub async fn deploy(
        &self,
        chain_id: u64,
        bytecode: Vec<u8>,
        gas_limit: Option<u64>,
    ) -> Result<TxOutcome, AppError> {
        self.submit(chain_id, TxKind::Create, bytecode, gas_limit, None)
            .await
    }

    /// Read-only `eth_call` against a contract.
    #[instrument(skip(self, call_data))]
    pub async fn call(
        &self,
        chain_id: u64,
        to: Address,
        call_data: Vec<u8>,
    ) -> Result<Vec<u8>, AppError> {
        let network = self.provider.network(chain_id)?;
        let request = TransactionRequest {
            to: Some(TxKind::Call(to)),
            input: TransactionInput::new(call_data.into()),
            ..Default::default()
        };
        let output = network
            .provider
            .call(request)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(output.to_vec())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<TransactionRecord>, AppError> {
        self.store.get_transaction(id).await
    }

    /// Failure reasons across a withdrawal's transaction records.
    pub async fn find_fail_reasons(&self, ids: &[String]) -> Result<Vec<String>, AppError> {
        self.store.find_fail_reasons(ids).await
    }

    async fn submit(
        &self,
        chain_id: u64,
        kind: TxKind,
        data: Vec<u8>,
        gas_limit: Option<u64>,
        withdrawal_ref: Option<&str>,
    ) -> Result<TxOutcome, AppError> {
        let network = self.provider.network(chain_id)?.clone();

        let fee = self.gas_oracle.max_fee_per_gas(chain_id).await?;
        if fee > self.config.max_fee_per_gas {
            return Err(ChainError::MaxFeePerGasExceeded {
                current: fee,
                max: self.config.max_fee_per_gas,
            }
            .into());
        }

        let lease = self
            .nonces
            .lease(chain_id, || async {
                network
                    .provider
                    .get_transaction_count(network.signer_address)
                    .pending()
                    .await
                    .map_err(|e| ChainError::Rpc(e.to_string()))
            })
            .await?;
        let nonce = lease.nonce();

        let to_address = match kind {
            TxKind::Call(addr) => Some(addr.to_string()),
            TxKind::Create => None,
        };
        let mut record = TransactionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            withdrawal_ref: withdrawal_ref.map(str::to_owned),
            to_address,
            call_data: format!("0x{}", hex::encode(&data)),
            chain_id,
            nonce,
            max_fee_per_gas: Some(fee.to_string()),
            tx_hash: None,
            block_number: None,
            gas_used: None,
            status: TransactionStatus::Pending,
            fail_reason: None,
            created_at: Utc::now(),
        };
        self.store.insert_transaction(&record).await?;

        let request = TransactionRequest {
            to: Some(kind),
            input: TransactionInput::new(data.into()),
            nonce: Some(nonce),
            gas: gas_limit,
            max_fee_per_gas: Some(fee),
            ..Default::default()
        };

        let pending = match network.provider.send_transaction(request).await {
            Ok(pending) => pending,
            Err(e) => {
                lease.invalidate();
                let error = classify_send_error(&e.to_string());
                self.mark_failed(&mut record, &error.to_string()).await;
                return Err(error.into());
            }
        };
        // Receipt polling happens outside the submission lock.
        lease.commit();

        let tx_hash = format!("{:?}", pending.tx_hash());
        record.tx_hash = Some(tx_hash.clone());
        info!(chain_id, nonce, %tx_hash, "Transaction submitted");

        self.await_receipt(&network, record, tx_hash).await
    }

    async fn await_receipt(
        &self,
        network: &super::provider::Network,
        mut record: TransactionRecord,
        tx_hash: String,
    ) -> Result<TxOutcome, AppError> {
        let hash = tx_hash
            .parse()
            .map_err(|e| ChainError::Encoding(format!("transaction hash: {e}")))?;
        let started = Instant::now();

        loop {
            if started.elapsed() > self.config.receipt_timeout {
                let reason = format!(
                    "no receipt for {tx_hash} after {:?}",
                    self.config.receipt_timeout
                );
                self.mark_failed(&mut record, &reason).await;
                return Err(ChainError::Timeout(reason).into());
            }

            match network.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status() {
                        record.status = TransactionStatus::Mined;
                        record.block_number = receipt.block_number.map(|n| n as i64);
                        record.gas_used = Some(receipt.gas_used.to_string());
                        record.fail_reason = None;
                        self.store.update_transaction(&record).await?;
                        return Ok(TxOutcome {
                            record_id: record.id,
                            tx_hash,
                            receipt,
                        });
                    }
                    let reason = format!("transaction {tx_hash} reverted");
                    record.block_number = receipt.block_number.map(|n| n as i64);
                    record.gas_used = Some(receipt.gas_used.to_string());
                    self.mark_failed(&mut record, &reason).await;
                    return Err(ChainError::Reverted(reason).into());
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(%tx_hash, error = %e, "Receipt lookup failed, retrying");
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Persist a failure without masking the chain error being returned.
    async fn mark_failed(&self, record: &mut TransactionRecord, reason: &str) {
        record.status = TransactionStatus::Failed;
        record.fail_reason = Some(reason.to_owned());
        if let Err(e) = self.store.update_transaction(record).await {
            warn!(id = %record.id, error = %e, "Failed to persist transaction failure");
        }
    }
}

fn classify_send_error(message: &str) -> ChainError {
    let lowered = message.to_lowercase();
    if lowered.contains("nonce") {
        ChainError::NonceConflict(message.to_owned())
    } else if lowered.contains("connection") || lowered.contains("transport") {
        ChainError::Connection(message.to_owned())
    } else {
        ChainError::Rpc(message.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_send_error() {
        assert!(matches!(
            classify_send_error("nonce too low"),
            ChainError::NonceConflict(_)
        ));
        assert!(matches!(
            classify_send_error("transport error: connection refused"),
            ChainError::Connection(_)
        ));
        assert!(matches!(
            classify_send_error("execution error"),
            ChainError::Rpc(_)
        ));
    }

    #[test]
    fn test_default_config_ceiling() {
        let config = TransactionConfig::default();
        assert_eq!(config.max_fee_per_gas, 250_000_000_000);
    }
}
