//! Asset pool contract bindings and the `PoolClient` implementation.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::{info, instrument};

use crate::domain::{
    AppError, ChainError, PoolClient, ProposalOutcome, ValidationError, Withdrawal,
};

use super::provider::ContractProvider;
use super::transactions::{TransactionService, TxOutcome};

sol! {
    #[sol(rpc)]
    interface IAssetPool {
        function proposeWithdraw(address member, uint256 amount) external returns (uint256);
        function withdrawPollFinalize(uint256 withdrawalId) external;

        event WithdrawalProposed(uint256 indexed withdrawalId, address indexed member, uint256 amount);
    }
}

/// `PoolClient` backed by the shared transaction service
pub struct AssetPoolClient {
    provider: Arc<ContractProvider>,
    transactions: Arc<TransactionService>,
}

impl AssetPoolClient {
    pub fn new(provider: Arc<ContractProvider>, transactions: Arc<TransactionService>) -> Self {
        Self {
            provider,
            transactions,
        }
    }

    fn parse_address(value: &str, field: &str) -> Result<Address, AppError> {
        Address::from_str(value).map_err(|_| {
            ValidationError::InvalidAddress(format!("{field}: {value}")).into()
        })
    }

    /// Extract the poll index from the proposal receipt's event log.
    fn decode_proposed_id(outcome: &TxOutcome, pool: Address) -> Result<u64, AppError> {
        for log in outcome.receipt.inner.logs() {
            if log.address() != pool {
                continue;
            }
            if let Ok(decoded) = log.log_decode::<IAssetPool::WithdrawalProposed>() {
                return Ok(decoded.inner.data.withdrawalId.to::<u64>());
            }
        }
        Err(ChainError::Encoding(format!(
            "WithdrawalProposed event missing from receipt {}",
            outcome.tx_hash
        ))
        .into())
    }
}

#[async_trait]
impl PoolClient for AssetPoolClient {
    async fn health_check(&self) -> Result<(), AppError> {
        self.provider.health_check().await
    }

    #[instrument(skip(self, withdrawal), fields(id = %withdrawal.id, chain_id = withdrawal.chain_id))]
    async fn propose_withdrawal(
        &self,
        withdrawal: &Withdrawal,
        beneficiary: &str,
        amount: U256,
    ) -> Result<ProposalOutcome, AppError> {
        let pool = Self::parse_address(&withdrawal.pool_address, "pool_address")?;
        let member = Self::parse_address(beneficiary, "beneficiary")?;

        let call = IAssetPool::proposeWithdrawCall { member, amount };
        let outcome = self
            .transactions
            .send(
                withdrawal.chain_id,
                pool,
                call.abi_encode(),
                None,
                Some(&withdrawal.id),
            )
            .await?;

        let withdrawal_id = Self::decode_proposed_id(&outcome, pool)?;
        info!(
            id = %withdrawal.id,
            withdrawal_id,
            tx_hash = %outcome.tx_hash,
            "Withdrawal proposed on-chain"
        );

        Ok(ProposalOutcome {
            withdrawal_id,
            transaction_id: outcome.record_id,
        })
    }

    #[instrument(skip(self, withdrawal), fields(id = %withdrawal.id, chain_id = withdrawal.chain_id))]
    async fn withdraw_poll_finalize(&self, withdrawal: &Withdrawal) -> Result<String, AppError> {
        let pool = Self::parse_address(&withdrawal.pool_address, "pool_address")?;
        let withdrawal_id = withdrawal.withdrawal_id.ok_or_else(|| {
            ChainError::Encoding(format!(
                "withdrawal {} has no on-chain id to finalize",
                withdrawal.id
            ))
        })?;

        let call = IAssetPool::withdrawPollFinalizeCall {
            withdrawalId: U256::from(withdrawal_id),
        };
        let outcome = self
            .transactions
            .send(
                withdrawal.chain_id,
                pool,
                call.abi_encode(),
                None,
                Some(&withdrawal.id),
            )
            .await?;

        info!(
            id = %withdrawal.id,
            withdrawal_id,
            tx_hash = %outcome.tx_hash,
            "Withdrawal finalized on-chain"
        );
        Ok(outcome.record_id)
    }
}
