//! Withdrawal lifecycle service.
//!
//! Owns every mutation of the withdrawal document: scheduling, on-chain
//! proposal, poll finalization, rejection and removal. State-machine guards
//! run before any transaction attempt, and submission failures are captured
//! into `fail_reason` without changing state so the scheduler retries them.

use std::sync::Arc;

use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, DatabaseError, GuardError, NewWithdrawal, Paginated, PoolClient, Store,
    TransactionRecord, ValidationError, Withdrawal, WithdrawalQuery, WithdrawalState,
    WithdrawalType, parse_base_units,
};

/// Parameters for scheduling a new withdrawal.
#[derive(Debug, Clone)]
pub struct ScheduleParams {
    pub withdrawal_type: WithdrawalType,
    pub sub: String,
    pub pool_address: String,
    pub chain_id: u64,
    /// Base-unit amount, must be positive
    pub amount: U256,
    /// Known beneficiary address; when None the account's registered wallet
    /// is looked up and the withdrawal is deferred if there is none
    pub beneficiary: Option<String>,
    pub unlock_date: Option<DateTime<Utc>>,
    pub reward_id: Option<String>,
}

pub struct WithdrawalService {
    store: Arc<dyn Store>,
    pool_client: Arc<dyn PoolClient>,
}

impl WithdrawalService {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, pool_client: Arc<dyn PoolClient>) -> Self {
        Self { store, pool_client }
    }

    /// Create a withdrawal document. No on-chain side effect.
    ///
    /// The document starts `Deferred` when the owning account has no wallet
    /// address yet, otherwise `Pending`.
    #[instrument(skip(self, params), fields(sub = %params.sub, pool = %params.pool_address))]
    pub async fn schedule(&self, params: ScheduleParams) -> Result<Withdrawal, AppError> {
        if params.amount.is_zero() {
            return Err(AppError::Validation(ValidationError::InvalidAmount(
                "amount must be greater than 0".to_string(),
            )));
        }

        let beneficiary = match params.beneficiary {
            Some(address) => Some(address),
            None => self.store.get_wallet(&params.sub).await?,
        };
        let state = if beneficiary.is_some() {
            WithdrawalState::Pending
        } else {
            WithdrawalState::Deferred
        };

        let withdrawal = self
            .store
            .insert_withdrawal(&NewWithdrawal {
                withdrawal_type: params.withdrawal_type,
                sub: params.sub,
                pool_address: params.pool_address,
                chain_id: params.chain_id,
                reward_id: params.reward_id,
                beneficiary,
                amount: params.amount.to_string(),
                unlock_date: params.unlock_date,
                state,
            })
            .await?;

        info!(id = %withdrawal.id, state = %withdrawal.state, "Withdrawal scheduled");
        Ok(withdrawal)
    }

    /// Submit the pool's propose-withdraw (or claim) call.
    ///
    /// Only valid from `Pending` with no on-chain id assigned yet. On
    /// success the emitted withdrawal id is recorded and state stays
    /// `Pending`; on failure `fail_reason` is set and state is unchanged so
    /// the next scheduler pass retries.
    #[instrument(skip(self, withdrawal), fields(id = %withdrawal.id))]
    pub async fn propose_withdraw(&self, withdrawal: &Withdrawal) -> Result<Withdrawal, AppError> {
        match withdrawal.state {
            WithdrawalState::Pending => {}
            WithdrawalState::Deferred => {
                return Err(AppError::Guard(GuardError::DeferredSubmission(
                    withdrawal.id.clone(),
                )));
            }
            other => {
                return Err(AppError::Guard(GuardError::InvalidState {
                    expected: WithdrawalState::Pending.to_string(),
                    actual: other.to_string(),
                }));
            }
        }
        if withdrawal.is_submitted() {
            return Err(AppError::Guard(GuardError::AlreadySubmitted(
                withdrawal.id.clone(),
            )));
        }
        let beneficiary = withdrawal.beneficiary.clone().ok_or_else(|| {
            AppError::Guard(GuardError::DeferredSubmission(withdrawal.id.clone()))
        })?;
        let amount = parse_base_units(&withdrawal.amount)?;

        match self
            .pool_client
            .propose_withdrawal(withdrawal, &beneficiary, amount)
            .await
        {
            Ok(outcome) => {
                self.store
                    .record_proposal(
                        &withdrawal.id,
                        withdrawal.version,
                        outcome.withdrawal_id,
                        &outcome.transaction_id,
                    )
                    .await?;
                info!(
                    id = %withdrawal.id,
                    withdrawal_id = %outcome.withdrawal_id,
                    "Withdrawal proposed on-chain"
                );
                self.require(&withdrawal.id).await
            }
            Err(e) => {
                warn!(id = %withdrawal.id, kind = %e.kind().as_str(), error = %e, "Proposal failed");
                self.store
                    .set_fail_reason(&withdrawal.id, withdrawal.version, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Finalize the withdrawal poll and transfer funds.
    ///
    /// Deterministically rejected while `unlock_date` has not passed; an
    /// already-withdrawn item is an explicit rejection, never a duplicate
    /// submission.
    #[instrument(skip(self, withdrawal), fields(id = %withdrawal.id))]
    pub async fn withdraw(&self, withdrawal: &Withdrawal) -> Result<Withdrawal, AppError> {
        match withdrawal.state {
            WithdrawalState::Pending => {}
            WithdrawalState::Withdrawn => {
                return Err(AppError::Guard(GuardError::AlreadyWithdrawn(
                    withdrawal.id.clone(),
                )));
            }
            other => {
                return Err(AppError::Guard(GuardError::InvalidState {
                    expected: WithdrawalState::Pending.to_string(),
                    actual: other.to_string(),
                }));
            }
        }
        if !withdrawal.is_submitted() {
            return Err(AppError::Guard(GuardError::InvalidState {
                expected: "pending with on-chain id".to_string(),
                actual: "pending without on-chain id".to_string(),
            }));
        }
        if withdrawal.is_locked(Utc::now()) {
            // Unwrap is safe: is_locked is only true when unlock_date is set
            let unlock_date = withdrawal.unlock_date.ok_or_else(|| {
                AppError::Internal("locked withdrawal without unlock date".to_string())
            })?;
            return Err(AppError::Guard(GuardError::UnlockDateNotReached {
                unlock_date,
            }));
        }

        // Claim the document before the chain call; a racing finalize loses
        // the version race here instead of double-submitting.
        self.store
            .set_state(
                &withdrawal.id,
                withdrawal.version,
                WithdrawalState::Pending,
                None,
            )
            .await?;
        let version = withdrawal.version + 1;

        match self.pool_client.withdraw_poll_finalize(withdrawal).await {
            Ok(transaction_id) => {
                self.store
                    .set_state(
                        &withdrawal.id,
                        version,
                        WithdrawalState::Withdrawn,
                        Some(&transaction_id),
                    )
                    .await?;
                info!(id = %withdrawal.id, "Withdrawal finalized");
                self.require(&withdrawal.id).await
            }
            Err(e) => {
                warn!(id = %withdrawal.id, kind = %e.kind().as_str(), error = %e, "Finalize failed");
                self.store
                    .set_fail_reason(&withdrawal.id, version, &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    /// Governance-style denial of a pending withdrawal.
    #[instrument(skip(self))]
    pub async fn reject(&self, id: &str) -> Result<Withdrawal, AppError> {
        let withdrawal = self.require(id).await?;
        if withdrawal.state != WithdrawalState::Pending {
            return Err(AppError::Guard(GuardError::InvalidState {
                expected: WithdrawalState::Pending.to_string(),
                actual: withdrawal.state.to_string(),
            }));
        }
        self.store
            .set_state(id, withdrawal.version, WithdrawalState::Rejected, None)
            .await?;
        self.require(id).await
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<Withdrawal>, AppError> {
        self.store.get_withdrawal(id).await
    }

    /// Fetch a withdrawal with its transaction records resolved.
    #[instrument(skip(self))]
    pub async fn get_with_transactions(
        &self,
        id: &str,
    ) -> Result<Option<(Withdrawal, Vec<TransactionRecord>)>, AppError> {
        let Some(withdrawal) = self.store.get_withdrawal(id).await? else {
            return Ok(None);
        };
        let transactions = self.store.list_transactions(&withdrawal.transactions).await?;
        Ok(Some((withdrawal, transactions)))
    }

    #[instrument(skip(self, query))]
    pub async fn find(
        &self,
        pool_address: &str,
        query: &WithdrawalQuery,
    ) -> Result<Paginated<Withdrawal>, AppError> {
        self.store.find_withdrawals(pool_address, query).await
    }

    #[instrument(skip(self))]
    pub async fn count_by_pool(&self, pool_address: &str) -> Result<u64, AppError> {
        self.store.count_by_pool(pool_address).await
    }

    /// Sum of base-unit amounts across all non-terminal withdrawals for a
    /// beneficiary on a pool.
    #[instrument(skip(self))]
    pub async fn get_pending_balance(
        &self,
        pool_address: &str,
        beneficiary: &str,
    ) -> Result<U256, AppError> {
        let amounts = self.store.pending_amounts(pool_address, beneficiary).await?;
        let mut total = U256::ZERO;
        for amount in &amounts {
            total = total.saturating_add(parse_base_units(amount)?);
        }
        Ok(total)
    }

    /// Owner-initiated removal, permitted only before on-chain submission.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> Result<(), AppError> {
        let withdrawal = self.require(id).await?;
        if withdrawal.is_submitted() {
            return Err(AppError::Guard(GuardError::AlreadySubmitted(
                withdrawal.id,
            )));
        }
        self.store.delete_withdrawal(id).await
    }

    /// Bulk delete on pool teardown. Irreversible.
    #[instrument(skip(self))]
    pub async fn remove_all_for_pool(&self, pool_address: &str) -> Result<u64, AppError> {
        let removed = self.store.delete_withdrawals_for_pool(pool_address).await?;
        info!(pool = %pool_address, removed = %removed, "Removed withdrawals for pool");
        Ok(removed)
    }

    async fn require(&self, id: &str) -> Result<Withdrawal, AppError> {
        self.store
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))
    }
}
