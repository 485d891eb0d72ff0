//! Domain traits defining contracts for external systems.

use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::AppError;
use super::types::{
    Paginated, Reward, TransactionRecord, Withdrawal, WithdrawalQuery, WithdrawalState,
    WithdrawalType,
};

/// Insert payload for a new withdrawal document.
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub withdrawal_type: WithdrawalType,
    pub sub: String,
    pub pool_address: String,
    pub chain_id: u64,
    pub reward_id: Option<String>,
    pub beneficiary: Option<String>,
    /// Base units, decimal string
    pub amount: String,
    pub unlock_date: Option<DateTime<Utc>>,
    pub state: WithdrawalState,
}

/// Persistence operations over withdrawals, transaction records, rewards and
/// the account wallet registry.
///
/// All state-transition writes take the caller's last observed `version` and
/// fail with `DatabaseError::Conflict` when another writer got there first.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check database connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    async fn insert_withdrawal(&self, data: &NewWithdrawal) -> Result<Withdrawal, AppError>;

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, AppError>;

    /// Page-based listing scoped to one pool, with optional filters.
    async fn find_withdrawals(
        &self,
        pool_address: &str,
        query: &WithdrawalQuery,
    ) -> Result<Paginated<Withdrawal>, AppError>;

    async fn count_by_pool(&self, pool_address: &str) -> Result<u64, AppError>;

    /// Base-unit amounts of all non-terminal withdrawals for a beneficiary.
    async fn pending_amounts(
        &self,
        pool_address: &str,
        beneficiary: &str,
    ) -> Result<Vec<String>, AppError>;

    /// Pending withdrawals requiring an on-chain action, oldest first.
    async fn list_processable(&self, limit: i64) -> Result<Vec<Withdrawal>, AppError>;

    /// Deferred withdrawals awaiting a wallet registration.
    async fn list_deferred(&self, limit: i64) -> Result<Vec<Withdrawal>, AppError>;

    /// Record a successful on-chain proposal: assigns the on-chain id,
    /// clears `fail_reason`, appends the transaction reference. State stays
    /// `Pending`.
    async fn record_proposal(
        &self,
        id: &str,
        version: i32,
        withdrawal_id: u64,
        transaction_id: &str,
    ) -> Result<(), AppError>;

    /// Transition to a new state, clearing `fail_reason` and optionally
    /// appending a transaction reference.
    async fn set_state(
        &self,
        id: &str,
        version: i32,
        state: WithdrawalState,
        transaction_id: Option<&str>,
    ) -> Result<(), AppError>;

    /// Record a failed attempt: sets `fail_reason`, bumps `attempt_count`,
    /// leaves `state` unchanged.
    async fn set_fail_reason(&self, id: &str, version: i32, reason: &str)
    -> Result<(), AppError>;

    /// Promote a `Deferred` withdrawal to `Pending` once its account has a
    /// wallet address.
    async fn promote_deferred(
        &self,
        id: &str,
        version: i32,
        beneficiary: &str,
    ) -> Result<(), AppError>;

    async fn delete_withdrawal(&self, id: &str) -> Result<(), AppError>;

    /// Bulk delete on pool teardown. Returns the number of removed rows.
    async fn delete_withdrawals_for_pool(&self, pool_address: &str) -> Result<u64, AppError>;

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), AppError>;

    /// Finalize a transaction record with its hash, receipt fields or
    /// failure reason.
    async fn update_transaction(&self, record: &TransactionRecord) -> Result<(), AppError>;

    async fn get_transaction(&self, id: &str) -> Result<Option<TransactionRecord>, AppError>;

    async fn list_transactions(&self, ids: &[String]) -> Result<Vec<TransactionRecord>, AppError>;

    /// Failure reasons over a set of transaction records, ordered by
    /// creation time.
    async fn find_fail_reasons(&self, ids: &[String]) -> Result<Vec<String>, AppError>;

    async fn insert_reward(&self, reward: &Reward) -> Result<(), AppError>;

    async fn get_reward(&self, id: &str) -> Result<Option<Reward>, AppError>;

    /// Registered wallet address of an account, if any.
    async fn get_wallet(&self, sub: &str) -> Result<Option<String>, AppError>;

    async fn set_wallet(&self, sub: &str, address: &str) -> Result<(), AppError>;
}

/// Result of a successful on-chain withdrawal proposal.
#[derive(Debug, Clone)]
pub struct ProposalOutcome {
    /// Poll index emitted by the pool's creation event
    pub withdrawal_id: u64,
    /// Persisted transaction record id
    pub transaction_id: String,
}

/// State-changing and read-only calls against asset pool contracts.
///
/// The implementation owns the per-network admin signer; no other component
/// signs transactions.
#[async_trait]
pub trait PoolClient: Send + Sync {
    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Submit the pool's propose-withdraw (or claim) call and decode the
    /// created withdrawal id from the emitted event.
    async fn propose_withdrawal(
        &self,
        withdrawal: &Withdrawal,
        beneficiary: &str,
        amount: U256,
    ) -> Result<ProposalOutcome, AppError>;

    /// Submit the finalize call for a previously proposed withdrawal.
    /// Returns the persisted transaction record id.
    async fn withdraw_poll_finalize(&self, withdrawal: &Withdrawal) -> Result<String, AppError>;
}

/// Current gas price data for a network.
#[async_trait]
pub trait GasOracle: Send + Sync {
    /// Applicable max fee per gas in wei.
    async fn max_fee_per_gas(&self, chain_id: u64) -> Result<u128, AppError>;
}
