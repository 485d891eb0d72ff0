//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use alloy::primitives::U256;

use crate::domain::{
    AppError, ChainError, DatabaseError, GasOracle, NewWithdrawal, Paginated, PoolClient,
    ProposalOutcome, Reward, Store, TransactionRecord, Withdrawal, WithdrawalQuery,
    WithdrawalState,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// In-memory store with the same versioning semantics as the Postgres
/// implementation: state writes compare the caller's version and bump it.
pub struct MockStore {
    withdrawals: Mutex<HashMap<String, Withdrawal>>,
    transactions: Mutex<HashMap<String, TransactionRecord>>,
    rewards: Mutex<HashMap<String, Reward>>,
    wallets: Mutex<HashMap<String, String>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            withdrawals: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            rewards: Mutex::new(HashMap::new()),
            wallets: Mutex::new(HashMap::new()),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Get all stored withdrawals (for testing)
    pub fn get_all_withdrawals(&self) -> Vec<Withdrawal> {
        self.withdrawals.lock().unwrap().values().cloned().collect()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(DatabaseError::Query(msg)));
        }
        Ok(())
    }

    /// Apply a versioned update; Conflict when the version moved.
    fn versioned_update(
        &self,
        id: &str,
        version: i32,
        apply: impl FnOnce(&mut Withdrawal) -> Result<(), AppError>,
    ) -> Result<(), AppError> {
        let mut withdrawals = self.withdrawals.lock().unwrap();
        let item = withdrawals.get_mut(id).ok_or_else(|| {
            AppError::Database(DatabaseError::NotFound(format!(
                "withdrawal {id} not found"
            )))
        })?;
        if item.version != version {
            return Err(AppError::Database(DatabaseError::Conflict(format!(
                "withdrawal {id} changed since version {version}"
            ))));
        }
        apply(item)?;
        item.version += 1;
        item.updated_at = Utc::now();
        Ok(())
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MockStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(DatabaseError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn insert_withdrawal(&self, data: &NewWithdrawal) -> Result<Withdrawal, AppError> {
        self.check_should_fail()?;
        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: Uuid::new_v4().to_string(),
            withdrawal_type: data.withdrawal_type,
            sub: data.sub.clone(),
            pool_address: data.pool_address.clone(),
            chain_id: data.chain_id,
            reward_id: data.reward_id.clone(),
            beneficiary: data.beneficiary.clone(),
            amount: data.amount.clone(),
            unlock_date: data.unlock_date,
            state: data.state,
            withdrawal_id: None,
            fail_reason: None,
            attempt_count: 0,
            version: 0,
            transactions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.withdrawals
            .lock()
            .unwrap()
            .insert(withdrawal.id.clone(), withdrawal.clone());
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, AppError> {
        self.check_should_fail()?;
        Ok(self.withdrawals.lock().unwrap().get(id).cloned())
    }

    async fn find_withdrawals(
        &self,
        pool_address: &str,
        query: &WithdrawalQuery,
    ) -> Result<Paginated<Withdrawal>, AppError> {
        self.check_should_fail()?;
        let withdrawals = self.withdrawals.lock().unwrap();
        let mut items: Vec<Withdrawal> = withdrawals
            .values()
            .filter(|w| w.pool_address == pool_address)
            .filter(|w| {
                query
                    .member
                    .as_ref()
                    .is_none_or(|m| w.beneficiary.as_deref() == Some(m.as_str()))
            })
            .filter(|w| {
                query
                    .reward_id
                    .as_ref()
                    .is_none_or(|r| w.reward_id.as_deref() == Some(r.as_str()))
            })
            .filter(|w| query.state.is_none_or(|s| w.state == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = items.len() as u64;
        let offset = (query.page.saturating_sub(1) as usize) * query.limit as usize;
        let results: Vec<Withdrawal> = items
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .collect();
        Ok(Paginated::new(results, total, query.page, query.limit))
    }

    async fn count_by_pool(&self, pool_address: &str) -> Result<u64, AppError> {
        self.check_should_fail()?;
        let withdrawals = self.withdrawals.lock().unwrap();
        Ok(withdrawals
            .values()
            .filter(|w| w.pool_address == pool_address)
            .count() as u64)
    }

    async fn pending_amounts(
        &self,
        pool_address: &str,
        beneficiary: &str,
    ) -> Result<Vec<String>, AppError> {
        self.check_should_fail()?;
        let withdrawals = self.withdrawals.lock().unwrap();
        Ok(withdrawals
            .values()
            .filter(|w| {
                w.pool_address == pool_address
                    && w.beneficiary.as_deref() == Some(beneficiary)
                    && matches!(w.state, WithdrawalState::Pending | WithdrawalState::Deferred)
            })
            .map(|w| w.amount.clone())
            .collect())
    }

    async fn list_processable(&self, limit: i64) -> Result<Vec<Withdrawal>, AppError> {
        self.check_should_fail()?;
        let withdrawals = self.withdrawals.lock().unwrap();
        let mut items: Vec<Withdrawal> = withdrawals
            .values()
            .filter(|w| w.state == WithdrawalState::Pending && w.withdrawal_id.is_none())
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items.into_iter().take(limit as usize).collect())
    }

    async fn list_deferred(&self, limit: i64) -> Result<Vec<Withdrawal>, AppError> {
        self.check_should_fail()?;
        let withdrawals = self.withdrawals.lock().unwrap();
        let mut items: Vec<Withdrawal> = withdrawals
            .values()
            .filter(|w| w.state == WithdrawalState::Deferred)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items.into_iter().take(limit as usize).collect())
    }

    async fn record_proposal(
        &self,
        id: &str,
        version: i32,
        withdrawal_id: u64,
        transaction_id: &str,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.versioned_update(id, version, |item| {
            if item.withdrawal_id.is_some() {
                return Err(AppError::Database(DatabaseError::Conflict(format!(
                    "withdrawal {id} already has an on-chain id"
                ))));
            }
            item.withdrawal_id = Some(withdrawal_id);
            item.fail_reason = None;
            item.transactions.push(transaction_id.to_string());
            Ok(())
        })
    }

    async fn set_state(
        &self,
        id: &str,
        version: i32,
        state: WithdrawalState,
        transaction_id: Option<&str>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.versioned_update(id, version, |item| {
            item.state = state;
            item.fail_reason = None;
            if let Some(transaction_id) = transaction_id {
                item.transactions.push(transaction_id.to_string());
            }
            Ok(())
        })
    }

    async fn set_fail_reason(
        &self,
        id: &str,
        version: i32,
        reason: &str,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.versioned_update(id, version, |item| {
            item.fail_reason = Some(reason.to_string());
            item.attempt_count += 1;
            Ok(())
        })
    }

    async fn promote_deferred(
        &self,
        id: &str,
        version: i32,
        beneficiary: &str,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.versioned_update(id, version, |item| {
            if item.state != WithdrawalState::Deferred {
                return Err(AppError::Database(DatabaseError::Conflict(format!(
                    "withdrawal {id} is no longer deferred"
                ))));
            }
            item.state = WithdrawalState::Pending;
            item.beneficiary = Some(beneficiary.to_string());
            Ok(())
        })
    }

    async fn delete_withdrawal(&self, id: &str) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.withdrawals
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!(
                    "withdrawal {id} not found"
                )))
            })
    }

    async fn delete_withdrawals_for_pool(&self, pool_address: &str) -> Result<u64, AppError> {
        self.check_should_fail()?;
        let mut withdrawals = self.withdrawals.lock().unwrap();
        let before = withdrawals.len();
        withdrawals.retain(|_, w| w.pool_address != pool_address);
        Ok((before - withdrawals.len()) as u64)
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.transactions
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_transaction(&self, record: &TransactionRecord) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut transactions = self.transactions.lock().unwrap();
        if !transactions.contains_key(&record.id) {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "transaction {} not found",
                record.id
            ))));
        }
        transactions.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> Result<Option<TransactionRecord>, AppError> {
        self.check_should_fail()?;
        Ok(self.transactions.lock().unwrap().get(id).cloned())
    }

    async fn list_transactions(&self, ids: &[String]) -> Result<Vec<TransactionRecord>, AppError> {
        self.check_should_fail()?;
        let transactions = self.transactions.lock().unwrap();
        let mut items: Vec<TransactionRecord> = ids
            .iter()
            .filter_map(|id| transactions.get(id).cloned())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    async fn find_fail_reasons(&self, ids: &[String]) -> Result<Vec<String>, AppError> {
        self.check_should_fail()?;
        let transactions = self.transactions.lock().unwrap();
        let mut items: Vec<&TransactionRecord> = ids
            .iter()
            .filter_map(|id| transactions.get(id))
            .filter(|t| t.fail_reason.is_some())
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items
            .into_iter()
            .filter_map(|t| t.fail_reason.clone())
            .collect())
    }

    async fn insert_reward(&self, reward: &Reward) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.rewards
            .lock()
            .unwrap()
            .insert(reward.id.clone(), reward.clone());
        Ok(())
    }

    async fn get_reward(&self, id: &str) -> Result<Option<Reward>, AppError> {
        self.check_should_fail()?;
        Ok(self.rewards.lock().unwrap().get(id).cloned())
    }

    async fn get_wallet(&self, sub: &str) -> Result<Option<String>, AppError> {
        self.check_should_fail()?;
        Ok(self.wallets.lock().unwrap().get(sub).cloned())
    }

    async fn set_wallet(&self, sub: &str, address: &str) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.wallets
            .lock()
            .unwrap()
            .insert(sub.to_string(), address.to_string());
        Ok(())
    }
}

/// Mock pool client assigning sequential on-chain withdrawal ids
pub struct MockPoolClient {
    config: MockConfig,
    next_withdrawal_id: AtomicU64,
    /// Remaining calls that fail before succeeding again
    fail_times: AtomicU32,
    proposals: Mutex<Vec<String>>,
    finalizations: Mutex<Vec<String>>,
    is_healthy: AtomicBool,
}

impl MockPoolClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            next_withdrawal_id: AtomicU64::new(1),
            fail_times: AtomicU32::new(0),
            proposals: Mutex::new(Vec::new()),
            finalizations: Mutex::new(Vec::new()),
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Fail the next `n` calls with a transient RPC error, then recover.
    pub fn fail_next(&self, n: u32) {
        self.fail_times.store(n, Ordering::Relaxed);
    }

    /// Withdrawal ids passed to propose, in call order (for testing)
    pub fn proposed(&self) -> Vec<String> {
        self.proposals.lock().unwrap().clone()
    }

    /// Withdrawal ids passed to finalize, in call order (for testing)
    pub fn finalized(&self) -> Vec<String> {
        self.finalizations.lock().unwrap().clone()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Chain(ChainError::Rpc(msg)));
        }
        if self
            .fail_times
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                n.checked_sub(1)
            })
            .is_ok()
        {
            return Err(AppError::Chain(ChainError::Rpc(
                "Injected transient failure".to_string(),
            )));
        }
        Ok(())
    }
}

impl Default for MockPoolClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PoolClient for MockPoolClient {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Chain(ChainError::Connection(
                "Unhealthy".to_string(),
            )));
        }
        self.check_should_fail()
    }

    async fn propose_withdrawal(
        &self,
        withdrawal: &Withdrawal,
        _beneficiary: &str,
        _amount: U256,
    ) -> Result<ProposalOutcome, AppError> {
        self.check_should_fail()?;
        let withdrawal_id = self.next_withdrawal_id.fetch_add(1, Ordering::SeqCst);
        self.proposals.lock().unwrap().push(withdrawal.id.clone());
        Ok(ProposalOutcome {
            withdrawal_id,
            transaction_id: format!("tx_{}", Uuid::new_v4()),
        })
    }

    async fn withdraw_poll_finalize(&self, withdrawal: &Withdrawal) -> Result<String, AppError> {
        self.check_should_fail()?;
        self.finalizations
            .lock()
            .unwrap()
            .push(withdrawal.id.clone());
        Ok(format!("tx_{}", Uuid::new_v4()))
    }
}

/// Mock gas oracle with a settable fee
pub struct MockGasOracle {
    fee: Mutex<u128>,
}

impl MockGasOracle {
    #[must_use]
    pub fn new(fee: u128) -> Self {
        Self {
            fee: Mutex::new(fee),
        }
    }

    pub fn set_fee(&self, fee: u128) {
        *self.fee.lock().unwrap() = fee;
    }
}

impl Default for MockGasOracle {
    fn default() -> Self {
        // Well under the default ceiling
        Self::new(30_000_000_000)
    }
}

#[async_trait]
impl GasOracle for MockGasOracle {
    async fn max_fee_per_gas(&self, _chain_id: u64) -> Result<u128, AppError> {
        Ok(*self.fee.lock().unwrap())
    }
}
