//! Reward claim and give entry points.
//!
//! Thin producers of withdrawal scheduling requests; the transaction queue
//! does the on-chain work.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, CreateRewardRequest, DatabaseError, Reward, Store, Withdrawal, WithdrawalType,
    parse_base_units, parse_token_amount,
};

use super::withdrawal_service::{ScheduleParams, WithdrawalService};

pub struct RewardService {
    store: Arc<dyn Store>,
    withdrawals: Arc<WithdrawalService>,
}

impl RewardService {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, withdrawals: Arc<WithdrawalService>) -> Self {
        Self { store, withdrawals }
    }

    /// Create a reward definition on a pool.
    #[instrument(skip(self, request), fields(pool = %pool_address))]
    pub async fn create(
        &self,
        pool_address: &str,
        chain_id: u64,
        request: &CreateRewardRequest,
    ) -> Result<Reward, AppError> {
        let amount = parse_token_amount(&request.amount)?;
        let reward = Reward {
            id: Uuid::new_v4().to_string(),
            pool_address: pool_address.to_string(),
            chain_id,
            amount: amount.to_string(),
            withdraw_duration: request.withdraw_duration,
            title: request.title.clone(),
            created_at: Utc::now(),
        };
        self.store.insert_reward(&reward).await?;
        info!(id = %reward.id, "Reward created");
        Ok(reward)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<Reward>, AppError> {
        self.store.get_reward(id).await
    }

    /// Claim a reward for the calling account. The withdrawal starts
    /// `Deferred` when the account has no registered wallet.
    #[instrument(skip(self))]
    pub async fn claim(&self, reward_id: &str, sub: &str) -> Result<Withdrawal, AppError> {
        let reward = self.require(reward_id).await?;
        let unlock_date =
            (reward.withdraw_duration > 0).then(|| Utc::now() + Duration::seconds(reward.withdraw_duration));

        self.withdrawals
            .schedule(ScheduleParams {
                withdrawal_type: WithdrawalType::ClaimReward,
                sub: sub.to_string(),
                pool_address: reward.pool_address.clone(),
                chain_id: reward.chain_id,
                amount: parse_base_units(&reward.amount)?,
                beneficiary: None,
                unlock_date,
                reward_id: Some(reward.id),
            })
            .await
    }

    /// Give a reward to a member address directly.
    #[instrument(skip(self))]
    pub async fn give(&self, reward_id: &str, member: &str) -> Result<Withdrawal, AppError> {
        let reward = self.require(reward_id).await?;
        let unlock_date =
            (reward.withdraw_duration > 0).then(|| Utc::now() + Duration::seconds(reward.withdraw_duration));

        self.withdrawals
            .schedule(ScheduleParams {
                withdrawal_type: WithdrawalType::ClaimRewardFor,
                sub: member.to_string(),
                pool_address: reward.pool_address.clone(),
                chain_id: reward.chain_id,
                amount: parse_base_units(&reward.amount)?,
                beneficiary: Some(member.to_string()),
                unlock_date,
                reward_id: Some(reward.id),
            })
            .await
    }

    async fn require(&self, id: &str) -> Result<Reward, AppError> {
        self.store
            .get_reward(id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))
    }
}
