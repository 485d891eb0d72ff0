//! Application state management.

use std::sync::Arc;

use crate::domain::{HealthResponse, HealthStatus, PoolClient, Store};

use super::reward_service::RewardService;
use super::scheduler::SchedulerHandle;
use super::withdrawal_service::WithdrawalService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub withdrawals: Arc<WithdrawalService>,
    pub rewards: Arc<RewardService>,
    pub store: Arc<dyn Store>,
    pub pool_client: Arc<dyn PoolClient>,
    /// Trigger handle for the background queue; absent in router-only tests
    pub scheduler: Option<SchedulerHandle>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, pool_client: Arc<dyn PoolClient>) -> Self {
        let withdrawals = Arc::new(WithdrawalService::new(
            Arc::clone(&store),
            Arc::clone(&pool_client),
        ));
        let rewards = Arc::new(RewardService::new(
            Arc::clone(&store),
            Arc::clone(&withdrawals),
        ));
        Self {
            withdrawals,
            rewards,
            store,
            pool_client,
            scheduler: None,
        }
    }

    /// Attach the queue trigger handle (builder pattern)
    #[must_use]
    pub fn with_scheduler(mut self, handle: SchedulerHandle) -> Self {
        self.scheduler = Some(handle);
        self
    }

    /// Signal the queue to run immediately after a schedule/claim/give call.
    pub fn trigger_queue(&self) {
        if let Some(handle) = &self.scheduler {
            handle.run_now();
        }
    }

    /// Perform health check on all dependencies
    pub async fn health(&self) -> HealthResponse {
        let database = match self.store.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        let chain = match self.pool_client.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy,
        };
        HealthResponse::new(database, chain)
    }
}
