//! Background transaction queue.
//!
//! Drains withdrawals requiring an on-chain action on a fixed interval and
//! on explicit triggers fired by API handlers. Submissions are processed
//! strictly in creation order within a network; networks run concurrently
//! because nonce assignment is per-network-per-signer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{AppError, ChainError, GasOracle, Store, Withdrawal};

use super::withdrawal_service::WithdrawalService;

/// Explicit retry policy for queue items.
///
/// The default reproduces the original behavior: unlimited retries at the
/// scheduler interval. `max_attempts` caps the number of failed passes
/// after which an item is skipped (left with its `fail_reason`).
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    #[must_use]
    pub fn unlimited() -> Self {
        Self { max_attempts: None }
    }

    #[must_use]
    pub fn limited(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    /// Whether an item with this many failed attempts may be processed.
    #[must_use]
    pub fn allows(&self, attempt_count: i32) -> bool {
        match self.max_attempts {
            Some(max) => attempt_count < max as i32,
            None => true,
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed pass interval
    pub interval: Duration,
    /// Maximum withdrawals loaded per pass
    pub batch_size: i64,
    /// Gas price ceiling in wei; items are deferred, not overpaid
    pub max_fee_per_gas: u128,
    pub retry_policy: RetryPolicy,
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 50,
            // 250 gwei; overridden by MAX_FEE_PER_GAS in production
            max_fee_per_gas: 250_000_000_000,
            retry_policy: RetryPolicy::unlimited(),
            enabled: true,
        }
    }
}

/// Outcome of one queue pass. Individual item failures are data, not batch
/// failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Deferred withdrawals promoted to pending
    pub promoted: usize,
    /// Items submitted successfully
    pub processed: usize,
    /// Items that recorded a `fail_reason` this pass
    pub failed: usize,
    /// Items skipped by the retry policy
    pub skipped: usize,
}

pub struct TransactionScheduler {
    store: Arc<dyn Store>,
    service: Arc<WithdrawalService>,
    gas_oracle: Arc<dyn GasOracle>,
    config: SchedulerConfig,
}

impl TransactionScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        service: Arc<WithdrawalService>,
        gas_oracle: Arc<dyn GasOracle>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            service,
            gas_oracle,
            config,
        }
    }

    /// Run one full queue pass: promote due deferred items, then drain
    /// pending submissions network by network.
    #[instrument(skip(self))]
    pub async fn run_pass(self: &Arc<Self>) -> Result<BatchOutcome, AppError> {
        let mut outcome = BatchOutcome {
            promoted: self.promote_deferred().await?,
            ..Default::default()
        };

        let pending = self.store.list_processable(self.config.batch_size).await?;
        if pending.is_empty() {
            return Ok(outcome);
        }

        // FIFO within each network, concurrency only across networks.
        let mut by_network: BTreeMap<u64, Vec<Withdrawal>> = BTreeMap::new();
        for withdrawal in pending {
            by_network
                .entry(withdrawal.chain_id)
                .or_default()
                .push(withdrawal);
        }

        let mut tasks = JoinSet::new();
        for (chain_id, items) in by_network {
            let scheduler = Arc::clone(self);
            tasks.spawn(async move { scheduler.process_network(chain_id, items).await });
        }
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(network_outcome) => {
                    outcome.processed += network_outcome.processed;
                    outcome.failed += network_outcome.failed;
                    outcome.skipped += network_outcome.skipped;
                }
                Err(e) => error!(error = %e, "Network drain task panicked"),
            }
        }

        info!(
            promoted = %outcome.promoted,
            processed = %outcome.processed,
            failed = %outcome.failed,
            skipped = %outcome.skipped,
            "Queue pass complete"
        );
        Ok(outcome)
    }

    /// Promote `Deferred` withdrawals whose account acquired a wallet
    /// address since the last pass.
    async fn promote_deferred(self: &Arc<Self>) -> Result<usize, AppError> {
        let deferred = self.store.list_deferred(self.config.batch_size).await?;
        let mut promoted = 0;
        for withdrawal in deferred {
            let Some(address) = self.store.get_wallet(&withdrawal.sub).await? else {
                continue;
            };
            match self
                .store
                .promote_deferred(&withdrawal.id, withdrawal.version, &address)
                .await
            {
                Ok(()) => {
                    info!(id = %withdrawal.id, beneficiary = %address, "Deferred withdrawal promoted");
                    promoted += 1;
                }
                // Lost a CAS race; the item is picked up fresh next pass
                Err(e) => debug!(id = %withdrawal.id, error = %e, "Promotion skipped"),
            }
        }
        Ok(promoted)
    }

    /// Drain one network's items sequentially. A single item's failure
    /// never aborts the batch.
    async fn process_network(&self, chain_id: u64, items: Vec<Withdrawal>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for withdrawal in items {
            if !self.config.retry_policy.allows(withdrawal.attempt_count) {
                debug!(
                    id = %withdrawal.id,
                    attempts = %withdrawal.attempt_count,
                    "Retry policy exhausted, skipping"
                );
                outcome.skipped += 1;
                continue;
            }

            if let Err(e) = self.check_gas_ceiling(chain_id).await {
                warn!(id = %withdrawal.id, kind = %e.kind().as_str(), error = %e, "Submission deferred");
                if let Err(store_err) = self
                    .store
                    .set_fail_reason(&withdrawal.id, withdrawal.version, &e.to_string())
                    .await
                {
                    warn!(id = %withdrawal.id, error = %store_err, "Failed to record fail reason");
                }
                outcome.failed += 1;
                continue;
            }

            // Errors are captured into fail_reason by the service itself.
            match self.service.propose_withdraw(&withdrawal).await {
                Ok(_) => outcome.processed += 1,
                Err(_) => outcome.failed += 1,
            }
        }

        outcome
    }

    /// Reject submission while the current fee exceeds the configured
    /// ceiling. Recoverable; re-evaluated every pass.
    async fn check_gas_ceiling(&self, chain_id: u64) -> Result<(), AppError> {
        let current = self.gas_oracle.max_fee_per_gas(chain_id).await?;
        if current > self.config.max_fee_per_gas {
            return Err(AppError::Chain(ChainError::MaxFeePerGasExceeded {
                current,
                max: self.config.max_fee_per_gas,
            }));
        }
        Ok(())
    }
}

/// Handle for triggering and stopping the background scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    notify: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
}

impl SchedulerHandle {
    /// Request an immediate queue pass (fired after schedule/claim/give).
    pub fn run_now(&self) {
        self.notify.notify_one();
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Spawn the recurring queue task. Returns the join handle and a trigger
/// handle for immediate passes and graceful shutdown.
pub fn spawn_scheduler(
    scheduler: Arc<TransactionScheduler>,
) -> (tokio::task::JoinHandle<()>, SchedulerHandle) {
    let notify = Arc::new(Notify::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = SchedulerHandle {
        notify: Arc::clone(&notify),
        shutdown_tx,
    };

    let interval = scheduler.config.interval;
    let join_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = %interval.as_secs(), "Transaction scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = notify.notified() => {}
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Transaction scheduler shutting down");
                        break;
                    }
                    continue;
                }
            }

            // The batch itself only fails when the queue cannot be read;
            // item-level outcomes are logged inside the pass.
            if let Err(e) = scheduler.run_pass().await {
                error!(error = %e, "Queue pass failed");
            }
        }
    });

    (join_handle, handle)
}
