//! Queue scheduler behavior against the in-memory mocks.

use std::sync::Arc;

use alloy::primitives::U256;
use chrono::Utc;

use asset_pool_relayer::app::{
    RetryPolicy, ScheduleParams, SchedulerConfig, TransactionScheduler, WithdrawalService,
};
use asset_pool_relayer::domain::{
    Store, TransactionRecord, TransactionStatus, Withdrawal, WithdrawalState, WithdrawalType,
};
use asset_pool_relayer::test_utils::{MockGasOracle, MockPoolClient, MockStore};

const POOL: &str = "0x278Ff6d33826D906070eE938CDc9788003749e93";
const MEMBER: &str = "0x9c8A56d1A06BE74a9d74B29cCd2f94192B4Ba15b";

struct Harness {
    store: Arc<MockStore>,
    pool_client: Arc<MockPoolClient>,
    gas_oracle: Arc<MockGasOracle>,
    service: Arc<WithdrawalService>,
    scheduler: Arc<TransactionScheduler>,
}

fn harness(config: SchedulerConfig) -> Harness {
    let store = Arc::new(MockStore::new());
    let pool_client = Arc::new(MockPoolClient::new());
    let gas_oracle = Arc::new(MockGasOracle::default());
    let service = Arc::new(WithdrawalService::new(
        store.clone() as _,
        pool_client.clone() as _,
    ));
    let scheduler = Arc::new(TransactionScheduler::new(
        store.clone() as _,
        Arc::clone(&service),
        gas_oracle.clone() as _,
        config,
    ));
    Harness {
        store,
        pool_client,
        gas_oracle,
        service,
        scheduler,
    }
}

async fn schedule(
    harness: &Harness,
    chain_id: u64,
    beneficiary: Option<&str>,
    sub: &str,
) -> Withdrawal {
    harness
        .service
        .schedule(ScheduleParams {
            withdrawal_type: WithdrawalType::ProposeWithdraw,
            sub: sub.to_string(),
            pool_address: POOL.to_string(),
            chain_id,
            amount: U256::from(1_000_000_000_000_000_000u64),
            beneficiary: beneficiary.map(str::to_owned),
            unlock_date: None,
            reward_id: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_pass_submits_fifo_per_network() {
    let h = harness(SchedulerConfig::default());

    let mut scheduled = Vec::new();
    for _ in 0..5 {
        scheduled.push(schedule(&h, 1, Some(MEMBER), "acct").await);
        // Distinct created_at values so FIFO order is observable
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.processed, 5);
    assert_eq!(outcome.failed, 0);

    // Proposals went out oldest-first.
    let expected: Vec<String> = scheduled.iter().map(|w| w.id.clone()).collect();
    assert_eq!(h.pool_client.proposed(), expected);

    // On-chain ids were assigned in creation order, exactly once each.
    for (i, w) in scheduled.iter().enumerate() {
        let after = h.store.get_withdrawal(&w.id).await.unwrap().unwrap();
        assert_eq!(after.withdrawal_id, Some(i as u64 + 1));
        assert_eq!(after.state, WithdrawalState::Pending);
    }

    // A second pass finds nothing left to submit.
    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.processed, 0);
    assert_eq!(h.pool_client.proposed().len(), 5);
}

#[tokio::test]
async fn test_pass_covers_all_networks() {
    let h = harness(SchedulerConfig::default());

    schedule(&h, 1, Some(MEMBER), "acct").await;
    schedule(&h, 137, Some(MEMBER), "acct").await;
    schedule(&h, 42161, Some(MEMBER), "acct").await;

    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.processed, 3);
    assert_eq!(h.pool_client.proposed().len(), 3);
}

#[tokio::test]
async fn test_gas_spike_defers_and_recovers() {
    let config = SchedulerConfig {
        max_fee_per_gas: 100_000_000_000,
        ..Default::default()
    };
    let h = harness(config);
    let withdrawal = schedule(&h, 1, Some(MEMBER), "acct").await;

    // Fee above the ceiling: nothing is submitted, the reason is recorded.
    h.gas_oracle.set_fee(150_000_000_000);
    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.processed, 0);
    assert_eq!(outcome.failed, 1);
    assert!(h.pool_client.proposed().is_empty());

    let after = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(after.state, WithdrawalState::Pending);
    assert!(after.withdrawal_id.is_none());
    let reason = after.fail_reason.unwrap();
    assert!(
        reason.contains("MaxFeePerGasExceededError"),
        "unexpected reason: {reason}"
    );
    assert_eq!(after.attempt_count, 1);

    // Fee back under the ceiling: the same item goes through and the
    // failure is cleared.
    h.gas_oracle.set_fee(50_000_000_000);
    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.processed, 1);

    let after = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(after.withdrawal_id, Some(1));
    assert!(after.fail_reason.is_none());
}

#[tokio::test]
async fn test_transient_failure_retries_next_pass() {
    let h = harness(SchedulerConfig::default());
    let withdrawal = schedule(&h, 1, Some(MEMBER), "acct").await;

    h.pool_client.fail_next(1);
    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.failed, 1);

    let after = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(after.state, WithdrawalState::Pending);
    assert!(after.fail_reason.is_some());
    assert_eq!(after.attempt_count, 1);

    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.processed, 1);
    let after = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert!(after.fail_reason.is_none());
    assert_eq!(after.withdrawal_id, Some(1));
}

#[tokio::test]
async fn test_retry_policy_caps_attempts() {
    let config = SchedulerConfig {
        retry_policy: RetryPolicy::limited(2),
        ..Default::default()
    };
    let h = harness(config);
    let withdrawal = schedule(&h, 1, Some(MEMBER), "acct").await;

    h.pool_client.fail_next(10);
    for _ in 0..2 {
        let outcome = h.scheduler.run_pass().await.unwrap();
        assert_eq!(outcome.failed, 1);
    }

    // Attempts exhausted; the item is skipped from here on.
    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.failed, 0);

    let after = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(after.attempt_count, 2);
    assert!(after.withdrawal_id.is_none());
}

#[tokio::test]
async fn test_deferred_promotion_requires_wallet() {
    let h = harness(SchedulerConfig::default());

    let withdrawal = schedule(&h, 1, None, "acct-deferred").await;
    assert_eq!(withdrawal.state, WithdrawalState::Deferred);

    // No wallet yet: never submitted, never assigned an on-chain id.
    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.promoted, 0);
    assert_eq!(outcome.processed, 0);
    let after = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(after.state, WithdrawalState::Deferred);
    assert!(after.withdrawal_id.is_none());

    // Wallet registered: promoted and submitted on the same pass.
    h.store.set_wallet("acct-deferred", MEMBER).await.unwrap();
    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.promoted, 1);
    assert_eq!(outcome.processed, 1);

    let after = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(after.state, WithdrawalState::Pending);
    assert_eq!(after.beneficiary.as_deref(), Some(MEMBER));
    assert_eq!(after.withdrawal_id, Some(1));
}

#[tokio::test]
async fn test_rejected_withdrawal_leaves_the_queue() {
    let h = harness(SchedulerConfig::default());

    let withdrawal = schedule(&h, 1, Some(MEMBER), "acct").await;
    let rejected = h.service.reject(&withdrawal.id).await.unwrap();
    assert_eq!(rejected.state, WithdrawalState::Rejected);

    // A rejected item is never picked up by a pass.
    let outcome = h.scheduler.run_pass().await.unwrap();
    assert_eq!(outcome.processed, 0);
    assert!(h.pool_client.proposed().is_empty());

    // And cannot be rejected twice.
    assert!(h.service.reject(&withdrawal.id).await.is_err());
}

#[tokio::test]
async fn test_concurrent_finalize_submits_once() {
    let h = harness(SchedulerConfig::default());

    let withdrawal = schedule(&h, 1, Some(MEMBER), "acct").await;
    h.scheduler.run_pass().await.unwrap();
    let submitted = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();

    // Both callers hold the same snapshot; only one may reach the chain.
    let (first, second) = tokio::join!(
        h.service.withdraw(&submitted),
        h.service.withdraw(&submitted)
    );
    assert!(first.is_ok() != second.is_ok());
    assert_eq!(h.pool_client.finalized().len(), 1);

    let after = h.store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(after.state, WithdrawalState::Withdrawn);
}

#[tokio::test]
async fn test_pending_balance_sums_non_terminal_amounts() {
    let h = harness(SchedulerConfig::default());

    let first = schedule(&h, 1, Some(MEMBER), "acct").await;
    schedule(&h, 1, Some(MEMBER), "acct").await;
    schedule(&h, 1, Some(MEMBER), "acct").await;
    h.service.reject(&first.id).await.unwrap();

    // Two pending withdrawals of 1 token each; the rejected one is excluded.
    let balance = h.service.get_pending_balance(POOL, MEMBER).await.unwrap();
    assert_eq!(balance, U256::from(2_000_000_000_000_000_000u64));

    let other = h
        .service
        .get_pending_balance(POOL, "0x0000000000000000000000000000000000000001")
        .await
        .unwrap();
    assert_eq!(other, U256::ZERO);
}

#[tokio::test]
async fn test_remove_all_for_pool_scopes_to_pool() {
    const OTHER_POOL: &str = "0x1111111111111111111111111111111111111111";

    let h = harness(SchedulerConfig::default());
    schedule(&h, 1, Some(MEMBER), "acct").await;
    schedule(&h, 1, Some(MEMBER), "acct").await;
    schedule(&h, 1, Some(MEMBER), "acct").await;
    h.service
        .schedule(ScheduleParams {
            withdrawal_type: WithdrawalType::ProposeWithdraw,
            sub: "acct".to_string(),
            pool_address: OTHER_POOL.to_string(),
            chain_id: 1,
            amount: U256::from(1_000_000_000_000_000_000u64),
            beneficiary: Some(MEMBER.to_string()),
            unlock_date: None,
            reward_id: None,
        })
        .await
        .unwrap();

    let removed = h.service.remove_all_for_pool(POOL).await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(h.service.count_by_pool(POOL).await.unwrap(), 0);
    assert_eq!(h.service.count_by_pool(OTHER_POOL).await.unwrap(), 1);
}

#[tokio::test]
async fn test_transaction_records_and_fail_reasons() {
    let store = MockStore::new();

    let mined = TransactionRecord {
        id: "rec-1".to_string(),
        withdrawal_ref: None,
        to_address: Some(MEMBER.to_string()),
        call_data: "0x".to_string(),
        chain_id: 1,
        nonce: 0,
        max_fee_per_gas: Some("30000000000".to_string()),
        tx_hash: Some("0xabc".to_string()),
        block_number: Some(10),
        gas_used: Some("21000".to_string()),
        status: TransactionStatus::Mined,
        fail_reason: None,
        created_at: Utc::now(),
    };
    let failed = TransactionRecord {
        id: "rec-2".to_string(),
        tx_hash: None,
        block_number: None,
        gas_used: None,
        status: TransactionStatus::Failed,
        fail_reason: Some("transaction reverted".to_string()),
        ..mined.clone()
    };
    store.insert_transaction(&mined).await.unwrap();
    store.insert_transaction(&failed).await.unwrap();

    let fetched = store.get_transaction("rec-1").await.unwrap().unwrap();
    assert_eq!(fetched.status, TransactionStatus::Mined);

    // Only failed records contribute a reason.
    let reasons = store
        .find_fail_reasons(&["rec-1".to_string(), "rec-2".to_string()])
        .await
        .unwrap();
    assert_eq!(reasons, vec!["transaction reverted".to_string()]);
}
