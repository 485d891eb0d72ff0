//! Integration tests for the API.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use asset_pool_relayer::api::create_router;
use asset_pool_relayer::app::AppState;
use asset_pool_relayer::domain::{
    HealthResponse, HealthStatus, NewWithdrawal, Paginated, Reward, Store, Withdrawal,
    WithdrawalState, WithdrawalType,
};
use asset_pool_relayer::test_utils::{MockPoolClient, MockStore};

const POOL: &str = "0x278Ff6d33826D906070eE938CDc9788003749e93";
const MEMBER: &str = "0x9c8A56d1A06BE74a9d74B29cCd2f94192B4Ba15b";
const CHAIN_ID: &str = "31337";

fn create_test_state() -> (Arc<AppState>, Arc<MockStore>, Arc<MockPoolClient>) {
    let store = Arc::new(MockStore::new());
    let pool_client = Arc::new(MockPoolClient::new());
    let state = Arc::new(AppState::new(
        store.clone() as _,
        pool_client.clone() as _,
    ));
    (state, store, pool_client)
}

fn schedule_request(member: &str, amount: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/withdrawals")
        .header("Content-Type", "application/json")
        .header("X-PoolAddress", POOL)
        .header("X-ChainId", CHAIN_ID)
        .body(Body::from(
            json!({"member": member, "amount": amount}).to_string(),
        ))
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// A pending withdrawal already proposed on-chain, seeded directly in the
/// store.
async fn seed_submitted(
    store: &MockStore,
    unlock_date: Option<chrono::DateTime<Utc>>,
) -> Withdrawal {
    let withdrawal = store
        .insert_withdrawal(&NewWithdrawal {
            withdrawal_type: WithdrawalType::ProposeWithdraw,
            sub: MEMBER.to_string(),
            pool_address: POOL.to_string(),
            chain_id: 31337,
            reward_id: None,
            beneficiary: Some(MEMBER.to_string()),
            amount: "1000000000000000000".to_string(),
            unlock_date,
            state: WithdrawalState::Pending,
        })
        .await
        .unwrap();
    store
        .record_proposal(&withdrawal.id, withdrawal.version, 7, "tx_seed")
        .await
        .unwrap();
    store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_schedule_withdrawal_success() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let response = router.oneshot(schedule_request(MEMBER, "2.5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let withdrawal: Withdrawal = body_json(response).await;
    assert_eq!(withdrawal.state, WithdrawalState::Pending);
    assert_eq!(withdrawal.beneficiary.as_deref(), Some(MEMBER));
    // 2.5 tokens in 18-decimal base units
    assert_eq!(withdrawal.amount, "2500000000000000000");
    assert!(withdrawal.withdrawal_id.is_none());
    assert!(withdrawal.fail_reason.is_none());
}

#[tokio::test]
async fn test_schedule_withdrawal_accepts_numeric_amount() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/withdrawals")
        .header("Content-Type", "application/json")
        .header("X-PoolAddress", POOL)
        .header("X-ChainId", CHAIN_ID)
        .body(Body::from(
            json!({"member": MEMBER, "amount": 2.5}).to_string(),
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let withdrawal: Withdrawal = body_json(response).await;
    assert_eq!(withdrawal.amount, "2500000000000000000");
}

#[tokio::test]
async fn test_schedule_withdrawal_requires_pool_header() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/withdrawals")
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({"member": MEMBER, "amount": "1"}).to_string(),
        ))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_schedule_withdrawal_rejects_bad_amounts() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    for amount in ["", "abc", "0"] {
        let response = router
            .clone()
            .oneshot(schedule_request(MEMBER, amount))
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "amount {amount:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_list_withdrawals_pagination() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(schedule_request(MEMBER, "1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let request = Request::builder()
        .uri("/withdrawals?page=1&limit=2")
        .header("X-PoolAddress", POOL)
        .header("X-ChainId", CHAIN_ID)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page: Paginated<Withdrawal> = body_json(response).await;
    assert_eq!(page.results.len(), 2);
    assert_eq!(page.total, 3);
    assert_eq!(page.previous, None);
    assert_eq!(page.next, Some(2));

    let request = Request::builder()
        .uri("/withdrawals?page=2&limit=2")
        .header("X-PoolAddress", POOL)
        .header("X-ChainId", CHAIN_ID)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let page: Paginated<Withdrawal> = body_json(response).await;
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.previous, Some(1));
    assert_eq!(page.next, None);
}

#[tokio::test]
async fn test_list_withdrawals_member_filter() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let other = "0x0000000000000000000000000000000000000001";
    for member in [MEMBER, MEMBER, other] {
        router
            .clone()
            .oneshot(schedule_request(member, "1"))
            .await
            .unwrap();
    }

    let request = Request::builder()
        .uri(format!("/withdrawals?member={MEMBER}"))
        .header("X-PoolAddress", POOL)
        .header("X-ChainId", CHAIN_ID)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let page: Paginated<Withdrawal> = body_json(response).await;
    assert_eq!(page.total, 2);
    assert!(
        page.results
            .iter()
            .all(|w| w.beneficiary.as_deref() == Some(MEMBER))
    );
}

#[tokio::test]
async fn test_get_withdrawal_not_found() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let request = Request::builder()
        .uri("/withdrawals/nonexistent")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_withdrawal_with_transactions() {
    let (state, store, _) = create_test_state();
    let router = create_router(state);

    let withdrawal = seed_submitted(&store, None).await;

    let request = Request::builder()
        .uri(format!("/withdrawals/{}", withdrawal.id))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail: serde_json::Value = body_json(response).await;
    assert_eq!(detail["id"], withdrawal.id.as_str());
    assert_eq!(detail["withdrawal_id"], 7);
}

#[tokio::test]
async fn test_finalize_before_unlock_is_forbidden() {
    let (state, store, _) = create_test_state();
    let router = create_router(state);

    let unlock = Utc::now() + Duration::hours(1);
    let withdrawal = seed_submitted(&store, Some(unlock)).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/withdrawals/{}/withdraw", withdrawal.id))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // No state change and no finalize call happened.
    let after = store.get_withdrawal(&withdrawal.id).await.unwrap().unwrap();
    assert_eq!(after.state, WithdrawalState::Pending);
}

#[tokio::test]
async fn test_finalize_unsubmitted_is_conflict() {
    let (state, _, _) = create_test_state();
    let router = create_router(state.clone());

    let response = router
        .clone()
        .oneshot(schedule_request(MEMBER, "1"))
        .await
        .unwrap();
    let withdrawal: Withdrawal = body_json(response).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/withdrawals/{}/withdraw", withdrawal.id))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_finalize_is_exactly_once() {
    let (state, store, pool_client) = create_test_state();
    let router = create_router(state);

    let withdrawal = seed_submitted(&store, None).await;

    let request = |id: &str| {
        Request::builder()
            .method("POST")
            .uri(format!("/withdrawals/{id}/withdraw"))
            .body(Body::empty())
            .unwrap()
    };

    let response = router.clone().oneshot(request(&withdrawal.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let finalized: Withdrawal = body_json(response).await;
    assert_eq!(finalized.state, WithdrawalState::Withdrawn);

    // Second finalize is rejected without another on-chain call.
    let response = router.oneshot(request(&withdrawal.id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(pool_client.finalized().len(), 1);
}

#[tokio::test]
async fn test_delete_withdrawal_guards() {
    let (state, store, _) = create_test_state();
    let router = create_router(state);

    // Pre-submission delete is allowed.
    let response = router
        .clone()
        .oneshot(schedule_request(MEMBER, "1"))
        .await
        .unwrap();
    let unsubmitted: Withdrawal = body_json(response).await;
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/withdrawals/{}", unsubmitted.id))
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Once the proposal landed on-chain the document is immutable.
    let submitted = seed_submitted(&store, None).await;
    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/withdrawals/{}", submitted.id))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(
        store
            .get_withdrawal(&submitted.id)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_reward_create_and_claim() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/rewards")
        .header("Content-Type", "application/json")
        .header("X-PoolAddress", POOL)
        .header("X-ChainId", CHAIN_ID)
        .body(Body::from(
            json!({"amount": "10", "withdrawDuration": 3600, "title": "Season 1"}).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let reward: Reward = body_json(response).await;
    assert_eq!(reward.amount, "10000000000000000000");

    // Register the claimant's wallet first so the claim goes straight to
    // pending.
    let request = Request::builder()
        .method("PATCH")
        .uri("/accounts/account-1/wallet")
        .header("Content-Type", "application/json")
        .body(Body::from(json!({"address": MEMBER}).to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/rewards/{}/claim", reward.id))
        .header("X-Account", "account-1")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let withdrawal: Withdrawal = body_json(response).await;
    assert_eq!(withdrawal.withdrawal_type, WithdrawalType::ClaimReward);
    assert_eq!(withdrawal.state, WithdrawalState::Pending);
    assert_eq!(withdrawal.beneficiary.as_deref(), Some(MEMBER));
    assert_eq!(withdrawal.reward_id.as_deref(), Some(reward.id.as_str()));
    // withdraw_duration > 0 sets an unlock date in the future
    assert!(withdrawal.unlock_date.unwrap() > Utc::now());
}

#[tokio::test]
async fn test_claim_without_wallet_defers() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/rewards")
        .header("Content-Type", "application/json")
        .header("X-PoolAddress", POOL)
        .header("X-ChainId", CHAIN_ID)
        .body(Body::from(
            json!({"amount": "5", "withdrawDuration": 0}).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let reward: Reward = body_json(response).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/rewards/{}/claim", reward.id))
        .header("X-Account", "no-wallet-yet")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let withdrawal: Withdrawal = body_json(response).await;
    assert_eq!(withdrawal.state, WithdrawalState::Deferred);
    assert!(withdrawal.beneficiary.is_none());
}

#[tokio::test]
async fn test_give_reward_to_member() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/rewards")
        .header("Content-Type", "application/json")
        .header("X-PoolAddress", POOL)
        .header("X-ChainId", CHAIN_ID)
        .body(Body::from(
            json!({"amount": "1", "withdrawDuration": 0}).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let reward: Reward = body_json(response).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/rewards/{}/give", reward.id))
        .header("Content-Type", "application/json")
        .body(Body::from(json!({"member": MEMBER}).to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let withdrawal: Withdrawal = body_json(response).await;
    assert_eq!(withdrawal.withdrawal_type, WithdrawalType::ClaimRewardFor);
    assert_eq!(withdrawal.state, WithdrawalState::Pending);
    assert_eq!(withdrawal.beneficiary.as_deref(), Some(MEMBER));
}

#[tokio::test]
async fn test_claim_missing_reward_is_not_found() {
    let (state, _, _) = create_test_state();
    let router = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/rewards/missing/claim")
        .header("X-Account", "account-1")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoints() {
    let (state, store, _) = create_test_state();
    let router = create_router(state);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = body_json(response).await;
    assert_eq!(health.status, HealthStatus::Healthy);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health/live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    store.set_healthy(false);
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health/ready")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
