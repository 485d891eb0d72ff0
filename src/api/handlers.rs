//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use validator::Validate;

use crate::app::{AppState, ScheduleParams};
use crate::domain::{
    AppError, ChainError, CreateRewardRequest, DatabaseError, ErrorDetail, ErrorResponse,
    GiveRewardRequest, GuardError, HealthResponse, HealthStatus, Paginated, RateLimitResponse,
    RegisterWalletRequest, Reward, ScheduleWithdrawalRequest, TransactionRecord, ValidationError,
    Withdrawal, WithdrawalQuery, WithdrawalType, parse_token_amount,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Asset Pool Relayer API",
        version = "0.1.0",
        description = "API for scheduling and tracking asset-pool withdrawals on EVM networks",
        license(name = "MIT")
    ),
    paths(
        schedule_withdrawal_handler,
        list_withdrawals_handler,
        get_withdrawal_handler,
        finalize_withdrawal_handler,
        delete_withdrawal_handler,
        create_reward_handler,
        get_reward_handler,
        claim_reward_handler,
        give_reward_handler,
        register_wallet_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            Withdrawal,
            WithdrawalDetail,
            TransactionRecord,
            Reward,
            ScheduleWithdrawalRequest,
            CreateRewardRequest,
            GiveRewardRequest,
            RegisterWalletRequest,
            WithdrawalQuery,
            Paginated<Withdrawal>,
            crate::domain::WithdrawalState,
            crate::domain::WithdrawalType,
            crate::domain::TransactionStatus,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
            RateLimitResponse,
        )
    ),
    tags(
        (name = "withdrawals", description = "Withdrawal lifecycle endpoints"),
        (name = "rewards", description = "Reward claim and give endpoints"),
        (name = "accounts", description = "Account wallet registry"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// A withdrawal with its transaction records resolved.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WithdrawalDetail {
    #[serde(flatten)]
    pub withdrawal: Withdrawal,
    /// Resolved transaction records, oldest first
    pub resolved_transactions: Vec<TransactionRecord>,
}

/// Pool scope extracted from request headers; the pool address is not part
/// of request bodies.
struct PoolScope {
    pool_address: String,
    chain_id: u64,
}

fn pool_scope(headers: &HeaderMap) -> Result<PoolScope, AppError> {
    let pool_address = headers
        .get("X-PoolAddress")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::Validation(ValidationError::InvalidField {
                field: "X-PoolAddress".to_string(),
                message: "Pool address header is required".to_string(),
            })
        })?
        .to_string();
    let chain_id = headers
        .get("X-ChainId")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| {
            AppError::Validation(ValidationError::InvalidField {
                field: "X-ChainId".to_string(),
                message: "Chain id header is required".to_string(),
            })
        })?;
    Ok(PoolScope {
        pool_address,
        chain_id,
    })
}

fn account_sub(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("X-Account")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::Validation(ValidationError::InvalidField {
                field: "X-Account".to_string(),
                message: "Account header is required".to_string(),
            })
        })
}

/// Schedule a manual withdrawal proposal
///
/// Creates the withdrawal document and signals the transaction queue. The
/// on-chain proposal happens asynchronously; `withdrawal_id` is unset until
/// the queue submits it. Poll `GET /withdrawals/{id}` to observe progress;
/// a populated `fail_reason` on a still-pending item signals retry in
/// progress.
#[utoipa::path(
    post,
    path = "/withdrawals",
    tag = "withdrawals",
    request_body = ScheduleWithdrawalRequest,
    params(
        ("X-PoolAddress" = String, Header, description = "Pool contract address"),
        ("X-ChainId" = u64, Header, description = "EVM chain id")
    ),
    responses(
        (status = 201, description = "Withdrawal scheduled", body = Withdrawal),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn schedule_withdrawal_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ScheduleWithdrawalRequest>,
) -> Result<(StatusCode, Json<Withdrawal>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let scope = pool_scope(&headers)?;
    let sub = account_sub(&headers).unwrap_or_else(|_| payload.member.clone());
    let amount = parse_token_amount(&payload.amount)?;

    let withdrawal = state
        .withdrawals
        .schedule(ScheduleParams {
            withdrawal_type: WithdrawalType::ProposeWithdraw,
            sub,
            pool_address: scope.pool_address,
            chain_id: scope.chain_id,
            amount,
            beneficiary: Some(payload.member),
            unlock_date: payload.withdraw_unlock_date,
            reward_id: None,
        })
        .await?;

    state.trigger_queue();
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

/// List withdrawals for a pool with pagination
#[utoipa::path(
    get,
    path = "/withdrawals",
    tag = "withdrawals",
    params(
        ("X-PoolAddress" = String, Header, description = "Pool contract address"),
        ("member" = Option<String>, Query, description = "Filter by beneficiary address"),
        ("reward_id" = Option<String>, Query, description = "Filter by originating reward"),
        ("state" = Option<String>, Query, description = "Filter by lifecycle state"),
        ("page" = Option<u32>, Query, description = "1-based page number (default: 1)"),
        ("limit" = Option<u32>, Query, description = "Page size (1-100, default: 10)")
    ),
    responses(
        (status = 200, description = "Page of withdrawals", body = Paginated<Withdrawal>),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_withdrawals_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WithdrawalQuery>,
) -> Result<Json<Paginated<Withdrawal>>, AppError> {
    query
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let scope = pool_scope(&headers)?;
    let page = state.withdrawals.find(&scope.pool_address, &query).await?;
    Ok(Json(page))
}

/// Get a single withdrawal with resolved transactions
#[utoipa::path(
    get,
    path = "/withdrawals/{id}",
    tag = "withdrawals",
    params(("id" = String, Path, description = "Withdrawal ID")),
    responses(
        (status = 200, description = "Withdrawal found", body = WithdrawalDetail),
        (status = 404, description = "Withdrawal not found", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_withdrawal_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WithdrawalDetail>, AppError> {
    let (withdrawal, resolved_transactions) = state
        .withdrawals
        .get_with_transactions(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    Ok(Json(WithdrawalDetail {
        withdrawal,
        resolved_transactions,
    }))
}

/// Finalize a withdrawal poll
///
/// Rejected with 403 while `unlock_date` has not passed; finalizing an
/// already-withdrawn item is rejected without a duplicate submission.
#[utoipa::path(
    post,
    path = "/withdrawals/{id}/withdraw",
    tag = "withdrawals",
    params(("id" = String, Path, description = "Withdrawal ID")),
    responses(
        (status = 200, description = "Withdrawal finalized", body = Withdrawal),
        (status = 403, description = "Unlock date not reached", body = ErrorResponse),
        (status = 404, description = "Withdrawal not found", body = ErrorResponse),
        (status = 409, description = "Not in a finalizable state", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
        (status = 503, description = "Chain unavailable", body = ErrorResponse)
    )
)]
pub async fn finalize_withdrawal_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Withdrawal>, AppError> {
    let withdrawal = state
        .withdrawals
        .get(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    let updated = state.withdrawals.withdraw(&withdrawal).await?;
    Ok(Json(updated))
}

/// Delete a withdrawal
///
/// Only permitted before the on-chain proposal was submitted.
#[utoipa::path(
    delete,
    path = "/withdrawals/{id}",
    tag = "withdrawals",
    params(("id" = String, Path, description = "Withdrawal ID")),
    responses(
        (status = 204, description = "Withdrawal deleted"),
        (status = 404, description = "Withdrawal not found", body = ErrorResponse),
        (status = 409, description = "Already submitted on-chain", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse)
    )
)]
pub async fn delete_withdrawal_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.withdrawals.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create a reward definition
#[utoipa::path(
    post,
    path = "/rewards",
    tag = "rewards",
    request_body = CreateRewardRequest,
    params(
        ("X-PoolAddress" = String, Header, description = "Pool contract address"),
        ("X-ChainId" = u64, Header, description = "EVM chain id")
    ),
    responses(
        (status = 201, description = "Reward created", body = Reward),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse)
    )
)]
pub async fn create_reward_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateRewardRequest>,
) -> Result<(StatusCode, Json<Reward>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let scope = pool_scope(&headers)?;
    let reward = state
        .rewards
        .create(&scope.pool_address, scope.chain_id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(reward)))
}

/// Get a reward definition
#[utoipa::path(
    get,
    path = "/rewards/{id}",
    tag = "rewards",
    params(("id" = String, Path, description = "Reward ID")),
    responses(
        (status = 200, description = "Reward found", body = Reward),
        (status = 404, description = "Reward not found", body = ErrorResponse)
    )
)]
pub async fn get_reward_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Reward>, AppError> {
    let reward = state
        .rewards
        .get(&id)
        .await?
        .ok_or(AppError::Database(DatabaseError::NotFound(id)))?;
    Ok(Json(reward))
}

/// Claim a reward for the calling account
///
/// Schedules a `claim_reward` withdrawal and signals the queue. The
/// withdrawal starts `deferred` when the account has no registered wallet
/// address yet and is promoted automatically once one is registered.
#[utoipa::path(
    post,
    path = "/rewards/{id}/claim",
    tag = "rewards",
    params(
        ("id" = String, Path, description = "Reward ID"),
        ("X-Account" = String, Header, description = "Calling account sub")
    ),
    responses(
        (status = 201, description = "Withdrawal scheduled", body = Withdrawal),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Reward not found", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse)
    )
)]
pub async fn claim_reward_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Withdrawal>), AppError> {
    let sub = account_sub(&headers)?;
    let withdrawal = state.rewards.claim(&id, &sub).await?;
    state.trigger_queue();
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

/// Give a reward to a member
#[utoipa::path(
    post,
    path = "/rewards/{id}/give",
    tag = "rewards",
    request_body = GiveRewardRequest,
    params(("id" = String, Path, description = "Reward ID")),
    responses(
        (status = 201, description = "Withdrawal scheduled", body = Withdrawal),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Reward not found", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse)
    )
)]
pub async fn give_reward_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<GiveRewardRequest>,
) -> Result<(StatusCode, Json<Withdrawal>), AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let withdrawal = state.rewards.give(&id, &payload.member).await?;
    state.trigger_queue();
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

/// Register an account's wallet address
///
/// Deferred withdrawals owned by the account are promoted to pending on the
/// next queue pass.
#[utoipa::path(
    patch,
    path = "/accounts/{sub}/wallet",
    tag = "accounts",
    request_body = RegisterWalletRequest,
    params(("sub" = String, Path, description = "Account sub")),
    responses(
        (status = 204, description = "Wallet registered"),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = RateLimitResponse)
    )
)]
pub async fn register_wallet_handler(
    State(state): State<Arc<AppState>>,
    Path(sub): Path<String>,
    Json(payload): Json<RegisterWalletRequest>,
) -> Result<StatusCode, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    state.store.set_wallet(&sub, &payload.address).await?;
    state.trigger_queue();
    Ok(StatusCode::NO_CONTENT)
}

/// Detailed health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Health status", body = HealthResponse))
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.health().await)
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses((status = 200, description = "Application is alive"))
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.health().await.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                DatabaseError::Conflict(_) => {
                    (StatusCode::CONFLICT, "conflict", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::Chain(chain_err) => match chain_err {
                ChainError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "chain_error",
                    self.to_string(),
                ),
                ChainError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                ChainError::MaxFeePerGasExceeded { .. } => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "max_fee_per_gas_exceeded",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "chain_error",
                    self.to_string(),
                ),
            },
            AppError::Guard(guard_err) => match guard_err {
                GuardError::UnlockDateNotReached { .. } | GuardError::DeferredSubmission(_) => {
                    (StatusCode::FORBIDDEN, "guard_error", self.to_string())
                }
                _ => (StatusCode::CONFLICT, "guard_error", self.to_string()),
            },
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "configuration_error",
                self.to_string(),
            ),
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                self.to_string(),
            ),
        };

        if status.is_server_error() {
            error!(error_type = %error_type, message = %message, "Server error");
        }

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
