//! Router construction and rate limiting.

use std::env;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, QuantaClock},
    state::{InMemoryState, NotKeyed},
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;
use crate::domain::{ErrorDetail, RateLimitResponse};

use super::handlers::{
    ApiDoc, claim_reward_handler, create_reward_handler, delete_withdrawal_handler,
    finalize_withdrawal_handler, get_reward_handler, get_withdrawal_handler, give_reward_handler,
    health_check_handler, list_withdrawals_handler, liveness_handler, readiness_handler,
    register_wallet_handler, schedule_withdrawal_handler,
};

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 20,
            burst_size: 40,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            requests_per_second: env::var("RATE_LIMIT_RPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.requests_per_second),
            burst_size: env::var("RATE_LIMIT_BURST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.burst_size),
        }
    }
}

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, QuantaClock>>;

async fn rate_limit_middleware(
    limiter: SharedRateLimiter,
    request: Request,
    next: Next,
) -> Response {
    match limiter.check() {
        Ok(()) => next.run(request).await,
        Err(not_until) => {
            let clock = QuantaClock::default();
            let retry_after = not_until.wait_time_from(clock.now()).as_secs().max(1);
            let body = Json(RateLimitResponse {
                error: ErrorDetail {
                    r#type: "rate_limited".to_string(),
                    message: "Rate limit exceeded".to_string(),
                },
                retry_after,
            });
            (StatusCode::TOO_MANY_REQUESTS, body).into_response()
        }
    }
}

fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/withdrawals", post(schedule_withdrawal_handler))
        .route("/withdrawals", get(list_withdrawals_handler))
        .route("/withdrawals/{id}", get(get_withdrawal_handler))
        .route("/withdrawals/{id}", delete(delete_withdrawal_handler))
        .route(
            "/withdrawals/{id}/withdraw",
            post(finalize_withdrawal_handler),
        )
        .route("/rewards", post(create_reward_handler))
        .route("/rewards/{id}", get(get_reward_handler))
        .route("/rewards/{id}/claim", post(claim_reward_handler))
        .route("/rewards/{id}/give", post(give_reward_handler))
        .route("/accounts/{sub}/wallet", patch(register_wallet_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    routes(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

/// Create the application router with a global rate limit applied
pub fn create_router_with_rate_limit(state: Arc<AppState>, config: RateLimitConfig) -> Router {
    let quota = Quota::per_second(
        NonZeroU32::new(config.requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN),
    )
    .allow_burst(NonZeroU32::new(config.burst_size.max(1)).unwrap_or(NonZeroU32::MIN));
    let limiter: SharedRateLimiter = Arc::new(RateLimiter::direct(quota));

    routes(state)
        .layer(middleware::from_fn(move |request: Request, next: Next| {
            let limiter = Arc::clone(&limiter);
            async move { rate_limit_middleware(limiter, request, next).await }
        }))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}
