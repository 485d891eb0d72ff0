//! Domain types with validation support.

use alloy::primitives::{
    U256,
    utils::{ParseUnits, format_units, parse_units},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::error::ValidationError;

/// Token decimals used at the API boundary. Amounts are integer base units
/// everywhere inside the core.
pub const TOKEN_DECIMALS: u8 = 18;

/// Deserialize an amount given either as a JSON string or a JSON number
/// into its decimal string form. Strings are the precision-safe encoding;
/// numbers pass through their literal representation.
fn amount_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => Ok(text),
        Raw::Number(number) => Ok(number.to_string()),
    }
}

/// Parse a human-readable decimal token amount into base units.
/// Rejects zero, negative and malformed values.
pub fn parse_token_amount(amount: &str) -> Result<U256, ValidationError> {
    let parsed = parse_units(amount, TOKEN_DECIMALS)
        .map_err(|e| ValidationError::InvalidAmount(format!("{amount}: {e}")))?;
    let value = match parsed {
        ParseUnits::U256(value) => value,
        ParseUnits::I256(_) => {
            return Err(ValidationError::InvalidAmount(format!(
                "{amount}: amount must be positive"
            )));
        }
    };
    if value.is_zero() {
        return Err(ValidationError::InvalidAmount(format!(
            "{amount}: amount must be greater than 0"
        )));
    }
    Ok(value)
}

/// Format base units back into the decimal representation used by clients.
pub fn format_token_amount(amount: U256) -> String {
    format_units(amount, TOKEN_DECIMALS).unwrap_or_else(|_| amount.to_string())
}

/// Parse a persisted base-unit decimal string back into a `U256`.
pub fn parse_base_units(amount: &str) -> Result<U256, ValidationError> {
    U256::from_str_radix(amount, 10)
        .map_err(|e| ValidationError::InvalidAmount(format!("{amount}: {e}")))
}

/// Lifecycle state of a withdrawal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalState {
    /// Owning account has no registered wallet yet; never submitted on-chain
    Deferred,
    /// Awaiting on-chain proposal and/or poll finalization
    #[default]
    Pending,
    /// Finalized on-chain, funds transferred
    Withdrawn,
    /// Denied by governance
    Rejected,
}

impl WithdrawalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Pending => "pending",
            Self::Withdrawn => "withdrawn",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for WithdrawalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deferred" => Ok(Self::Deferred),
            "pending" => Ok(Self::Pending),
            "withdrawn" => Ok(Self::Withdrawn),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Invalid withdrawal state: {}", s)),
        }
    }
}

impl std::fmt::Display for WithdrawalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Origin of a withdrawal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalType {
    /// Manually proposed value transfer
    ProposeWithdraw,
    /// Account claiming a reward for itself
    ClaimReward,
    /// Reward given to a member by the pool owner
    ClaimRewardFor,
}

impl WithdrawalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProposeWithdraw => "propose_withdraw",
            Self::ClaimReward => "claim_reward",
            Self::ClaimRewardFor => "claim_reward_for",
        }
    }
}

impl std::str::FromStr for WithdrawalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "propose_withdraw" => Ok(Self::ProposeWithdraw),
            "claim_reward" => Ok(Self::ClaimReward),
            "claim_reward_for" => Ok(Self::ClaimRewardFor),
            _ => Err(format!("Invalid withdrawal type: {}", s)),
        }
    }
}

impl std::fmt::Display for WithdrawalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of value transfer pending or completed on a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Withdrawal {
    /// Internal identifier (UUID), stable across the lifecycle
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: String,
    pub withdrawal_type: WithdrawalType,
    /// Owning account reference
    pub sub: String,
    /// Pool contract address
    #[schema(example = "0x278Ff6d33826D906070eE938CDc9788003749e93")]
    pub pool_address: String,
    /// EVM chain id the pool is deployed on
    pub chain_id: u64,
    /// Set when the withdrawal originated from a reward
    pub reward_id: Option<String>,
    /// Destination chain address; None while the account has no wallet
    pub beneficiary: Option<String>,
    /// Token amount in base units (decimal string, integer only)
    #[schema(example = "2500000000000000000")]
    pub amount: String,
    /// Earliest time finalize is permitted
    pub unlock_date: Option<DateTime<Utc>>,
    pub state: WithdrawalState,
    /// On-chain poll index, assigned at most once after a successful proposal
    pub withdrawal_id: Option<u64>,
    /// Last submission error; cleared on success
    pub fail_reason: Option<String>,
    /// Number of failed scheduler passes for this item
    pub attempt_count: i32,
    /// Optimistic-concurrency counter bumped on every state write
    pub version: i32,
    /// Ordered transaction record ids accumulated across attempts
    pub transactions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    /// True once an on-chain proposal succeeded; deletes are forbidden after
    /// this point.
    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.withdrawal_id.is_some()
    }

    /// True while the unlock gate forbids finalization.
    #[must_use]
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.unlock_date.map(|d| now < d).unwrap_or(false)
    }
}

/// Status of one on-chain submission attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Submitted, receipt not yet observed
    #[default]
    Pending,
    /// Receipt observed with success status
    Mined,
    /// Rejected, reverted or timed out
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Mined => "mined",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "mined" => Ok(Self::Mined),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One on-chain submission attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct TransactionRecord {
    pub id: String,
    /// Owning withdrawal, if any (deploys have none)
    pub withdrawal_ref: Option<String>,
    /// Target contract address; None for contract creation
    pub to_address: Option<String>,
    /// Hex-encoded call data
    pub call_data: String,
    pub chain_id: u64,
    /// Nonce used for this attempt; strictly increasing per signer+network
    pub nonce: u64,
    /// Fee cap applied, in wei
    pub max_fee_per_gas: Option<String>,
    pub tx_hash: Option<String>,
    pub block_number: Option<i64>,
    pub gas_used: Option<String>,
    pub status: TransactionStatus,
    pub fail_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reward definition mirrored off-chain; a thin caller of the withdrawal core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Reward {
    pub id: String,
    pub pool_address: String,
    pub chain_id: u64,
    /// Claimable token amount in base units
    pub amount: String,
    /// Seconds added to claim time to form the withdrawal unlock date
    pub withdraw_duration: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to schedule a manual withdrawal proposal
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWithdrawalRequest {
    /// Beneficiary chain address
    #[validate(length(min = 1, message = "Member address is required"))]
    #[schema(example = "0x9c8A56d1A06BE74a9d74B29cCd2f94192B4Ba15b")]
    pub member: String,
    /// Decimal token amount, converted to base units at this boundary.
    /// Accepted as a string or a bare JSON number.
    #[validate(length(min = 1, message = "Amount is required"))]
    #[serde(deserialize_with = "amount_as_string")]
    #[schema(example = "2.5")]
    pub amount: String,
    /// Earliest time finalize is permitted
    pub withdraw_unlock_date: Option<DateTime<Utc>>,
}

/// Request to create a reward definition
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRewardRequest {
    /// Decimal token amount, accepted as a string or a bare JSON number
    #[validate(length(min = 1, message = "Amount is required"))]
    #[serde(deserialize_with = "amount_as_string")]
    #[schema(example = "10")]
    pub amount: String,
    /// Seconds the claimed withdrawal stays locked
    #[validate(range(min = 0, message = "Withdraw duration must not be negative"))]
    pub withdraw_duration: i64,
    pub title: Option<String>,
}

/// Request to give a reward to a member
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GiveRewardRequest {
    #[validate(length(min = 1, message = "Member address is required"))]
    #[schema(example = "0x9c8A56d1A06BE74a9d74B29cCd2f94192B4Ba15b")]
    pub member: String,
}

/// Request to register an account's wallet address
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterWalletRequest {
    #[validate(length(min = 1, message = "Address is required"))]
    #[schema(example = "0x9c8A56d1A06BE74a9d74B29cCd2f94192B4Ba15b")]
    pub address: String,
}

/// Filters and paging for withdrawal list requests
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct WithdrawalQuery {
    /// Filter by beneficiary address
    pub member: Option<String>,
    /// Filter by originating reward
    pub reward_id: Option<String>,
    /// Filter by lifecycle state
    pub state: Option<WithdrawalState>,
    /// 1-based page number
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    #[serde(default = "default_page")]
    #[schema(example = 1)]
    pub page: u32,
    /// Page size (1-100)
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    #[serde(default = "default_limit")]
    #[schema(example = 10)]
    pub limit: u32,
}

impl Default for WithdrawalQuery {
    fn default() -> Self {
        Self {
            member: None,
            reward_id: None,
            state: None,
            page: default_page(),
            limit: default_limit(),
        }
    }
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

/// Page-based pagination wrapper. `previous`/`next` are present only when
/// more pages exist in that direction.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Paginated<T: ToSchema> {
    pub results: Vec<T>,
    /// Total number of matching items across all pages
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<u32>,
}

impl<T: ToSchema> Paginated<T> {
    #[must_use]
    pub fn new(results: Vec<T>, total: u64, page: u32, limit: u32) -> Self {
        let previous = (page > 1).then(|| page - 1);
        let next = (u64::from(page) * u64::from(limit) < total).then(|| page + 1);
        Self {
            results,
            total,
            previous,
            next,
        }
    }

    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            total: 0,
            previous: None,
            next: None,
        }
    }
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub database: HealthStatus,
    pub chain: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(database: HealthStatus, chain: HealthStatus) -> Self {
        let status = match (&database, &chain) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            database,
            chain,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Error type identifier
    #[schema(example = "guard_error")]
    pub r#type: String,
    /// Human-readable error message
    #[schema(example = "Withdrawal is not unlocked until 2026-09-01T00:00:00Z")]
    pub message: String,
}

/// Rate limit exceeded response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RateLimitResponse {
    pub error: ErrorDetail,
    /// Seconds until rate limit resets
    #[schema(example = 60)]
    pub retry_after: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_withdrawal_state_display_and_parsing() {
        let states = vec![
            (WithdrawalState::Deferred, "deferred"),
            (WithdrawalState::Pending, "pending"),
            (WithdrawalState::Withdrawn, "withdrawn"),
            (WithdrawalState::Rejected, "rejected"),
        ];

        for (state, string) in states {
            assert_eq!(state.as_str(), string);
            assert_eq!(state.to_string(), string);
            assert_eq!(WithdrawalState::from_str(string).unwrap(), state);
        }

        assert!(WithdrawalState::from_str("invalid").is_err());
    }

    #[test]
    fn test_withdrawal_type_display_and_parsing() {
        let types = vec![
            (WithdrawalType::ProposeWithdraw, "propose_withdraw"),
            (WithdrawalType::ClaimReward, "claim_reward"),
            (WithdrawalType::ClaimRewardFor, "claim_reward_for"),
        ];

        for (ty, string) in types {
            assert_eq!(ty.as_str(), string);
            assert_eq!(WithdrawalType::from_str(string).unwrap(), ty);
        }
    }

    #[test]
    fn test_parse_token_amount_exact_round_trip() {
        let base = parse_token_amount("2.5").unwrap();
        assert_eq!(base.to_string(), "2500000000000000000");
        assert_eq!(format_token_amount(base), "2.500000000000000000");
        assert_eq!(parse_base_units("2500000000000000000").unwrap(), base);
    }

    #[test]
    fn test_amount_accepts_string_and_number_json() {
        let from_string: ScheduleWithdrawalRequest =
            serde_json::from_value(serde_json::json!({"member": "0xabc", "amount": "2.5"}))
                .unwrap();
        let from_number: ScheduleWithdrawalRequest =
            serde_json::from_value(serde_json::json!({"member": "0xabc", "amount": 2.5}))
                .unwrap();
        assert_eq!(from_string.amount, "2.5");
        assert_eq!(from_number.amount, "2.5");

        let reward: CreateRewardRequest =
            serde_json::from_value(serde_json::json!({"amount": 10, "withdrawDuration": 0}))
                .unwrap();
        assert_eq!(reward.amount, "10");
    }

    #[test]
    fn test_parse_token_amount_rejects_zero_and_malformed() {
        assert!(parse_token_amount("0").is_err());
        assert!(parse_token_amount("-1").is_err());
        assert!(parse_token_amount("abc").is_err());
    }

    #[test]
    fn test_paginated_page_boundaries() {
        // 3 items, limit 2: page 1 has a next, page 2 does not
        let page1 = Paginated::new(vec!["a".to_string(), "b".to_string()], 3, 1, 2);
        assert_eq!(page1.previous, None);
        assert_eq!(page1.next, Some(2));

        let page2 = Paginated::new(vec!["c".to_string()], 3, 2, 2);
        assert_eq!(page2.previous, Some(1));
        assert_eq!(page2.next, None);
    }

    #[test]
    fn test_withdrawal_unlock_gate() {
        let now = Utc::now();
        let withdrawal = Withdrawal {
            id: "w_1".to_string(),
            withdrawal_type: WithdrawalType::ProposeWithdraw,
            sub: "sub_1".to_string(),
            pool_address: "0xpool".to_string(),
            chain_id: 31337,
            reward_id: None,
            beneficiary: Some("0xmember".to_string()),
            amount: "1000".to_string(),
            unlock_date: Some(now + chrono::Duration::hours(1)),
            state: WithdrawalState::Pending,
            withdrawal_id: Some(7),
            fail_reason: None,
            attempt_count: 0,
            version: 0,
            transactions: vec![],
            created_at: now,
            updated_at: now,
        };

        assert!(withdrawal.is_locked(now));
        assert!(!withdrawal.is_locked(now + chrono::Duration::hours(2)));
        assert!(withdrawal.is_submitted());
    }
}
