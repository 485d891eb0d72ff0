//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ChainError, ConfigError, DatabaseError, ErrorKind, GuardError, ValidationError,
};
pub use traits::{GasOracle, NewWithdrawal, PoolClient, ProposalOutcome, Store};
pub use types::{
    CreateRewardRequest, ErrorDetail, ErrorResponse, GiveRewardRequest, HealthResponse,
    HealthStatus, Paginated, RateLimitResponse, RegisterWalletRequest, Reward,
    ScheduleWithdrawalRequest, TransactionRecord, TransactionStatus, Withdrawal, WithdrawalQuery,
    WithdrawalState, WithdrawalType, format_token_amount, parse_base_units, parse_token_amount,
};
