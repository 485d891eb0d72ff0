//! Error hierarchy shared across all layers.

use thiserror::Error;

/// Coarse classification carried by every error so the scheduler and
/// monitoring can tell recoverable conditions apart from terminal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected at the API boundary, never reached the core
    Validation,
    /// State-machine guard violation, no mutation performed
    Guard,
    /// Recoverable, retried on the next scheduler pass
    Transient,
    /// Gas price above the configured ceiling, re-evaluated every pass
    Ceiling,
    /// Contract revert; recorded but retried identically to transient
    Permanent,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Guard => "guard",
            Self::Transient => "transient",
            Self::Ceiling => "ceiling",
            Self::Permanent => "permanent",
            Self::Unknown => "unknown",
        }
    }
}

/// Database layer errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database query error: {0}")]
    Query(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Compare-and-swap miss: another writer bumped the version first
    #[error("Concurrent update conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(err.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::Connection(err.to_string()),
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Blockchain layer errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC connection error: {0}")]
    Connection(String),

    #[error("Transaction timed out: {0}")]
    Timeout(String),

    #[error("MaxFeePerGasExceededError: current fee {current} wei exceeds ceiling {max} wei")]
    MaxFeePerGasExceeded { current: u128, max: u128 },

    #[error("Nonce conflict: {0}")]
    NonceConflict(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Call encoding error: {0}")]
    Encoding(String),

    #[error("Unknown network: chain id {0}")]
    UnknownNetwork(u64),
}

/// State-machine guard violations. Rejected synchronously with no state
/// mutation and no transaction attempt.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Withdrawal is not unlocked until {unlock_date}")]
    UnlockDateNotReached { unlock_date: chrono::DateTime<chrono::Utc> },

    #[error("Invalid withdrawal state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Withdrawal {0} was already submitted on-chain")]
    AlreadySubmitted(String),

    #[error("Withdrawal {0} is already withdrawn")]
    AlreadyWithdrawn(String),

    #[error("Deferred withdrawal {0} must not be submitted on-chain")]
    DeferredSubmission(String),
}

/// Request validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Classify the error for retry policy and monitoring.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Guard(_) => ErrorKind::Guard,
            Self::Chain(ChainError::MaxFeePerGasExceeded { .. }) => ErrorKind::Ceiling,
            Self::Chain(ChainError::Reverted(_)) => ErrorKind::Permanent,
            Self::Chain(_) => ErrorKind::Transient,
            Self::Database(DatabaseError::Connection(_) | DatabaseError::Conflict(_)) => {
                ErrorKind::Transient
            }
            Self::Database(_) | Self::Config(_) | Self::NotSupported(_) | Self::Internal(_) => {
                ErrorKind::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_breach_is_distinctly_classified() {
        let err = AppError::Chain(ChainError::MaxFeePerGasExceeded {
            current: 120_000_000_000,
            max: 100_000_000_000,
        });
        assert_eq!(err.kind(), ErrorKind::Ceiling);
        assert!(err.to_string().contains("MaxFeePerGasExceededError"));
    }

    #[test]
    fn test_revert_is_permanent_but_rpc_is_transient() {
        let revert = AppError::Chain(ChainError::Reverted("withdrawal already finalized".into()));
        assert_eq!(revert.kind(), ErrorKind::Permanent);

        let rpc = AppError::Chain(ChainError::Timeout("no receipt after 120s".into()));
        assert_eq!(rpc.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_guard_errors_carry_guard_kind() {
        let err = AppError::Guard(GuardError::UnlockDateNotReached {
            unlock_date: chrono::Utc::now(),
        });
        assert_eq!(err.kind(), ErrorKind::Guard);
    }

    #[test]
    fn test_cas_conflict_is_transient() {
        let err = AppError::Database(DatabaseError::Conflict("version 3 expected".into()));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
