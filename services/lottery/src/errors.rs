use shared::{ErrorCategory, ErrorCode, KyatAmount, ServiceError, ValidationError};
use uuid::Uuid;

/// Postgres SQLSTATE codes that mean "lost a race, retry is safe"
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, thiserror::Error)]
pub enum LotteryError {
    #[error("Invalid input: {0}")]
    InvalidValue(#[from] ValidationError),

    #[error("Invalid auto-bet plan: {0}")]
    InvalidPlan(String),

    #[error("Round limit exceeded: {0}")]
    RoundLimit(String),

    #[error("Betting is paused")]
    BettingPaused,

    #[error("No active round")]
    NoActiveRound,

    #[error("Auto-bet plan {0} is not active")]
    PlanNotActive(Uuid),

    #[error("Auto-bet plan {0} has no rounds remaining")]
    NoRoundsRemaining(Uuid),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: KyatAmount,
        available: KyatAmount,
    },

    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Round {0} not found")]
    RoundNotFound(i64),

    #[error("Auto-bet plan {0} not found")]
    PlanNotFound(Uuid),

    #[error("Bet {0} not found")]
    BetNotFound(Uuid),

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for LotteryError {
    fn from(error: sqlx::Error) -> Self {
        let conflict_code = error
            .as_database_error()
            .and_then(|db| db.code())
            .filter(|code| {
                matches!(
                    &**code,
                    SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE | UNIQUE_VIOLATION
                )
            })
            .map(|code| code.into_owned());

        match conflict_code {
            Some(code) => LotteryError::Conflict(format!("SQLSTATE {}: {}", code, error)),
            None => LotteryError::Database(error),
        }
    }
}

impl LotteryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LotteryError::InvalidValue(_)
            | LotteryError::InvalidPlan(_)
            | LotteryError::RoundLimit(_) => ErrorCategory::Validation,
            LotteryError::InsufficientBalance { .. } => ErrorCategory::InsufficientFunds,
            LotteryError::BettingPaused
            | LotteryError::NoActiveRound
            | LotteryError::PlanNotActive(_)
            | LotteryError::NoRoundsRemaining(_) => ErrorCategory::State,
            LotteryError::UserNotFound(_)
            | LotteryError::RoundNotFound(_)
            | LotteryError::PlanNotFound(_)
            | LotteryError::BetNotFound(_) => ErrorCategory::NotFound,
            LotteryError::Conflict(_) => ErrorCategory::Conflict,
            LotteryError::Database(_) | LotteryError::Redis(_) | LotteryError::Internal(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            LotteryError::InvalidValue(ValidationError::BlockOutOfRange { .. }) => {
                ErrorCode::VALIDATION_INVALID_BLOCK
            }
            LotteryError::InvalidValue(_) => ErrorCode::VALIDATION_INVALID_AMOUNT,
            LotteryError::InvalidPlan(_) => ErrorCode::VALIDATION_INVALID_PLAN,
            LotteryError::RoundLimit(_) => ErrorCode::VALIDATION_ROUND_LIMIT,
            LotteryError::InsufficientBalance { .. } => ErrorCode::INSUFFICIENT_FUNDS_BALANCE,
            LotteryError::BettingPaused => ErrorCode::STATE_BETTING_PAUSED,
            LotteryError::NoActiveRound => ErrorCode::STATE_NO_ACTIVE_ROUND,
            LotteryError::PlanNotActive(_) => ErrorCode::STATE_PLAN_NOT_ACTIVE,
            LotteryError::NoRoundsRemaining(_) => ErrorCode::STATE_NO_ROUNDS_REMAINING,
            LotteryError::UserNotFound(_) => ErrorCode::NOT_FOUND_USER,
            LotteryError::RoundNotFound(_) => ErrorCode::NOT_FOUND_ROUND,
            LotteryError::PlanNotFound(_) => ErrorCode::NOT_FOUND_PLAN,
            LotteryError::BetNotFound(_) => ErrorCode::NOT_FOUND_BET,
            LotteryError::Conflict(_) => ErrorCode::CONFLICT_TRANSACTION,
            LotteryError::Database(_) => ErrorCode::INTERNAL_DATABASE_QUERY,
            LotteryError::Redis(_) => ErrorCode::INTERNAL_CACHE,
            LotteryError::Internal(_) => ErrorCode::INTERNAL_UNEXPECTED,
        }
    }

    /// Whether the whole operation may simply be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, LotteryError::Conflict(_))
    }

    /// Standardized form handed to the API layer and bots
    pub fn to_service_error(&self) -> ServiceError {
        let category = self.category();
        match self {
            LotteryError::InsufficientBalance { required, available } => {
                ServiceError::insufficient_balance(required, available)
            }
            // Internal details stay in the logs
            LotteryError::Database(_) | LotteryError::Redis(_) | LotteryError::Internal(_) => {
                ServiceError::new(category, self.code(), "Internal server error")
            }
            _ => ServiceError::new(category, self.code(), self.to_string()),
        }
    }

    /// Count the error in the `errors_total` metric
    pub fn record(&self) {
        metrics::counter!(
            "errors_total",
            "category" => self.category().as_str(),
            "code" => self.code().as_str()
        )
        .increment(1);
    }
}

pub type Result<T> = std::result::Result<T, LotteryError>;
