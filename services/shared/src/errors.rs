//! Error vocabulary shared by the lottery crates
//!
//! Library errors are converted into a [`ServiceError`] before they leave the
//! engine. Codes read `<CATEGORY>_<SPECIFIC>` and never change once published.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse error class, also used as a metric label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Rejected input: bad block, stake or plan parameters
    Validation,

    /// Valid request the current lottery state refuses
    State,

    /// Balance too low; detected under the user lock, so the transaction rolls back
    InsufficientFunds,

    /// Lost a race or a lock wait; safe to retry
    Conflict,

    NotFound,

    /// Store, cache or programming failure
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "Validation",
            ErrorCategory::State => "State",
            ErrorCategory::InsufficientFunds => "InsufficientFunds",
            ErrorCategory::Conflict => "Conflict",
            ErrorCategory::NotFound => "NotFound",
            ErrorCategory::Internal => "Internal",
        }
    }
}

/// Standard error codes used across all services
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorCode(pub &'static str);

impl ErrorCode {
    // Validation errors
    pub const VALIDATION_INVALID_BLOCK: ErrorCode = ErrorCode("VALIDATION_INVALID_BLOCK");
    pub const VALIDATION_INVALID_AMOUNT: ErrorCode = ErrorCode("VALIDATION_INVALID_AMOUNT");
    pub const VALIDATION_INVALID_PLAN: ErrorCode = ErrorCode("VALIDATION_INVALID_PLAN");
    pub const VALIDATION_ROUND_LIMIT: ErrorCode = ErrorCode("VALIDATION_ROUND_LIMIT");

    // Funds errors
    pub const INSUFFICIENT_FUNDS_BALANCE: ErrorCode = ErrorCode("INSUFFICIENT_FUNDS_BALANCE");

    // State errors
    pub const STATE_BETTING_PAUSED: ErrorCode = ErrorCode("STATE_BETTING_PAUSED");
    pub const STATE_NO_ACTIVE_ROUND: ErrorCode = ErrorCode("STATE_NO_ACTIVE_ROUND");
    pub const STATE_PLAN_NOT_ACTIVE: ErrorCode = ErrorCode("STATE_PLAN_NOT_ACTIVE");
    pub const STATE_NO_ROUNDS_REMAINING: ErrorCode = ErrorCode("STATE_NO_ROUNDS_REMAINING");

    // Conflict errors
    pub const CONFLICT_TRANSACTION: ErrorCode = ErrorCode("CONFLICT_TRANSACTION");

    // Internal errors
    pub const INTERNAL_UNEXPECTED: ErrorCode = ErrorCode("INTERNAL_UNEXPECTED");
    pub const INTERNAL_DATABASE_QUERY: ErrorCode = ErrorCode("INTERNAL_DATABASE_QUERY");
    pub const INTERNAL_CACHE: ErrorCode = ErrorCode("INTERNAL_CACHE");

    // Resource errors
    pub const NOT_FOUND_USER: ErrorCode = ErrorCode("NOT_FOUND_USER");
    pub const NOT_FOUND_ROUND: ErrorCode = ErrorCode("NOT_FOUND_ROUND");
    pub const NOT_FOUND_PLAN: ErrorCode = ErrorCode("NOT_FOUND_PLAN");
    pub const NOT_FOUND_BET: ErrorCode = ErrorCode("NOT_FOUND_BET");

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Standardized error structure handed to collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,

    /// Optional additional context (e.g. required vs available balance)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ServiceError {
    pub fn new(category: ErrorCategory, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.as_str().to_string(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn insufficient_balance(required: impl fmt::Display, available: impl fmt::Display) -> Self {
        Self::new(
            ErrorCategory::InsufficientFunds,
            ErrorCode::INSUFFICIENT_FUNDS_BALANCE,
            "Insufficient balance",
        )
        .with_context(format!("required: {}, available: {}", required, available))
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "[{}] {}: {}", self.code, self.message, context)
        } else {
            write!(f, "[{}] {}", self.code, self.message)
        }
    }
}

impl std::error::Error for ServiceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_labels() {
        assert_eq!(ErrorCategory::State.as_str(), "State");
        let json = serde_json::to_string(&ErrorCategory::NotFound).unwrap();
        assert_eq!(json, "\"NOT_FOUND\"");
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            ErrorCode::STATE_BETTING_PAUSED.to_string(),
            "STATE_BETTING_PAUSED"
        );
    }

    #[test]
    fn test_insufficient_balance_context() {
        let error = ServiceError::insufficient_balance(5_000, 1_200);
        assert_eq!(error.category, ErrorCategory::InsufficientFunds);
        assert_eq!(error.code, "INSUFFICIENT_FUNDS_BALANCE");
        assert!(error.to_string().contains("required: 5000, available: 1200"));
    }

    #[test]
    fn test_error_serialization() {
        let error = ServiceError::new(
            ErrorCategory::NotFound,
            ErrorCode::NOT_FOUND_PLAN,
            "Plan not found: abc-123",
        );
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("NOT_FOUND_PLAN"));
        assert!(json.contains("NOT_FOUND"));
        assert!(!json.contains("context"));
    }
}
