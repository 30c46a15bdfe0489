//! Domain errors for the cellplane control plane.
//!
//! Every error is classified once at construction: either it is transient
//! (safe to retry) or it is a spec violation that must surface to status and
//! events immediately.

use thiserror::Error;

/// Stable machine-readable error codes, mirrored into status messages and
/// audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Transient,
    Conflict,
    BudgetExceeded,
    ToolError,
    LlmError,
    ProtocolViolation,
    Validation,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Conflict => "conflict",
            Self::BudgetExceeded => "budget_exceeded",
            Self::ToolError => "tool_error",
            Self::LlmError => "llm_error",
            Self::ProtocolViolation => "protocol_violation",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

/// Control-plane errors with retryability baked in.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Network timeouts, bus hiccups, rate limits. Retried by the retry
    /// helper.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A conditional update lost the race on resource_version. Retried; the
    /// next reconcile observes fresh state.
    #[error("conflict: {entity} {id} was modified concurrently")]
    Conflict { entity: String, id: String },

    /// A cell or mission lacks funds. Terminal.
    #[error("insufficient budget: {0}")]
    BudgetExceeded(String),

    /// A user-visible tool failure. Terminal.
    #[error("tool error: {0}")]
    ToolError(String),

    /// Invalid request or auth failure from a model provider. Terminal.
    #[error("llm error: {0}")]
    LlmError(String),

    /// A message was rejected by a protocol state machine. Terminal.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A declared spec failed admission. Terminal.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type ControlResult<T> = Result<T, ControlError>;

impl ControlError {
    /// Whether the retry helper may re-attempt the failed operation.
    ///
    /// Database errors are treated as transient: SQLite lock contention and
    /// pool exhaustion resolve themselves, and genuinely broken statements
    /// exhaust the retry budget quickly.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Conflict { .. } | Self::Database(_)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Transient(_) => ErrorCode::Transient,
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::BudgetExceeded(_) => ErrorCode::BudgetExceeded,
            Self::ToolError(_) => ErrorCode::ToolError,
            Self::LlmError(_) => ErrorCode::LlmError,
            Self::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Database(_) | Self::Serialization(_) => ErrorCode::Internal,
        }
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound { kind: kind.into(), name: name.into() }
    }

    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict { entity: entity.into(), id: id.into() }
    }
}

impl From<sqlx::Error> for ControlError {
    fn from(err: sqlx::Error) -> Self {
        ControlError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        ControlError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ControlError::Transient("timeout".into()).retryable());
        assert!(ControlError::conflict("Cell", "a").retryable());
        assert!(ControlError::Database("locked".into()).retryable());

        assert!(!ControlError::BudgetExceeded("x".into()).retryable());
        assert!(!ControlError::Validation("x".into()).retryable());
        assert!(!ControlError::ProtocolViolation("x".into()).retryable());
        assert!(!ControlError::ToolError("x".into()).retryable());
        assert!(!ControlError::LlmError("x".into()).retryable());
        assert!(!ControlError::not_found("Cell", "a").retryable());
        assert!(!ControlError::Serialization("x".into()).retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ControlError::BudgetExceeded("x".into()).code().as_str(),
            "budget_exceeded"
        );
        assert_eq!(
            ControlError::Transient("x".into()).code().as_str(),
            "transient"
        );
    }
}
