//! Application error types.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP-style status code, returned by [`Error::to_http_status`] without
/// pulling an HTTP framework type into the error module itself.
pub type StatusCode = u16;

/// Main error enum for the pipeline core.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input (maps to 400).
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (maps to 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// A cap (SSE connections, in-flight sessions, request size) was hit.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// An operation was attempted from an invalid pipeline/gate state.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Cancelled via the run's shared cancellation token.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A round, overall, or wait timeout elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A fatal pipeline error: a required agent output never materialized.
    #[error("fatal pipeline error at stage {stage}: {message}")]
    Fatal { stage: String, message: String },

    /// A tool raised or panicked; captured as a result block, never fatal
    /// to the agent loop that produced it.
    #[error("tool error: {0}")]
    ToolError(String),

    /// A gate response conflicts with the gate's current state (already
    /// answered, or addressed to a gate that isn't the current one).
    #[error("gate conflict: {0}")]
    GateConflict(String),

    /// A hard cap (byte size, item count) was exceeded and could not be
    /// satisfied by truncation/eviction alone.
    #[error("cap exceeded: {0}")]
    CapExceeded(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Map to the HTTP status code for this error kind.
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::QuotaExceeded(_) => 429,
            Error::CapExceeded(_) => 413,
            Error::StateTransition(_) | Error::GateConflict(_) => 409,
            Error::Cancelled(_) => 499,
            Error::Timeout(_) => 504,
            Error::Fatal { .. } | Error::Internal(_) | Error::ToolError(_) => 503,
            Error::Serialization(_) => 500,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn fatal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    pub fn gate_conflict(msg: impl Into<String>) -> Self {
        Self::GateConflict(msg.into())
    }

    pub fn cap_exceeded(msg: impl Into<String>) -> Self {
        Self::CapExceeded(msg.into())
    }
}
