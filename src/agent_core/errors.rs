//! Agent core error types.

use thiserror::Error;

use super::types::ToolCallStatus;

/// Errors from the tool loop and its session store.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Session not found.
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },

    #[error("message not found: '{message_id}' in session '{session_id}'")]
    MessageNotFound {
        session_id: String,
        message_id: String,
    },

    #[error("tool call not found: '{call_id}' in message '{message_id}'")]
    ToolCallNotFound { message_id: String, call_id: String },

    /// A tool call update tried to move its status backwards.
    #[error("tool call '{call_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        call_id: String,
        from: ToolCallStatus,
        to: ToolCallStatus,
    },

    /// A drive of this session's turn is already running.
    #[error("a turn is already running for session '{session_id}'")]
    TurnInProgress { session_id: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// The generation capability failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

// ─── Generation ─────────────────────────────────────────────────────────────

/// Errors reported by a [`Generator`](super::generation::Generator).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Could not reach the provider.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("rate limited; retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The provider rejected the request as malformed.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("context length exceeded: {reason}")]
    ContextLengthExceeded { reason: String },

    /// Malformed or interrupted event stream.
    #[error("stream error: {reason}")]
    Stream { reason: String },

    /// Provider-side failure with an HTTP-like status.
    #[error("provider error {status}: {reason}")]
    Provider { status: u16, reason: String },

    /// The model cannot perform the requested operation.
    #[error("unsupported: {reason}")]
    Unsupported { reason: String },
}

impl GenerationError {
    /// Short category shown to the user alongside the message.
    pub fn category(&self) -> &'static str {
        match self {
            GenerationError::ConnectionFailed { .. } => "connection",
            GenerationError::Timeout { .. } => "timeout",
            GenerationError::RateLimited { .. } => "rate_limit",
            GenerationError::InvalidRequest { .. } => "invalid_request",
            GenerationError::ContextLengthExceeded { .. } => "context_length",
            GenerationError::Stream { .. } => "stream",
            GenerationError::Provider { .. } => "provider",
            GenerationError::Unsupported { .. } => "unsupported",
        }
    }

    /// Whether retrying the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::ConnectionFailed { .. }
            | GenerationError::Timeout { .. }
            | GenerationError::RateLimited { .. } => true,
            GenerationError::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
