//! Permission gate error types.

use thiserror::Error;

/// Reasons a parked permission request ends without an allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// The user denied the request.
    #[error("permission denied by user")]
    Denied,

    /// The user rejected the request with feedback for the model.
    #[error("permission rejected: {message}")]
    Rejected { message: String },

    /// The session was cancelled or closed while the request was pending.
    #[error("permission request cancelled: session cleared")]
    Cleared,

    /// A newer request for the same tool call replaced this one.
    #[error("permission request superseded by a newer request")]
    Superseded,

    /// Nobody answered within the configured timeout.
    #[error("permission request timed out after {secs}s")]
    TimedOut { secs: u64 },

    /// The gate dropped the request without answering.
    #[error("permission channel closed")]
    ChannelClosed,
}
