//! Tool error types.
//!
//! Handlers return these; the registry converts every one of them into a
//! failed `ToolResult` before it reaches the tool loop.

use thiserror::Error;

use crate::patch::PatchError;
use crate::sandbox::PermissionError;

#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under this id.
    #[error("unknown tool: '{tool_id}'")]
    NotFound { tool_id: String },

    /// Tool is registered but disabled by settings.
    #[error("tool '{tool_id}' is disabled")]
    Disabled { tool_id: String },

    /// Arguments do not match the tool's parameter schema.
    #[error("invalid arguments: {reason}")]
    Validation { reason: String },

    /// A permission request was denied, rejected or cleared.
    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    /// The edit's search text could not be located unambiguously.
    #[error("edit failed: {0}")]
    Patch(#[from] PatchError),

    /// The handler ran and failed.
    #[error("{reason}")]
    Execution { reason: String },

    /// The handler exceeded its time limit.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The turn was aborted while the handler ran.
    #[error("cancelled")]
    Cancelled,

    #[error("io error: {reason}")]
    Io { reason: String },
}

impl ToolError {
    pub fn validation(reason: impl Into<String>) -> Self {
        ToolError::Validation {
            reason: reason.into(),
        }
    }

    pub fn execution(reason: impl Into<String>) -> Self {
        ToolError::Execution {
            reason: reason.into(),
        }
    }
}

impl From<PermissionError> for ToolError {
    fn from(e: PermissionError) -> Self {
        ToolError::AccessDenied {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io {
            reason: e.to_string(),
        }
    }
}
