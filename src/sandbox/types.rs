//! Permission request and response types shared by the gate and the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a permission request is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// A tool touched a path outside the sandbox boundary.
    ExternalDirectory,
    /// A tool that is not auto-executable wants to run.
    ToolExecution,
}

/// A pending human-approval gate blocking one specific tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    #[serde(rename = "type")]
    pub kind: PermissionKind,
    pub pattern: Vec<String>,
    pub title: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Set only when the gate runs with a timeout policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub resolved: bool,
}

/// Caller-supplied fields of a new permission request.
#[derive(Debug, Clone)]
pub struct NewPermissionRequest {
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    pub kind: PermissionKind,
    pub pattern: Vec<String>,
    pub title: String,
    pub metadata: serde_json::Value,
}

/// A human decision on a pending permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum PermissionResponse {
    Allow,
    Deny,
    /// Deny with a message that is fed back to the model.
    Reject { message: String },
}

impl PermissionResponse {
    pub fn is_allow(&self) -> bool {
        matches!(self, PermissionResponse::Allow)
    }
}
