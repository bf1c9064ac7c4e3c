//! Shared types for the tool loop.
//!
//! Conversation messages and sessions as persisted by a [`SessionStore`],
//! tool-call lifecycle state, and the events pushed to the UI sink.
//!
//! [`SessionStore`]: super::store::SessionStore

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::errors::AgentError;
use super::generation::GenerationOptions;
use crate::settings::ToolSettings;
use crate::tools::ToolResult;

// ─── Conversation Messages ──────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// A single message stored in conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool calls requested by the assistant in this message, in model order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `tool` role: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Generated or attached images (data URLs or file paths).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    fn new(session_id: &str, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            images: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn system(session_id: &str, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::System, content)
    }

    pub fn user(session_id: &str, content: impl Into<String>) -> Self {
        Self::new(session_id, Role::User, content)
    }

    /// An assistant message with a caller-chosen id, so streamed deltas and
    /// the stored message share it.
    pub fn assistant(
        session_id: &str,
        message_id: &str,
        content: impl Into<String>,
        reasoning: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut message = Self::new(session_id, Role::Assistant, content);
        message.id = message_id.to_string();
        message.reasoning = reasoning;
        message.tool_calls = tool_calls;
        message
    }

    pub fn tool_result(session_id: &str, call_id: &str, content: impl Into<String>) -> Self {
        let mut message = Self::new(session_id, Role::Tool, content);
        message.tool_call_id = Some(call_id.to_string());
        message
    }
}

// ─── Sessions ───────────────────────────────────────────────────────────────

/// Metadata for a conversation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    /// Sandbox boundary for this session, if it has its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, working_directory: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            working_directory,
            created_at: now,
            last_activity: now,
        }
    }
}

// ─── Tool Calls ─────────────────────────────────────────────────────────────

/// Lifecycle of a model-requested tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallStatus {
    Pending,
    AwaitingConfirmation,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolCallStatus::Completed | ToolCallStatus::Failed | ToolCallStatus::Cancelled
        )
    }

    /// Transitions only move forward. Any non-terminal state may be
    /// cancelled; pending and awaiting calls may fail without executing.
    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        use ToolCallStatus::*;
        matches!(
            (self, next),
            (Pending, AwaitingConfirmation | Executing | Failed | Cancelled)
                | (AwaitingConfirmation, Executing | Failed | Cancelled)
                | (Executing, Completed | Failed | Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolCallStatus::Pending => "pending",
            ToolCallStatus::AwaitingConfirmation => "awaiting-confirmation",
            ToolCallStatus::Executing => "executing",
            ToolCallStatus::Completed => "completed",
            ToolCallStatus::Failed => "failed",
            ToolCallStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's decision on a tool-execution request, recorded on the call so a
/// paused turn can be resumed from the store alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Approval {
    Granted,
    Denied { reason: String },
}

/// One model-requested invocation, owned by its assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub tool_id: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Permission request currently blocking this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, tool_id: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_id: tool_id.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
            permission_id: None,
            approval: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Partial update applied to a stored [`ToolCall`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallPatch {
    pub status: Option<ToolCallStatus>,
    pub result: Option<ToolResult>,
    pub error: Option<String>,
    pub permission_id: Option<String>,
    pub approval: Option<Approval>,
    /// Drop a recorded decision; applied before `approval`.
    pub clear_approval: bool,
}

impl ToolCallPatch {
    pub fn status(status: ToolCallStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn approval(approval: Approval) -> Self {
        Self {
            approval: Some(approval),
            ..Self::default()
        }
    }

    /// Undo a decision recorded for a request that could no longer be answered.
    pub fn clear_approval() -> Self {
        Self {
            clear_approval: true,
            ..Self::default()
        }
    }

    /// Terminal update carrying the invocation's result.
    pub fn finished(result: ToolResult) -> Self {
        let status = if result.success {
            ToolCallStatus::Completed
        } else {
            ToolCallStatus::Failed
        };
        Self {
            status: Some(status),
            error: result.error.clone(),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Terminal update for a call stopped by a cancel.
    pub fn cancelled() -> Self {
        let result = ToolResult::failure("cancelled");
        Self {
            status: Some(ToolCallStatus::Cancelled),
            error: result.error.clone(),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn with_permission(mut self, permission_id: impl Into<String>) -> Self {
        self.permission_id = Some(permission_id.into());
        self
    }

    /// Apply to `call`, rejecting a backwards status transition.
    pub fn apply(&self, call: &mut ToolCall) -> Result<(), AgentError> {
        if let Some(next) = self.status {
            if next != call.status {
                if !call.status.can_transition_to(next) {
                    return Err(AgentError::InvalidTransition {
                        call_id: call.id.clone(),
                        from: call.status,
                        to: next,
                    });
                }
                let now = Utc::now();
                if next == ToolCallStatus::Executing {
                    call.started_at = Some(now);
                }
                if next.is_terminal() {
                    call.completed_at = Some(now);
                }
                call.status = next;
            }
        }
        if let Some(result) = &self.result {
            call.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            call.error = Some(error.clone());
        }
        if let Some(permission_id) = &self.permission_id {
            call.permission_id = Some(permission_id.clone());
        }
        if self.clear_approval {
            call.approval = None;
        }
        if let Some(approval) = &self.approval {
            call.approval = Some(approval.clone());
        }
        Ok(())
    }
}

// ─── Streaming ──────────────────────────────────────────────────────────────

/// Why a turn stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    MaxIterations,
    Cancelled,
}

/// Events pushed to the UI while a turn runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Text { message_id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    Reasoning { message_id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    ToolCallUpdate { message_id: String, call: ToolCall },
    Done { reason: FinishReason },
    Error {
        category: String,
        message: String,
        retryable: bool,
    },
}

/// Destination for [`StreamEvent`]s.
pub trait StreamSink: Send + Sync {
    fn push(&self, event: StreamEvent);
}

impl StreamSink for mpsc::UnboundedSender<StreamEvent> {
    fn push(&self, event: StreamEvent) {
        if self.send(event).is_err() {
            tracing::trace!("stream receiver dropped, event discarded");
        }
    }
}

// ─── Turns ──────────────────────────────────────────────────────────────────

/// Where a turn ended up when `run`, `resume` or `respond` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    AwaitingConfirmation,
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub session_id: String,
    pub state: LoopState,
    /// Generation steps taken in this turn so far.
    pub iterations: u32,
    /// Set when paused: the permission request the turn waits on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn paused_for_confirmation(&self) -> bool {
        self.state == LoopState::AwaitingConfirmation
    }
}

/// Per-call inputs for `run`, `resume` and `respond`.
#[derive(Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub sink: Arc<dyn StreamSink>,
    /// Per-session tool overrides.
    pub tool_settings: ToolSettings,
    /// Explicit sandbox boundary; falls back to the session's, then the config's.
    pub working_directory: Option<PathBuf>,
    pub options: GenerationOptions,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn StreamSink>) -> Self {
        Self {
            session_id: session_id.into(),
            sink,
            tool_settings: ToolSettings::new(),
            working_directory: None,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_tool_settings(mut self, tool_settings: ToolSettings) -> Self {
        self.tool_settings = tool_settings;
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutput;
    use serde_json::json;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use ToolCallStatus::*;
        assert!(Pending.can_transition_to(AwaitingConfirmation));
        assert!(AwaitingConfirmation.can_transition_to(Executing));
        assert!(AwaitingConfirmation.can_transition_to(Failed));
        assert!(Executing.can_transition_to(Cancelled));
        assert!(!Executing.can_transition_to(Pending));
        assert!(!Executing.can_transition_to(AwaitingConfirmation));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Executing));
    }

    #[test]
    fn test_patch_sets_timestamps_and_result() {
        let mut call = ToolCall::new("c1", "read_file", json!({"path": "a"}));
        ToolCallPatch::status(ToolCallStatus::Executing)
            .apply(&mut call)
            .unwrap();
        assert!(call.started_at.is_some());

        ToolCallPatch::finished(ToolResult::ok(ToolOutput::text("data")))
            .apply(&mut call)
            .unwrap();
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert!(call.completed_at.is_some());
        assert_eq!(call.result.as_ref().unwrap().output, "data");
    }

    #[test]
    fn test_patch_rejects_backwards_transition() {
        let mut call = ToolCall::new("c1", "bash", json!({}));
        call.status = ToolCallStatus::Completed;
        let err = ToolCallPatch::status(ToolCallStatus::Cancelled)
            .apply(&mut call)
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { .. }));
        assert_eq!(call.status, ToolCallStatus::Completed);
    }

    #[test]
    fn test_clear_approval_removes_decision() {
        let mut call = ToolCall::new("c1", "bash", json!({}));
        ToolCallPatch::approval(Approval::Granted)
            .apply(&mut call)
            .unwrap();
        assert_eq!(call.approval, Some(Approval::Granted));
        ToolCallPatch::clear_approval().apply(&mut call).unwrap();
        assert_eq!(call.approval, None);
        assert_eq!(call.status, ToolCallStatus::Pending);
    }

    #[test]
    fn test_stream_event_wire_shape() {
        let json = serde_json::to_value(StreamEvent::Text {
            message_id: "m1".into(),
            delta: "hi".into(),
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"type": "text", "payload": {"messageId": "m1", "delta": "hi"}})
        );

        let call = ToolCall::new("c1", "bash", json!({}));
        let json = serde_json::to_value(StreamEvent::ToolCallUpdate {
            message_id: "m1".into(),
            call,
        })
        .unwrap();
        assert_eq!(json["type"], "tool-call-update");
        assert_eq!(json["payload"]["call"]["status"], "pending");
    }

    #[test]
    fn test_approval_serialization() {
        let json = serde_json::to_value(Approval::Denied {
            reason: "no".into(),
        })
        .unwrap();
        assert_eq!(json, json!({"decision": "denied", "reason": "no"}));
    }
}
