//! Capability types: specs, handlers, invocation context and results.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::errors::ToolError;
use crate::sandbox::{check_access, AccessScope, PermissionGate};

// ─── Registration ───────────────────────────────────────────────────────────

/// Coarse grouping shown in settings and used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Filesystem,
    Shell,
    Other,
}

/// A local capability the model may invoke.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Registered description of a tool. Immutable once registered.
#[derive(Clone)]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments.
    pub parameters: Value,
    /// Whether the tool may run without confirmation when no override exists.
    pub auto_execute: bool,
    pub category: ToolCategory,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            parameters,
            auto_execute: false,
            category: ToolCategory::Other,
            handler,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_auto_execute(mut self, auto_execute: bool) -> Self {
        self.auto_execute = auto_execute;
        self
    }

    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("auto_execute", &self.auto_execute)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

// ─── Context ────────────────────────────────────────────────────────────────

/// Everything a handler needs to run one call.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub message_id: String,
    pub call_id: String,
    /// Sandbox boundary; relative paths resolve against it.
    pub boundary: PathBuf,
    /// Cancelled when the turn is aborted. Long-running handlers must observe it.
    pub abort: CancellationToken,
    pub gate: Arc<PermissionGate>,
    pub command_timeout: Duration,
}

impl ToolContext {
    pub fn scope(&self) -> AccessScope {
        AccessScope {
            session_id: self.session_id.clone(),
            message_id: self.message_id.clone(),
            call_id: self.call_id.clone(),
        }
    }

    /// Resolve `path` and wait for permission if it leaves the boundary.
    pub async fn check_access(&self, path: &str, operation: &str) -> Result<PathBuf, ToolError> {
        let resolved = check_access(&self.gate, &self.boundary, path, &self.scope(), operation).await?;
        Ok(resolved)
    }
}

// ─── Output ─────────────────────────────────────────────────────────────────

/// What a handler returns on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub output: String,
    pub metadata: Value,
}

impl ToolOutput {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of one invocation, always data: failures never unwind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl ToolResult {
    pub fn ok(output: ToolOutput) -> Self {
        Self {
            success: true,
            output: output.output,
            error: None,
            metadata: output.metadata,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            metadata: Value::Null,
        }
    }

    /// Text fed back to the model as the tool-result message.
    pub fn model_text(&self) -> String {
        match (&self.error, self.success) {
            (Some(error), false) => format!("Error: {error}"),
            (None, false) => "Error: tool failed".to_string(),
            _ => self.output.clone(),
        }
    }

    /// Cap the output at `max_bytes`, appending a truncation notice.
    pub fn truncated(mut self, max_bytes: usize, tool_id: &str) -> Self {
        if self.output.len() <= max_bytes {
            return self;
        }
        let original_len = self.output.len();
        let kept = truncate_utf8(&self.output, max_bytes).to_string();
        tracing::warn!(
            tool = %tool_id,
            original_len,
            truncated_to = kept.len(),
            "tool result truncated"
        );
        self.output = format!(
            "{kept}\n\n[... truncated: showing first {} of {original_len} bytes]",
            kept.len()
        );
        self
    }
}

/// Truncate to at most `max_bytes` without splitting a UTF-8 character.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_utf8_respects_char_boundary() {
        // "é" spans bytes 1..3, so a cut at 2 backs off to 1.
        assert_eq!(truncate_utf8("aéb", 2), "a");
        assert_eq!(truncate_utf8("abc", 10), "abc");
    }

    #[test]
    fn test_truncated_appends_notice() {
        let result = ToolResult::ok(ToolOutput::text("x".repeat(50))).truncated(10, "read_file");
        assert!(result.output.starts_with("xxxxxxxxxx\n"));
        assert!(result.output.contains("first 10 of 50 bytes"));
    }

    #[test]
    fn test_model_text_for_failure() {
        let result = ToolResult::failure("file not found");
        assert!(!result.success);
        assert_eq!(result.model_text(), "Error: file not found");
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ToolResult::ok(ToolOutput::text("done"))).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "output": "done"}));
    }
}
