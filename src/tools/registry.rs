//! Capability registry: owns every [`ToolSpec`] and runs invocations.
//!
//! Provides:
//! - Registration and lookup by id
//! - Enable / auto-execute resolution against per-session overrides
//! - Projection of enabled tools into model-facing schemas
//! - `execute`, which never fails: every error (including a handler panic)
//!   comes back as a failed [`ToolResult`]

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde_json::Value;

use super::errors::ToolError;
use super::schema::{to_model_schema, validate_arguments, ModelToolSchema};
use super::types::{ToolContext, ToolResult, ToolSpec};
use crate::settings::ToolSettings;

/// Default cap on tool output fed back to the model.
pub const DEFAULT_MAX_RESULT_CHARS: usize = 30_000;

// ─── ToolRegistry ───────────────────────────────────────────────────────────

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolSpec>>,
    max_result_chars: usize,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_max_result_chars(DEFAULT_MAX_RESULT_CHARS)
    }

    pub fn with_max_result_chars(max_result_chars: usize) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            max_result_chars,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ToolSpec>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ToolSpec>> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a tool, replacing any existing tool with the same id.
    pub fn register(&self, spec: ToolSpec) {
        let id = spec.id.clone();
        if self.write().insert(id.clone(), spec).is_some() {
            tracing::warn!(tool = %id, "tool re-registered, previous definition replaced");
        } else {
            tracing::debug!(tool = %id, "tool registered");
        }
    }

    pub fn get(&self, id: &str) -> Option<ToolSpec> {
        self.read().get(id).cloned()
    }

    /// All registered tools, sorted by id.
    pub fn list(&self) -> Vec<ToolSpec> {
        let mut tools: Vec<ToolSpec> = self.read().values().cloned().collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether a registered tool is enabled. Tools are enabled unless an
    /// override turns them off; unknown ids are never enabled.
    pub fn is_enabled(&self, id: &str, settings: &ToolSettings) -> bool {
        if !self.read().contains_key(id) {
            return false;
        }
        settings.get(id).and_then(|o| o.enabled).unwrap_or(true)
    }

    /// Enabled tools, sorted by id, with `auto_execute` resolved against
    /// the overrides.
    pub fn list_enabled(&self, settings: &ToolSettings) -> Vec<ToolSpec> {
        self.list()
            .into_iter()
            .filter(|spec| settings.get(&spec.id).and_then(|o| o.enabled).unwrap_or(true))
            .map(|spec| {
                let auto_execute = effective_auto_execute(&spec, settings);
                spec.with_auto_execute(auto_execute)
            })
            .collect()
    }

    /// Override, then the tool's default, then `false`.
    pub fn can_auto_execute(&self, id: &str, settings: &ToolSettings) -> bool {
        self.read()
            .get(id)
            .map(|spec| effective_auto_execute(spec, settings))
            .unwrap_or(false)
    }

    /// Schemas for every enabled tool, in id order.
    pub fn model_schemas(&self, settings: &ToolSettings) -> Vec<ModelToolSchema> {
        self.list_enabled(settings)
            .iter()
            .map(to_model_schema)
            .collect()
    }

    /// Run one invocation.
    ///
    /// The handler runs on its own task so a panic is contained, and races
    /// the context's abort token. Output above the size cap is truncated.
    pub async fn execute(&self, id: &str, args: Value, ctx: ToolContext) -> ToolResult {
        let start = Instant::now();

        let Some(spec) = self.get(id) else {
            tracing::warn!(tool = %id, call_id = %ctx.call_id, "execute called for unknown tool");
            return ToolResult::failure(
                ToolError::NotFound {
                    tool_id: id.to_string(),
                }
                .to_string(),
            );
        };

        if let Err(e) = validate_arguments(&spec, &args) {
            tracing::debug!(tool = %id, call_id = %ctx.call_id, error = %e, "tool arguments rejected");
            return ToolResult::failure(e.to_string());
        }

        if ctx.abort.is_cancelled() {
            return ToolResult::failure(ToolError::Cancelled.to_string());
        }

        let call_id = ctx.call_id.clone();
        let abort = ctx.abort.clone();
        let handler = spec.handler.clone();
        let mut task = tokio::spawn(async move { handler.call(args, ctx).await });

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = abort.cancelled() => {
                task.abort();
                tracing::info!(tool = %id, call_id = %call_id, "tool execution cancelled");
                return ToolResult::failure(ToolError::Cancelled.to_string());
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let result = match joined {
            Ok(Ok(output)) => {
                tracing::info!(tool = %id, call_id = %call_id, elapsed_ms, "tool succeeded");
                ToolResult::ok(output)
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = %id, call_id = %call_id, elapsed_ms, error = %e, "tool failed");
                ToolResult::failure(e.to_string())
            }
            Err(join_err) if join_err.is_panic() => {
                tracing::error!(tool = %id, call_id = %call_id, "tool handler panicked");
                ToolResult::failure(format!("tool '{id}' panicked during execution"))
            }
            Err(join_err) => ToolResult::failure(join_err.to_string()),
        };

        result.truncated(self.max_result_chars, id)
    }
}

fn effective_auto_execute(spec: &ToolSpec, settings: &ToolSettings) -> bool {
    settings
        .get(&spec.id)
        .and_then(|o| o.auto_execute)
        .unwrap_or(spec.auto_execute)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::sandbox::PermissionGate;
    use crate::settings::ToolOverride;
    use crate::tools::types::{ToolHandler, ToolOutput};

    pub(crate) fn test_context(boundary: PathBuf) -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            message_id: "m1".into(),
            call_id: "c1".into(),
            boundary,
            abort: CancellationToken::new(),
            gate: Arc::new(PermissionGate::new()),
            command_timeout: Duration::from_secs(5),
        }
    }

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Value, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(args["text"].as_str().unwrap_or_default()))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        async fn call(&self, _args: Value, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            Err(ToolError::execution("disk on fire"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl ToolHandler for Panicking {
        async fn call(&self, _args: Value, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            panic!("boom");
        }
    }

    struct Sleeper;

    #[async_trait]
    impl ToolHandler for Sleeper {
        async fn call(&self, _args: Value, _ctx: ToolContext) -> Result<ToolOutput, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ToolOutput::text("woke"))
        }
    }

    fn echo_spec(id: &str) -> ToolSpec {
        ToolSpec::new(
            id,
            "Echo text back",
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
            Arc::new(Echo),
        )
    }

    fn overrides(id: &str, enabled: Option<bool>, auto_execute: Option<bool>) -> ToolSettings {
        let mut settings = ToolSettings::new();
        settings.insert(id.to_string(), ToolOverride { enabled, auto_execute });
        settings
    }

    #[test]
    fn test_register_overwrites_and_lists_sorted() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("zeta"));
        registry.register(echo_spec("alpha"));
        registry.register(echo_spec("alpha").with_name("Alpha v2"));

        let ids: Vec<String> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(registry.get("alpha").unwrap().name, "Alpha v2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_auto_execute_precedence() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("safe").with_auto_execute(true));
        registry.register(echo_spec("risky"));

        let none = ToolSettings::new();
        assert!(registry.can_auto_execute("safe", &none));
        assert!(!registry.can_auto_execute("risky", &none));
        assert!(!registry.can_auto_execute("missing", &none));

        assert!(!registry.can_auto_execute("safe", &overrides("safe", None, Some(false))));
        assert!(registry.can_auto_execute("risky", &overrides("risky", None, Some(true))));
        // An override without an auto-execute value falls through to the default.
        assert!(registry.can_auto_execute("safe", &overrides("safe", Some(true), None)));
    }

    #[test]
    fn test_list_enabled_applies_overrides() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("a"));
        registry.register(echo_spec("b"));

        let mut settings = overrides("a", Some(false), None);
        settings.insert(
            "b".into(),
            ToolOverride {
                enabled: None,
                auto_execute: Some(true),
            },
        );

        let enabled = registry.list_enabled(&settings);
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "b");
        assert!(enabled[0].auto_execute);
        assert!(!registry.is_enabled("a", &settings));
        assert_eq!(registry.model_schemas(&settings)[0].name, "b");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_is_failure_result() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("nope", json!({}), test_context(PathBuf::from("/tmp")))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_execute_validates_arguments() {
        let registry = ToolRegistry::new();
        registry.register(echo_spec("echo"));
        let result = registry
            .execute("echo", json!({"text": 42}), test_context(PathBuf::from("/tmp")))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid arguments"));

        let ok = registry
            .execute("echo", json!({"text": "hi"}), test_context(PathBuf::from("/tmp")))
            .await;
        assert_eq!(ok.output, "hi");
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_become_results() {
        let registry = ToolRegistry::new();
        registry.register(ToolSpec::new("fail", "", json!({}), Arc::new(Failing)));
        registry.register(ToolSpec::new("panic", "", json!({}), Arc::new(Panicking)));

        let failed = registry
            .execute("fail", json!({}), test_context(PathBuf::from("/tmp")))
            .await;
        assert_eq!(failed.model_text(), "Error: disk on fire");

        let panicked = registry
            .execute("panic", json!({}), test_context(PathBuf::from("/tmp")))
            .await;
        assert!(!panicked.success);
        assert!(panicked.error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_abort_interrupts_running_handler() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(ToolSpec::new("sleep", "", json!({}), Arc::new(Sleeper)));
        let ctx = test_context(PathBuf::from("/tmp"));
        let abort = ctx.abort.clone();

        let running = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.execute("sleep", json!({}), ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_long_output_truncated() {
        let registry = ToolRegistry::with_max_result_chars(8);
        registry.register(echo_spec("echo"));
        let result = registry
            .execute(
                "echo",
                json!({"text": "abcdefghijklmnop"}),
                test_context(PathBuf::from("/tmp")),
            )
            .await;
        assert!(result.output.starts_with("abcdefgh\n"));
        assert!(result.output.contains("truncated"));
    }
}
