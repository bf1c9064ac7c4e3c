//! Built-in local capabilities.
//!
//! Submodules:
//! - `fs`: `read_file`, `list_directory`, `write_file`
//! - `edit`: `edit_file` via the patch engine
//! - `bash`: shell commands
//!
//! Read-only tools auto-execute by default; anything that writes or runs
//! commands waits for confirmation unless an override says otherwise.

pub mod bash;
pub mod edit;
pub mod fs;

use serde_json::Value;

use super::errors::ToolError;
use super::registry::ToolRegistry;

/// Register every built-in tool.
pub fn register_builtin_tools(registry: &ToolRegistry) {
    registry.register(fs::read_file_spec());
    registry.register(fs::list_directory_spec());
    registry.register(fs::write_file_spec());
    registry.register(edit::edit_file_spec());
    registry.register(bash::bash_spec());
    tracing::info!(count = registry.len(), "built-in tools registered");
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::validation(format!("'{field}' must be a string")))
}

fn optional_u64(args: &Value, field: &str) -> Result<Option<u64>, ToolError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| ToolError::validation(format!("'{field}' must be a non-negative integer"))),
    }
}
