//! Capability registry and built-in tools.
//!
//! Submodules:
//! - `types`: Tool specs, handler trait, invocation context and results
//! - `schema`: Model-facing schema projection and argument validation
//! - `registry`: Registration, override resolution, guarded execution
//! - `builtin`: Filesystem, edit and shell tools
//! - `errors`: Tool error types

pub mod builtin;
pub mod errors;
pub mod registry;
pub mod schema;
pub mod types;

pub use builtin::register_builtin_tools;
pub use errors::ToolError;
pub use registry::ToolRegistry;
pub use schema::{to_model_schema, validate_arguments, ModelToolSchema};
pub use types::{ToolCategory, ToolContext, ToolHandler, ToolOutput, ToolResult, ToolSpec};
