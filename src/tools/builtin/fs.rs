//! Filesystem tools: `read_file`, `list_directory`, `write_file`.
//!
//! Every path goes through the sandbox check first, so a path outside the
//! working directory blocks on a permission request before any IO happens.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::patch;
use crate::tools::errors::ToolError;
use crate::tools::types::{ToolCategory, ToolContext, ToolHandler, ToolOutput, ToolSpec};

use super::{optional_u64, required_str};

// ─── read_file ──────────────────────────────────────────────────────────────

pub struct ReadFile;

pub fn read_file_spec() -> ToolSpec {
    ToolSpec::new(
        "read_file",
        "Read a UTF-8 text file. Relative paths resolve against the working directory. \
         Use offset (1-based line) and limit to read part of a large file.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to read"},
                "offset": {"type": "integer", "description": "First line to return, starting at 1"},
                "limit": {"type": "integer", "description": "Maximum number of lines to return"}
            },
            "required": ["path"]
        }),
        std::sync::Arc::new(ReadFile),
    )
    .with_name("Read file")
    .with_category(ToolCategory::Filesystem)
    .with_auto_execute(true)
}

#[async_trait]
impl ToolHandler for ReadFile {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = required_str(&args, "path")?;
        let resolved = ctx.check_access(path, "Read file").await?;

        if resolved.is_dir() {
            return Err(ToolError::execution(format!(
                "{} is a directory; use list_directory instead",
                resolved.display()
            )));
        }
        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::execution(format!("failed to read {path}: {e}")))?;

        let offset = optional_u64(&args, "offset")?;
        let limit = optional_u64(&args, "limit")?;
        let total_lines = content.lines().count();
        let output = match (offset, limit) {
            (None, None) => content,
            (offset, limit) => {
                let skip = offset.unwrap_or(1).saturating_sub(1) as usize;
                let take = limit.map(|l| l as usize).unwrap_or(usize::MAX);
                content
                    .lines()
                    .skip(skip)
                    .take(take)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        Ok(ToolOutput::text(output).with_metadata(json!({
            "path": resolved.to_string_lossy(),
            "totalLines": total_lines,
        })))
    }
}

// ─── list_directory ─────────────────────────────────────────────────────────

pub struct ListDirectory;

pub fn list_directory_spec() -> ToolSpec {
    ToolSpec::new(
        "list_directory",
        "List the entries of a directory. Directories are listed first and end with '/'. \
         Hidden entries are skipped.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list; defaults to the working directory"}
            }
        }),
        std::sync::Arc::new(ListDirectory),
    )
    .with_name("List directory")
    .with_category(ToolCategory::Filesystem)
    .with_auto_execute(true)
}

struct Entry {
    name: String,
    is_dir: bool,
    size: u64,
}

#[async_trait]
impl ToolHandler for ListDirectory {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or(".");
        let resolved = ctx.check_access(path, "List directory").await?;

        if !resolved.is_dir() {
            return Err(ToolError::execution(format!("not a directory: {path}")));
        }

        let mut read_dir = tokio::fs::read_dir(&resolved).await?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_hidden(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            entries.push(Entry {
                name,
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }

        // Directories first, then files; alphabetical within each group.
        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        let output = if entries.is_empty() {
            "Directory is empty.".to_string()
        } else {
            entries
                .iter()
                .map(|e| {
                    if e.is_dir {
                        format!("{}/", e.name)
                    } else {
                        format!("{} ({})", e.name, format_file_size(e.size))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        Ok(ToolOutput::text(output).with_metadata(json!({
            "path": resolved.to_string_lossy(),
            "count": entries.len(),
        })))
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn format_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

// ─── write_file ─────────────────────────────────────────────────────────────

pub struct WriteFile;

pub fn write_file_spec() -> ToolSpec {
    ToolSpec::new(
        "write_file",
        "Create a file or overwrite it entirely with the given content. \
         Parent directories are created as needed.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to write"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        }),
        std::sync::Arc::new(WriteFile),
    )
    .with_name("Write file")
    .with_category(ToolCategory::Filesystem)
}

#[async_trait]
impl ToolHandler for WriteFile {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let resolved = ctx.check_access(path, "Write file").await?;

        let previous = read_existing(&resolved).await?;
        write_with_parents(&resolved, content).await?;

        let label = resolved.to_string_lossy();
        let summary = patch::diff(previous.as_deref().unwrap_or_default(), content, &label);
        let verb = if previous.is_some() { "Overwrote" } else { "Created" };
        tracing::info!(
            path = %resolved.display(),
            bytes = content.len(),
            additions = summary.additions,
            deletions = summary.deletions,
            "file written"
        );

        Ok(
            ToolOutput::text(format!("{verb} {} ({} bytes)", resolved.display(), content.len()))
                .with_metadata(json!({
                    "path": label,
                    "created": previous.is_none(),
                    "additions": summary.additions,
                    "deletions": summary.deletions,
                    "diff": summary.unified,
                    "sha256": sha256_hex(content),
                })),
        )
    }
}

// ─── Shared helpers ─────────────────────────────────────────────────────────

/// Current content of `path`, or `None` if it does not exist yet.
pub(super) async fn read_existing(path: &Path) -> Result<Option<String>, ToolError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ToolError::execution(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

pub(super) async fn write_with_parents(path: &Path, content: &str) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await.map_err(|e| {
        ToolError::execution(format!("failed to write {}: {e}", path.display()))
    })
}

pub(super) fn sha256_hex(content: &str) -> String {
    let hash = Sha256::digest(content.as_bytes());
    format!("{hash:x}")
}

// ─── Tests ──────────────────────────────────────────────────────────────────
