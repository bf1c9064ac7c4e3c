//! `edit_file`: search/replace edits applied through the patch engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::fs::{read_existing, sha256_hex, write_with_parents};
use super::required_str;
use crate::patch;
use crate::tools::errors::ToolError;
use crate::tools::types::{ToolCategory, ToolContext, ToolHandler, ToolOutput, ToolSpec};

pub struct EditFile;

pub fn edit_file_spec() -> ToolSpec {
    ToolSpec::new(
        "edit_file",
        "Replace old_string with new_string in a file. old_string must identify a single \
         location unless replace_all is true; include surrounding lines to disambiguate. \
         An empty old_string writes new_string as the whole file.",
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to edit"},
                "old_string": {"type": "string", "description": "Text to replace"},
                "new_string": {"type": "string", "description": "Replacement text"},
                "replace_all": {"type": "boolean", "description": "Replace every occurrence"}
            },
            "required": ["path", "old_string", "new_string"]
        }),
        Arc::new(EditFile),
    )
    .with_name("Edit file")
    .with_category(ToolCategory::Filesystem)
}

#[async_trait]
impl ToolHandler for EditFile {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let path = required_str(&args, "path")?;
        let old_string = required_str(&args, "old_string")?;
        let new_string = required_str(&args, "new_string")?;
        let replace_all = args
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if old_string == new_string {
            return Err(ToolError::validation(
                "old_string and new_string are identical; nothing to change",
            ));
        }

        let resolved = ctx.check_access(path, "Edit file").await?;
        let previous = read_existing(&resolved).await?;
        let original = match (&previous, old_string.is_empty()) {
            (Some(content), _) => content.as_str(),
            (None, true) => "",
            (None, false) => {
                return Err(ToolError::execution(format!("file not found: {path}")));
            }
        };

        let outcome = patch::replace_with_report(original, old_string, new_string, replace_all)?;
        write_with_parents(&resolved, &outcome.content).await?;

        let label = resolved.to_string_lossy();
        let summary = patch::diff(original, &outcome.content, &label);
        let strategy = outcome.strategy.map(|s| s.as_str());
        tracing::info!(
            path = %resolved.display(),
            strategy = strategy.unwrap_or("whole-file"),
            replacements = outcome.replacements,
            additions = summary.additions,
            deletions = summary.deletions,
            "file edited"
        );

        let message = match outcome.replacements {
            1 => format!("Edited {}", resolved.display()),
            n => format!("Edited {} ({n} replacements)", resolved.display()),
        };
        Ok(ToolOutput::text(message).with_metadata(json!({
            "path": label,
            "strategy": strategy,
            "replacements": outcome.replacements,
            "additions": summary.additions,
            "deletions": summary.deletions,
            "diff": summary.unified,
            "sha256": sha256_hex(&outcome.content),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::tests::test_context;

    #[tokio::test]
    async fn test_edit_applies_unique_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.rs");
        std::fs::write(&file, "fn main() {\n    println!(\"hi\");\n}\n").unwrap();

        let out = EditFile
            .call(
                json!({"path": "main.rs", "old_string": "\"hi\"", "new_string": "\"hello\""}),
                test_context(dir.path().to_path_buf()),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&file).unwrap(),
            "fn main() {\n    println!(\"hello\");\n}\n"
        );
        assert_eq!(out.metadata["strategy"], "exact");
        assert_eq!(out.metadata["additions"], 1);
        assert_eq!(out.metadata["deletions"], 1);
    }

    #[tokio::test]
    async fn test_edit_rejects_identical_strings() {
        let dir = tempfile::tempdir().unwrap();
        let err = EditFile
            .call(
                json!({"path": "x.txt", "old_string": "a", "new_string": "a"}),
                test_context(dir.path().to_path_buf()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_edit_ambiguous_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("dup.txt");
        std::fs::write(&file, "x = 1\nx = 1\n").unwrap();

        let err = EditFile
            .call(
                json!({"path": "dup.txt", "old_string": "x = 1", "new_string": "x = 2"}),
                test_context(dir.path().to_path_buf()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Patch(ref e) if e.is_ambiguous()));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "x = 1\nx = 1\n");
    }

    #[tokio::test]
    async fn test_edit_with_empty_search_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        EditFile
            .call(
                json!({"path": "new.txt", "old_string": "", "new_string": "fresh\n"}),
                test_context(dir.path().to_path_buf()),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.txt")).unwrap(),
            "fresh\n"
        );
    }

    #[tokio::test]
    async fn test_edit_missing_file_with_search_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = EditFile
            .call(
                json!({"path": "ghost.txt", "old_string": "a", "new_string": "b"}),
                test_context(dir.path().to_path_buf()),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }
}
