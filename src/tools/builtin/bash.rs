//! `bash`: run a shell command inside the sandbox boundary.
//!
//! The child is spawned with `kill_on_drop`, so losing the race against the
//! timeout or the turn's abort token kills it.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_u64, required_str};
use crate::tools::errors::ToolError;
use crate::tools::types::{ToolCategory, ToolContext, ToolHandler, ToolOutput, ToolSpec};

pub struct Bash;

pub fn bash_spec() -> ToolSpec {
    ToolSpec::new(
        "bash",
        "Run a shell command with `sh -c` in the working directory (or `workdir`). \
         Returns combined stdout and stderr. A non-zero exit code is reported as an error.",
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Command line to run"},
                "workdir": {"type": "string", "description": "Directory to run in; defaults to the working directory"},
                "timeout_secs": {"type": "integer", "description": "Time limit in seconds"}
            },
            "required": ["command"]
        }),
        Arc::new(Bash),
    )
    .with_name("Run command")
    .with_category(ToolCategory::Shell)
}

#[async_trait]
impl ToolHandler for Bash {
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let command = required_str(&args, "command")?;
        let cwd = match args.get("workdir").and_then(Value::as_str) {
            Some(dir) => ctx.check_access(dir, "Run command").await?,
            None => ctx.boundary.clone(),
        };
        let timeout = optional_u64(&args, "timeout_secs")?
            .map(Duration::from_secs)
            .unwrap_or(ctx.command_timeout);

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::execution(format!("failed to spawn command: {e}")))?;

        tracing::info!(
            session_id = %ctx.session_id,
            call_id = %ctx.call_id,
            cwd = %cwd.display(),
            "running command"
        );
        let start = Instant::now();

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(call_id = %ctx.call_id, secs = timeout.as_secs(), "command timed out");
                return Err(ToolError::Timeout { secs: timeout.as_secs() });
            }
            _ = ctx.abort.cancelled() => {
                return Err(ToolError::Cancelled);
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let text = combine_output(&output.stdout, &output.stderr);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(call_id = %ctx.call_id, exit_code, elapsed_ms, "command finished");

        if !output.status.success() {
            return Err(ToolError::execution(format!(
                "command exited with code {exit_code}\n{text}"
            )));
        }

        Ok(ToolOutput::text(text).with_metadata(json!({
            "exitCode": exit_code,
            "elapsedMs": elapsed_ms,
            "cwd": cwd.to_string_lossy(),
        })))
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    match (stdout.trim_end().is_empty(), stderr.trim_end().is_empty()) {
        (true, true) => "(no output)".to_string(),
        (false, true) => stdout.trim_end().to_string(),
        (true, false) => format!("[stderr]\n{}", stderr.trim_end()),
        (false, false) => format!("{}\n[stderr]\n{}", stdout.trim_end(), stderr.trim_end()),
    }
}
