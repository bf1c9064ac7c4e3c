pub mod agent_core;
pub mod config;
pub mod patch;
pub mod sandbox;
pub mod settings;
pub mod tools;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;

use agent_core::{Generator, SqliteSessionStore, StreamSink, ToolLoop, TurnRequest};
use config::AgentConfig;
use sandbox::PermissionGate;
use settings::{FileToolSettings, ToolSettingsProvider};
use tools::{register_builtin_tools, ToolRegistry};

/// Return the platform-standard data directory for the assistant.
///
/// - macOS: `~/Library/Application Support/com.assistant-core.app/`
/// - Windows: `{FOLDERID_RoamingAppData}\com.assistant-core.app\`
/// - Linux: `$XDG_DATA_HOME/com.assistant-core.app/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.assistant-core/` only if none of the above can be resolved.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.assistant-core.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".assistant-core")
}

// ─── Bootstrap ──────────────────────────────────────────────────────────────

/// The wired-up core: config, persistent store, registry with the built-in
/// tools, permission gate and tool loop.
pub struct AssistantCore {
    pub config: AgentConfig,
    pub tool_loop: Arc<ToolLoop>,
    pub tool_settings: Arc<FileToolSettings>,
}

impl AssistantCore {
    /// Load `assistant.yaml` (searching upward from `start_dir`) and build
    /// every component around `generator`.
    pub fn bootstrap(start_dir: &Path, generator: Arc<dyn Generator>) -> anyhow::Result<Self> {
        let config = AgentConfig::load_or_default(start_dir);

        let db_path = config.database_path();
        let store = SqliteSessionStore::open(&db_path.to_string_lossy())
            .with_context(|| format!("failed to open session database at {}", db_path.display()))?;
        tracing::info!(db_path = %db_path.display(), "session database initialized");

        let registry = Arc::new(ToolRegistry::with_max_result_chars(config.max_tool_result_chars));
        register_builtin_tools(&registry);

        let gate = Arc::new(PermissionGate::with_timeout(config.permission_timeout()));
        let tool_loop = ToolLoop::new(generator, registry, gate, Arc::new(store)).with_config(&config);

        tracing::info!(
            max_iterations = config.max_iterations,
            permission_timeout_secs = ?config.permission_timeout_secs,
            "assistant core ready"
        );

        Ok(Self {
            config,
            tool_loop: Arc::new(tool_loop),
            tool_settings: Arc::new(FileToolSettings::load_default()),
        })
    }

    /// A turn request carrying the current persisted tool overrides.
    pub fn request(&self, session_id: impl Into<String>, sink: Arc<dyn StreamSink>) -> TurnRequest {
        TurnRequest::new(session_id, sink).with_tool_settings(self.tool_settings.tool_settings())
    }
}

// ─── Tracing ────────────────────────────────────────────────────────────────

/// Initialize the tracing subscriber, writing structured logs to the app data directory.
///
/// On each startup the previous `agent.log` files are rotated (keeping
/// `log_files_kept` of them) and a fresh log is opened that flushes after
/// every line. `RUST_LOG` overrides the configured filter.
pub fn init_tracing(config: &AgentConfig) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;

    let log_path = log_dir.join("agent.log");
    rotate_logs(&log_path, config.log_files_kept);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    let writer = LineFlushedFile(Arc::new(Mutex::new(log_file)));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        log_files_kept = config.log_files_kept,
        pid = std::process::id(),
        "=== assistant core starting ==="
    );
    Ok(())
}

/// Shift `agent.log` to `agent.log.1`, `.1` to `.2` and so on up to `.{keep}`.
/// Anything older is removed; with `keep == 0` the old log is just dropped.
fn rotate_logs(current: &Path, keep: u32) {
    let rotated = |n: u32| {
        let mut name = current.as_os_str().to_owned();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    };

    if keep == 0 {
        let _ = std::fs::remove_file(current);
        return;
    }
    let _ = std::fs::remove_file(rotated(keep));
    for n in (1..keep).rev() {
        let _ = std::fs::rename(rotated(n), rotated(n + 1));
    }
    // Missing sources are fine: a fresh install has nothing to rotate.
    let _ = std::fs::rename(current, rotated(1));
}

/// Log file handle that flushes after every write, so lines survive a crash.
#[derive(Clone)]
struct LineFlushedFile(Arc<Mutex<File>>);

impl Write for LineFlushedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let written = file.write(buf)?;
        file.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use agent_core::{GenerationError, GenerationRequest, GenerationStream, ModelInfo};

    struct Silent;

    #[async_trait]
    impl Generator for Silent {
        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                id: "silent".into(),
                provider: "test".into(),
                capabilities: Vec::new(),
            }
        }

        async fn generate(
            &self,
            _request: GenerationRequest,
            _abort: CancellationToken,
        ) -> Result<GenerationStream, GenerationError> {
            Err(GenerationError::Unsupported {
                reason: "silent".into(),
            })
        }
    }

    #[test]
    fn test_rotate_logs_keeps_configured_count() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("agent.log");
        for generation in ["a", "b", "c", "d", "e"] {
            std::fs::write(&base, generation).unwrap();
            rotate_logs(&base, 3);
        }
        assert!(!base.exists());
        let read = |n: u32| std::fs::read_to_string(dir.path().join(format!("agent.log.{n}"))).unwrap();
        assert_eq!(read(1), "e");
        assert_eq!(read(2), "d");
        assert_eq!(read(3), "c");
        assert!(!dir.path().join("agent.log.4").exists());
    }

    #[test]
    fn test_rotate_logs_with_zero_kept_drops_old_log() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("agent.log");
        std::fs::write(&base, "old").unwrap();
        rotate_logs(&base, 0);
        assert!(!base.exists());
        assert!(!dir.path().join("agent.log.1").exists());
    }

    #[test]
    fn test_line_flushed_file_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.log");
        let mut writer = LineFlushedFile(Arc::new(Mutex::new(File::create(&path).unwrap())));
        writer.write_all(b"first line\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first line\n");
    }

    #[test]
    fn test_bootstrap_wires_builtin_tools_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("agent.db");
        std::fs::write(
            dir.path().join("assistant.yaml"),
            format!("max_iterations: 7\ndatabase_path: {}\n", db_path.display()),
        )
        .unwrap();

        let core = AssistantCore::bootstrap(dir.path(), Arc::new(Silent)).unwrap();
        assert_eq!(core.config.max_iterations, 7);
        assert!(db_path.exists());
        assert_eq!(core.tool_loop.registry().len(), 5);
        assert!(!core.tool_loop.is_active("s1"));
    }
}
