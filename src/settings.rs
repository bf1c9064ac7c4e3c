//! Per-tool settings: enable and auto-execute overrides.
//!
//! Overrides sit on top of each tool's registered defaults; an override
//! field that is `None` falls through to the default. The file-backed
//! provider persists to `tool_settings.json` in the app data directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

// ─── Types ──────────────────────────────────────────────────────────────────

/// Session or user override for one tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_execute: Option<bool>,
}

/// Tool id → override.
pub type ToolSettings = HashMap<String, ToolOverride>;

/// Source of the current tool settings.
pub trait ToolSettingsProvider: Send + Sync {
    fn tool_settings(&self) -> ToolSettings;
}

/// Fixed settings, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticToolSettings(pub ToolSettings);

impl ToolSettingsProvider for StaticToolSettings {
    fn tool_settings(&self) -> ToolSettings {
        self.0.clone()
    }
}

// ─── File-backed provider ───────────────────────────────────────────────────

/// On-disk format for `tool_settings.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSettings {
    version: u32,
    tools: ToolSettings,
}

/// Tool settings persisted as JSON, written atomically on every change.
pub struct FileToolSettings {
    path: PathBuf,
    settings: RwLock<ToolSettings>,
}

impl FileToolSettings {
    /// Settings at the default location in the app data directory.
    pub fn load_default() -> Self {
        Self::load_or_default(crate::data_dir().join("tool_settings.json"))
    }

    /// Load from `path`, starting empty when the file is missing or unreadable.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = read_settings(&path).unwrap_or_default();
        Self {
            path,
            settings: RwLock::new(settings),
        }
    }

    /// Set (or replace) the override for a tool and persist.
    pub fn set_override(&self, tool_id: &str, value: ToolOverride) {
        let snapshot = {
            let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
            settings.insert(tool_id.to_string(), value);
            settings.clone()
        };
        tracing::info!(tool = tool_id, "tool override updated");
        self.save(snapshot);
    }

    /// Remove a tool's override. Returns whether one existed.
    pub fn clear_override(&self, tool_id: &str) -> bool {
        let (removed, snapshot) = {
            let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
            let removed = settings.remove(tool_id).is_some();
            (removed, settings.clone())
        };
        if removed {
            tracing::info!(tool = tool_id, "tool override cleared");
            self.save(snapshot);
        }
        removed
    }

    fn save(&self, tools: ToolSettings) {
        let persisted = PersistedSettings { version: 1, tools };
        let content = match serde_json::to_string_pretty(&persisted) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize tool settings");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let tmp_path = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &content) {
            tracing::error!(error = %e, "failed to write tool settings temp file");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            tracing::error!(error = %e, "failed to rename tool settings file");
            return;
        }
        tracing::debug!(path = %self.path.display(), "saved tool settings");
    }
}

impl ToolSettingsProvider for FileToolSettings {
    fn tool_settings(&self) -> ToolSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn read_settings(path: &Path) -> Option<ToolSettings> {
    if !path.exists() {
        return None;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read tool settings");
            return None;
        }
    };
    match serde_json::from_str::<PersistedSettings>(&content) {
        Ok(persisted) => {
            tracing::info!(
                count = persisted.tools.len(),
                path = %path.display(),
                "loaded tool settings"
            );
            Some(persisted.tools)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "failed to parse tool settings, starting fresh"
            );
            None
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
