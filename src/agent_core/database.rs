//! SQLite-backed [`SessionStore`].
//!
//! Uses `rusqlite` synchronously behind a mutex; every call is short.
//! WAL mode is enabled so a UI process can read history while a turn runs.
//! Tool calls live inside their assistant message as a JSON column.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::errors::AgentError;
use super::store::SessionStore;
use super::types::{ConversationMessage, Role, Session, ToolCall, ToolCallPatch};

// ─── Database ───────────────────────────────────────────────────────────────

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) the database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        if path != ":memory:" {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| AgentError::DatabaseError {
                    reason: format!("failed to create {}: {e}", parent.display()),
                })?;
            }
        }
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables()?;
        tracing::debug!(path, "session database opened");
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn create_tables(&self) -> Result<(), AgentError> {
        self.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                working_directory TEXT,
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                reasoning TEXT,
                tool_calls TEXT NOT NULL DEFAULT '[]',
                tool_call_id TEXT,
                images TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id, seq);
            ",
        )?;
        Ok(())
    }
}

/// Message columns as stored, before JSON and timestamp decoding.
struct MessageRow {
    id: String,
    session_id: String,
    role: String,
    content: String,
    reasoning: Option<String>,
    tool_calls: String,
    tool_call_id: Option<String>,
    images: String,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            reasoning: row.get(4)?,
            tool_calls: row.get(5)?,
            tool_call_id: row.get(6)?,
            images: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<ConversationMessage, AgentError> {
        let role = Role::parse(&self.role).ok_or_else(|| AgentError::DatabaseError {
            reason: format!("unknown role '{}' in message {}", self.role, self.id),
        })?;
        Ok(ConversationMessage {
            role,
            tool_calls: serde_json::from_str(&self.tool_calls)?,
            images: serde_json::from_str(&self.images)?,
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            session_id: self.session_id,
            content: self.content,
            reasoning: self.reasoning,
            tool_call_id: self.tool_call_id,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AgentError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AgentError::DatabaseError {
            reason: format!("invalid timestamp '{value}': {e}"),
        })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, session: Session) -> Result<(), AgentError> {
        self.lock().execute(
            "INSERT INTO sessions (id, working_directory, created_at, last_activity)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                working_directory = excluded.working_directory,
                last_activity = excluded.last_activity",
            params![
                session.id,
                session.working_directory,
                session.created_at.to_rfc3339(),
                session.last_activity.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        let row = self
            .lock()
            .query_row(
                "SELECT id, working_directory, created_at, last_activity
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, working_directory, created_at, last_activity)| {
            Ok(Session {
                id,
                working_directory,
                created_at: parse_timestamp(&created_at)?,
                last_activity: parse_timestamp(&last_activity)?,
            })
        })
        .transpose()
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<ConversationMessage>, AgentError> {
        let rows = {
            let conn = self.lock();
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                params![session_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(AgentError::SessionNotFound {
                    session_id: session_id.to_string(),
                });
            }

            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, reasoning,
                        tool_calls, tool_call_id, images, created_at
                 FROM messages
                 WHERE session_id = ?1
                 ORDER BY seq ASC",
            )?;
            let mapped = stmt.query_map(params![session_id], MessageRow::from_row)?;
            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row?);
            }
            rows
        };
        rows.into_iter().map(MessageRow::decode).collect()
    }

    async fn append_message(&self, message: ConversationMessage) -> Result<(), AgentError> {
        let tool_calls = serde_json::to_string(&message.tool_calls)?;
        let images = serde_json::to_string(&message.images)?;
        let conn = self.lock();
        let touched = conn.execute(
            "UPDATE sessions SET last_activity = ?2 WHERE id = ?1",
            params![message.session_id, Utc::now().to_rfc3339()],
        )?;
        if touched == 0 {
            return Err(AgentError::SessionNotFound {
                session_id: message.session_id,
            });
        }
        conn.execute(
            "INSERT INTO messages
             (id, session_id, role, content, reasoning, tool_calls, tool_call_id, images, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.session_id,
                message.role.as_str(),
                message.content,
                message.reasoning,
                tool_calls,
                message.tool_call_id,
                images,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update_tool_call(
        &self,
        session_id: &str,
        message_id: &str,
        call_id: &str,
        patch: &ToolCallPatch,
    ) -> Result<ToolCall, AgentError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT tool_calls FROM messages WHERE id = ?1 AND session_id = ?2",
                params![message_id, session_id],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| AgentError::MessageNotFound {
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
        })?;

        let mut calls: Vec<ToolCall> = serde_json::from_str(&raw)?;
        let call = calls
            .iter_mut()
            .find(|c| c.id == call_id)
            .ok_or_else(|| AgentError::ToolCallNotFound {
                message_id: message_id.to_string(),
                call_id: call_id.to_string(),
            })?;
        patch.apply(call)?;
        let updated = call.clone();

        tx.execute(
            "UPDATE messages SET tool_calls = ?2 WHERE id = ?1",
            params![message_id, serde_json::to_string(&calls)?],
        )?;
        tx.commit()?;
        Ok(updated)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, AgentError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )?;
        let removed = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(removed > 0)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agent_core::types::{Approval, ToolCallStatus};
    use crate::tools::{ToolOutput, ToolResult};

    fn test_db() -> SqliteSessionStore {
        SqliteSessionStore::open(":memory:").unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let db = test_db();
        db.create_session(Session::new("s1", Some("/work".into())))
            .await
            .unwrap();

        let session = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.working_directory.as_deref(), Some("/work"));
        assert!(db.get_session("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_messages_round_trip_in_order() {
        let db = test_db();
        db.create_session(Session::new("s1", None)).await.unwrap();
        db.append_message(ConversationMessage::user("s1", "list files"))
            .await
            .unwrap();
        let call = ToolCall::new("c1", "list_directory", json!({"path": "."}));
        db.append_message(ConversationMessage::assistant(
            "s1",
            "m2",
            "Looking.",
            Some("need a listing".into()),
            vec![call],
        ))
        .await
        .unwrap();
        db.append_message(ConversationMessage::tool_result("s1", "c1", "src/"))
            .await
            .unwrap();

        let messages = db.messages("s1").await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].reasoning.as_deref(), Some("need a listing"));
        assert_eq!(messages[1].tool_calls[0].tool_id, "list_directory");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_update_tool_call_persists() {
        let db = test_db();
        db.create_session(Session::new("s1", None)).await.unwrap();
        db.append_message(ConversationMessage::assistant(
            "s1",
            "m1",
            "",
            None,
            vec![ToolCall::new("c1", "bash", json!({"command": "ls"}))],
        ))
        .await
        .unwrap();

        db.update_tool_call(
            "s1",
            "m1",
            "c1",
            &ToolCallPatch::status(ToolCallStatus::AwaitingConfirmation).with_permission("p1"),
        )
        .await
        .unwrap();
        db.update_tool_call("s1", "m1", "c1", &ToolCallPatch::approval(Approval::Granted))
            .await
            .unwrap();
        db.update_tool_call("s1", "m1", "c1", &ToolCallPatch::status(ToolCallStatus::Executing))
            .await
            .unwrap();
        db.update_tool_call(
            "s1",
            "m1",
            "c1",
            &ToolCallPatch::finished(ToolResult::ok(ToolOutput::text("a\nb"))),
        )
        .await
        .unwrap();

        let call = &db.messages("s1").await.unwrap()[0].tool_calls[0];
        assert_eq!(call.status, ToolCallStatus::Completed);
        assert_eq!(call.approval, Some(Approval::Granted));
        assert_eq!(call.permission_id.as_deref(), Some("p1"));
        assert_eq!(call.result.as_ref().unwrap().output, "a\nb");

        let err = db
            .update_tool_call("s1", "m1", "c1", &ToolCallPatch::status(ToolCallStatus::Cancelled))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_session_errors() {
        let db = test_db();
        let err = db
            .append_message(ConversationMessage::user("ghost", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound { .. }));
        assert!(matches!(
            db.messages("ghost").await.unwrap_err(),
            AgentError::SessionNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_delete_session_removes_messages() {
        let db = test_db();
        db.create_session(Session::new("s1", None)).await.unwrap();
        db.append_message(ConversationMessage::user("s1", "hi"))
            .await
            .unwrap();
        assert!(db.delete_session("s1").await.unwrap());
        assert!(!db.delete_session("s1").await.unwrap());

        db.create_session(Session::new("s1", None)).await.unwrap();
        assert!(db.messages("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/agent.db");
        let path = path.to_str().unwrap();
        {
            let db = SqliteSessionStore::open(path).unwrap();
            db.create_session(Session::new("s1", None)).await.unwrap();
        }
        let db = SqliteSessionStore::open(path).unwrap();
        assert!(db.get_session("s1").await.unwrap().is_some());
    }
}
