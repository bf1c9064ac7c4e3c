//! Session persistence seam.
//!
//! The tool loop keeps no conversation state of its own between calls; a
//! paused turn is rebuilt entirely from what the store returns.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::errors::AgentError;
use super::types::{ConversationMessage, Session, ToolCall, ToolCallPatch};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: Session) -> Result<(), AgentError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AgentError>;

    /// Messages of a session in insertion order.
    async fn messages(&self, session_id: &str) -> Result<Vec<ConversationMessage>, AgentError>;

    async fn append_message(&self, message: ConversationMessage) -> Result<(), AgentError>;

    /// Apply `patch` to one stored tool call and return the updated call.
    async fn update_tool_call(
        &self,
        session_id: &str,
        message_id: &str,
        call_id: &str,
        patch: &ToolCallPatch,
    ) -> Result<ToolCall, AgentError>;

    /// Remove a session and its messages. Returns whether it existed.
    async fn delete_session(&self, session_id: &str) -> Result<bool, AgentError>;
}

// ─── In-memory store ────────────────────────────────────────────────────────

struct SessionRecord {
    session: Session,
    messages: Vec<ConversationMessage>,
}

/// Volatile store for embedding and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, session: Session) -> Result<(), AgentError> {
        let mut sessions = self.lock();
        match sessions.get_mut(&session.id) {
            // Re-creating keeps history; only metadata is refreshed.
            Some(existing) => {
                existing.session.working_directory = session.working_directory;
                existing.session.last_activity = session.last_activity;
            }
            None => {
                sessions.insert(
                    session.id.clone(),
                    SessionRecord {
                        session,
                        messages: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        Ok(self.lock().get(session_id).map(|r| r.session.clone()))
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<ConversationMessage>, AgentError> {
        self.lock()
            .get(session_id)
            .map(|r| r.messages.clone())
            .ok_or_else(|| AgentError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn append_message(&self, message: ConversationMessage) -> Result<(), AgentError> {
        let mut sessions = self.lock();
        let record =
            sessions
                .get_mut(&message.session_id)
                .ok_or_else(|| AgentError::SessionNotFound {
                    session_id: message.session_id.clone(),
                })?;
        record.session.last_activity = Utc::now();
        record.messages.push(message);
        Ok(())
    }

    async fn update_tool_call(
        &self,
        session_id: &str,
        message_id: &str,
        call_id: &str,
        patch: &ToolCallPatch,
    ) -> Result<ToolCall, AgentError> {
        let mut sessions = self.lock();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| AgentError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let message = record
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| AgentError::MessageNotFound {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
            })?;
        let call = message
            .tool_calls
            .iter_mut()
            .find(|c| c.id == call_id)
            .ok_or_else(|| AgentError::ToolCallNotFound {
                message_id: message_id.to_string(),
                call_id: call_id.to_string(),
            })?;
        patch.apply(call)?;
        Ok(call.clone())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, AgentError> {
        Ok(self.lock().remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agent_core::types::ToolCallStatus;

    #[tokio::test]
    async fn test_append_requires_session() {
        let store = MemorySessionStore::new();
        let err = store
            .append_message(ConversationMessage::user("missing", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_tool_call_in_place() {
        let store = MemorySessionStore::new();
        store.create_session(Session::new("s1", None)).await.unwrap();
        let call = ToolCall::new("c1", "bash", json!({"command": "ls"}));
        store
            .append_message(ConversationMessage::assistant("s1", "m1", "", None, vec![call]))
            .await
            .unwrap();

        let updated = store
            .update_tool_call(
                "s1",
                "m1",
                "c1",
                &ToolCallPatch::status(ToolCallStatus::AwaitingConfirmation).with_permission("p1"),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ToolCallStatus::AwaitingConfirmation);

        let stored = store.messages("s1").await.unwrap();
        assert_eq!(stored[0].tool_calls[0].permission_id.as_deref(), Some("p1"));

        let missing = store
            .update_tool_call("s1", "m1", "nope", &ToolCallPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, AgentError::ToolCallNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_session() {
        let store = MemorySessionStore::new();
        store.create_session(Session::new("s1", None)).await.unwrap();
        assert!(store.delete_session("s1").await.unwrap());
        assert!(!store.delete_session("s1").await.unwrap());
        assert!(store.get_session("s1").await.unwrap().is_none());
    }
}
