//! Permission Gate: blocking ask/respond protocol keyed by request id.
//!
//! `ask()` records a [`PermissionRequest`] and hands back a
//! [`PermissionTicket`]. Awaiting the ticket parks the caller on a oneshot
//! channel until `respond()` or `clear_session()` resolves it. Nothing polls.
//!
//! Requests carry no expiry unless the gate is built with a timeout.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use super::errors::PermissionError;
use super::types::{NewPermissionRequest, PermissionRequest, PermissionResponse};

type Verdict = Result<(), PermissionError>;

// ─── Ticket ─────────────────────────────────────────────────────────────────

/// Handle to a pending permission request.
///
/// Await it (directly or via [`PermissionTicket::wait`]) to block until the
/// request is answered. Dropping it leaves the request pending in the gate.
#[must_use = "a permission ticket resolves nothing unless awaited"]
#[derive(Debug)]
pub struct PermissionTicket {
    id: String,
    receiver: oneshot::Receiver<Verdict>,
    timeout: Option<Duration>,
}

impl PermissionTicket {
    /// Id of the request this ticket waits on.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the request to be answered.
    pub async fn wait(self) -> Verdict {
        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.receiver).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(PermissionError::TimedOut {
                        secs: limit.as_secs(),
                    })
                }
            },
            None => self.receiver.await,
        };
        received.unwrap_or(Err(PermissionError::ChannelClosed))
    }
}

impl IntoFuture for PermissionTicket {
    type Output = Verdict;
    type IntoFuture = BoxFuture<'static, Verdict>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}

// ─── Gate ───────────────────────────────────────────────────────────────────

struct PendingEntry {
    request: PermissionRequest,
    /// Insertion order; breaks ties between equal `created_at` stamps.
    seq: u64,
    responder: oneshot::Sender<Verdict>,
}

/// Holds every unresolved permission request, across sessions.
pub struct PermissionGate {
    pending: Mutex<HashMap<String, PendingEntry>>,
    next_seq: AtomicU64,
    timeout: Option<Duration>,
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionGate {
    /// A gate whose requests wait indefinitely.
    pub fn new() -> Self {
        Self::with_timeout(None)
    }

    /// A gate whose requests expire after `timeout`, if set.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            timeout,
        }
    }

    /// Record a new request and return a ticket that resolves on `respond()`.
    ///
    /// An unresolved request for the same (session, call) is superseded, so
    /// each tool call has at most one pending request.
    pub fn ask(&self, new: NewPermissionRequest) -> PermissionTicket {
        let (responder, receiver) = oneshot::channel();
        let now = Utc::now();
        let expires_at = self
            .timeout
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| now + t);

        let request = PermissionRequest {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: new.session_id,
            message_id: new.message_id,
            call_id: new.call_id,
            kind: new.kind,
            pattern: new.pattern,
            title: new.title,
            metadata: new.metadata,
            created_at: now,
            expires_at,
            resolved: false,
        };

        let mut pending = self.lock();
        prune_expired(&mut pending);

        let stale: Vec<String> = pending
            .values()
            .filter(|e| {
                e.request.session_id == request.session_id && e.request.call_id == request.call_id
            })
            .map(|e| e.request.id.clone())
            .collect();
        for id in stale {
            if let Some(entry) = pending.remove(&id) {
                tracing::debug!(
                    permission_id = %id,
                    call_id = %request.call_id,
                    "superseding pending permission request"
                );
                let _ = entry.responder.send(Err(PermissionError::Superseded));
            }
        }

        tracing::info!(
            permission_id = %request.id,
            session_id = %request.session_id,
            call_id = %request.call_id,
            kind = ?request.kind,
            title = %request.title,
            "permission requested"
        );

        let id = request.id.clone();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        pending.insert(
            id.clone(),
            PendingEntry {
                request,
                seq,
                responder,
            },
        );

        PermissionTicket {
            id,
            receiver,
            timeout: self.timeout,
        }
    }

    /// Resolve a pending request. Returns `false` (and changes nothing) for an
    /// unknown id or an id that belongs to another session.
    pub fn respond(
        &self,
        session_id: &str,
        permission_id: &str,
        response: PermissionResponse,
    ) -> bool {
        let entry = {
            let mut pending = self.lock();
            prune_expired(&mut pending);
            match pending.get(permission_id) {
                Some(entry) if entry.request.session_id == session_id => {
                    pending.remove(permission_id)
                }
                Some(_) => {
                    tracing::warn!(
                        permission_id,
                        session_id,
                        "permission response from a different session ignored"
                    );
                    return false;
                }
                None => {
                    tracing::debug!(permission_id, "permission response for unknown request");
                    return false;
                }
            }
        };
        let Some(mut entry) = entry else {
            return false;
        };
        entry.request.resolved = true;

        tracing::info!(
            permission_id,
            session_id,
            response = ?response,
            "permission resolved"
        );

        let verdict = match response {
            PermissionResponse::Allow => Ok(()),
            PermissionResponse::Deny => Err(PermissionError::Denied),
            PermissionResponse::Reject { message } => Err(PermissionError::Rejected { message }),
        };
        if entry.responder.send(verdict).is_err() {
            tracing::debug!(permission_id, "permission waiter already dropped");
        }
        true
    }

    /// Unresolved requests for a session, oldest first.
    pub fn get_pending(&self, session_id: &str) -> Vec<PermissionRequest> {
        let mut pending = self.lock();
        prune_expired(&mut pending);

        let mut entries: Vec<&PendingEntry> = pending
            .values()
            .filter(|e| e.request.session_id == session_id)
            .collect();
        entries.sort_by(|a, b| {
            a.request
                .created_at
                .cmp(&b.request.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|e| e.request.clone()).collect()
    }

    /// Look up one unresolved request.
    pub fn pending_request(&self, session_id: &str, permission_id: &str) -> Option<PermissionRequest> {
        let mut pending = self.lock();
        prune_expired(&mut pending);
        pending
            .get(permission_id)
            .filter(|e| e.request.session_id == session_id)
            .map(|e| e.request.clone())
    }

    /// Reject and remove every pending request of a session.
    ///
    /// Returns the number of requests cleared.
    pub fn clear_session(&self, session_id: &str) -> usize {
        let cleared: Vec<PendingEntry> = {
            let mut pending = self.lock();
            let ids: Vec<String> = pending
                .values()
                .filter(|e| e.request.session_id == session_id)
                .map(|e| e.request.id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        let count = cleared.len();
        for entry in cleared {
            let _ = entry.responder.send(Err(PermissionError::Cleared));
        }
        if count > 0 {
            tracing::info!(session_id, cleared = count, "session permission requests cleared");
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drop requests whose deadline has passed, failing their waiters.
fn prune_expired(pending: &mut HashMap<String, PendingEntry>) {
    let now = Utc::now();
    let expired: Vec<String> = pending
        .values()
        .filter(|e| e.request.expires_at.is_some_and(|at| at <= now))
        .map(|e| e.request.id.clone())
        .collect();

    for id in expired {
        if let Some(entry) = pending.remove(&id) {
            let secs = entry
                .request
                .expires_at
                .map(|at| (at - entry.request.created_at).num_seconds().max(0) as u64)
                .unwrap_or_default();
            tracing::warn!(permission_id = %id, "permission request expired");
            let _ = entry.responder.send(Err(PermissionError::TimedOut { secs }));
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use super::*;
    use crate::sandbox::types::PermissionKind;

    fn request(session: &str, call: &str) -> NewPermissionRequest {
        NewPermissionRequest {
            session_id: session.into(),
            message_id: "msg-1".into(),
            call_id: call.into(),
            kind: PermissionKind::ToolExecution,
            pattern: vec!["bash".into()],
            title: "Run bash".into(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_ticket_stays_pending_until_respond() {
        let gate = PermissionGate::new();
        let ticket = gate.ask(request("s1", "c1"));
        let id = ticket.id().to_string();
        let mut waiting = ticket.into_future();

        assert!(matches!(futures::poll!(&mut waiting), Poll::Pending));
        assert!(gate.respond("s1", &id, PermissionResponse::Allow));
        assert_eq!(waiting.await, Ok(()));
        assert!(gate.get_pending("s1").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_leaves_pending_untouched() {
        let gate = PermissionGate::new();
        let ticket = gate.ask(request("s1", "c1"));
        let id = ticket.id().to_string();
        let mut waiting = ticket.into_future();

        assert!(!gate.respond("s1", "no-such-id", PermissionResponse::Allow));
        assert!(!gate.respond("s2", &id, PermissionResponse::Allow));
        assert!(matches!(futures::poll!(&mut waiting), Poll::Pending));
        assert_eq!(gate.get_pending("s1").len(), 1);
    }

    #[tokio::test]
    async fn test_deny_and_reject_fail_the_waiter() {
        let gate = PermissionGate::new();

        let denied = gate.ask(request("s1", "c1"));
        let id = denied.id().to_string();
        gate.respond("s1", &id, PermissionResponse::Deny);
        assert_eq!(denied.await, Err(PermissionError::Denied));

        let rejected = gate.ask(request("s1", "c2"));
        let id = rejected.id().to_string();
        gate.respond(
            "s1",
            &id,
            PermissionResponse::Reject {
                message: "not there".into(),
            },
        );
        assert_eq!(
            rejected.await,
            Err(PermissionError::Rejected {
                message: "not there".into()
            })
        );
    }

    #[tokio::test]
    async fn test_respond_twice_only_first_wins() {
        let gate = PermissionGate::new();
        let ticket = gate.ask(request("s1", "c1"));
        let id = ticket.id().to_string();
        assert!(gate.respond("s1", &id, PermissionResponse::Allow));
        assert!(!gate.respond("s1", &id, PermissionResponse::Deny));
        assert_eq!(ticket.await, Ok(()));
    }

    #[test]
    fn test_get_pending_is_ordered_and_scoped() {
        let gate = PermissionGate::new();
        let first = gate.ask(request("s1", "c1"));
        let _other = gate.ask(request("s2", "c9"));
        let second = gate.ask(request("s1", "c2"));

        let pending = gate.get_pending("s1");
        let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
        assert!(pending.iter().all(|r| !r.resolved));
    }

    #[tokio::test]
    async fn test_clear_session_rejects_everything() {
        let gate = PermissionGate::new();
        let a = gate.ask(request("s1", "c1"));
        let b = gate.ask(request("s1", "c2"));
        let keep = gate.ask(request("s2", "c3"));
        let a_id = a.id().to_string();

        assert_eq!(gate.clear_session("s1"), 2);
        assert_eq!(a.await, Err(PermissionError::Cleared));
        assert_eq!(b.await, Err(PermissionError::Cleared));
        assert!(!gate.respond("s1", &a_id, PermissionResponse::Allow));
        assert!(gate.pending_request("s2", keep.id()).is_some());
    }

    #[tokio::test]
    async fn test_reasking_same_call_supersedes() {
        let gate = PermissionGate::new();
        let old = gate.ask(request("s1", "c1"));
        let new = gate.ask(request("s1", "c1"));

        assert_eq!(gate.get_pending("s1").len(), 1);
        assert!(gate.pending_request("s1", new.id()).is_some());
        assert_eq!(old.await, Err(PermissionError::Superseded));
    }

    #[tokio::test]
    async fn test_timeout_expires_request() {
        let gate = PermissionGate::with_timeout(Some(Duration::from_millis(20)));
        let ticket = gate.ask(request("s1", "c1"));
        let id = ticket.id().to_string();

        assert!(matches!(ticket.await, Err(PermissionError::TimedOut { .. })));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(gate.get_pending("s1").is_empty());
        assert!(!gate.respond("s1", &id, PermissionResponse::Allow));
    }
}
