//! Per-session abort controllers.
//!
//! At most one controller exists per session. A controller lives from the
//! start of a turn until the turn reaches DONE, FAILED or CANCELLED; a turn
//! paused for confirmation keeps its controller so `cancel` can still reach it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ActiveTurn {
    pub turn_id: u64,
    pub abort: CancellationToken,
    /// Set while a drive of this turn is executing (not while paused).
    running: Arc<AtomicBool>,
}

impl ActiveTurn {
    /// Claim the turn for one drive. Returns `None` if another drive holds it.
    pub fn claim(&self) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the running flag on drop.
#[derive(Debug)]
pub struct RunningGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub struct ActiveTurns {
    turns: Mutex<HashMap<String, ActiveTurn>>,
    next_id: AtomicU64,
}

impl ActiveTurns {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveTurn>> {
        self.turns.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The session's controller, creating one if none exists.
    pub fn get_or_begin(&self, session_id: &str) -> ActiveTurn {
        self.lock()
            .entry(session_id.to_string())
            .or_insert_with(|| ActiveTurn {
                turn_id: self.next_id.fetch_add(1, Ordering::Relaxed),
                abort: CancellationToken::new(),
                running: Arc::new(AtomicBool::new(false)),
            })
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<ActiveTurn> {
        self.lock().get(session_id).cloned()
    }

    /// Remove the controller if it still belongs to `turn_id`.
    pub fn finish(&self, session_id: &str, turn_id: u64) -> bool {
        let mut turns = self.lock();
        match turns.get(session_id) {
            Some(turn) if turn.turn_id == turn_id => {
                turns.remove(session_id);
                true
            }
            _ => false,
        }
    }

    /// Remove the controller and fire its abort token.
    pub fn cancel(&self, session_id: &str) -> bool {
        let removed = self.lock().remove(session_id);
        match removed {
            Some(turn) => {
                turn.abort.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }
}
