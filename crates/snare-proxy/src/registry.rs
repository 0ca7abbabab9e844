use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::AbortHandle;

/// Set-semantics registry of live session tasks. Sessions remove
/// themselves on completion; shutdown aborts whatever is left.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u64, AbortHandle>>,
}

impl SessionRegistry {
    pub fn insert(&self, session_id: u64, handle: AbortHandle) {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .insert(session_id, handle);
    }

    pub fn remove(&self, session_id: u64) {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .remove(&session_id);
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .expect("session registry lock poisoned")
            .len()
    }

    /// Cancellation broadcast: abort every registered session task.
    /// Aborting an already-finished task is a no-op.
    pub fn abort_all(&self) {
        let handles: Vec<AbortHandle> = {
            let mut sessions = self
                .sessions
                .lock()
                .expect("session registry lock poisoned");
            sessions.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.abort();
        }
    }
}
