//! Exclusive per-session locks.
//!
//! Each session identifier has one lock held for the full duration of a run,
//! which keeps at most one agent invocation in flight per session. Guards
//! release on drop, so the lock is freed on every exit path including panics
//! in code the engine calls.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    freed: Condvar,
}

/// Registry of session locks, cheap to clone and share.
#[derive(Clone, Default)]
pub struct SessionLocks {
    table: Arc<LockTable>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `session_id`, blocking until it is free.
    pub fn acquire(&self, session_id: &str) -> SessionGuard {
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while held.contains(session_id) {
            held = self
                .table
                .freed
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(session_id.to_string());
        SessionGuard {
            session_id: session_id.to_string(),
            table: Arc::clone(&self.table),
        }
    }

    /// Acquire the lock for `session_id` without blocking.
    pub fn try_acquire(&self, session_id: &str) -> Option<SessionGuard> {
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if held.contains(session_id) {
            return None;
        }
        held.insert(session_id.to_string());
        Some(SessionGuard {
            session_id: session_id.to_string(),
            table: Arc::clone(&self.table),
        })
    }

    pub fn is_held(&self, session_id: &str) -> bool {
        self.table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session_id)
    }
}

/// Holds a session lock; dropping it releases the session.
pub struct SessionGuard {
    session_id: String,
    table: Arc<LockTable>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.session_id);
        self.table.freed.notify_all();
    }
}
