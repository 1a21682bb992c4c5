//! Session state and session storage.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::llm::ChatTurn;

/// Upper bound on how often the reaper wakes up.
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// A single chat session.
///
/// Cloning is cheap; clones share the same history.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    id: String,
    turns: RwLock<Vec<ChatTurn>>,
    last_activity: RwLock<DateTime<Utc>>,
    /// Held for the lifetime of one turn's response stream.
    turn_lock: Arc<Mutex<()>>,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                turns: RwLock::new(Vec::new()),
                last_activity: RwLock::new(Utc::now()),
                turn_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Wait for earlier turns to finish and claim the session.
    ///
    /// Turns are served in the order they called this method. The claim is
    /// released when the guard is dropped.
    pub async fn begin_turn(&self) -> OwnedMutexGuard<()> {
        let guard = Arc::clone(&self.inner.turn_lock).lock_owned().await;
        self.touch();
        guard
    }

    /// Whether a turn currently holds the session.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.turn_lock.try_lock().is_err()
    }

    /// Append a turn to the history.
    pub fn push_turn(&self, turn: ChatTurn) {
        self.inner
            .turns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(turn);
        self.touch();
    }

    /// Snapshot of the history.
    #[must_use]
    pub fn turns(&self) -> Vec<ChatTurn> {
        self.inner
            .turns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn touch(&self) {
        *self
            .inner
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Check if the session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        let last = *self
            .inner
            .last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        // Negative durations (clock skew) never expire.
        (Utc::now() - last)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }
}

/// Thread-safe store for sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

#[derive(Debug)]
struct SessionStoreInner {
    sessions: RwLock<HashMap<String, Session>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Create a new session store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionStoreInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Get a session by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Get a session by ID, creating it if it doesn't exist.
    #[must_use]
    pub fn get_or_create(&self, id: &str) -> Session {
        let mut guard = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::info!(name: "session.created", session_id = %id, "Session created");
                Session::new(id.to_string())
            })
            .clone()
    }

    /// Remove a session by ID.
    pub fn remove(&self, id: &str) -> Option<Session> {
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Get the number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove idle sessions. Sessions with a turn in flight are kept.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|_, session| session.is_busy() || !session.is_expired_with_timeout(timeout));
        before - guard.len()
    }

    /// Periodically evict sessions idle longer than `timeout`.
    pub fn spawn_reaper(&self, timeout: Duration) -> JoinHandle<()> {
        let store = self.clone();
        let period = timeout.clamp(Duration::from_secs(1), MAX_REAP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.cleanup_expired_with_timeout(timeout);
                if removed > 0 {
                    tracing::info!(
                        name: "session.reaped",
                        removed,
                        remaining = store.len(),
                        "Expired sessions removed"
                    );
                }
            }
        })
    }
}
