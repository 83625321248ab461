//! Process-wide state correlation registry
//!
//! Maps the single-use `state` token of an outstanding interactive
//! authorization to the session that issued it. Sessions write entries;
//! the callback handler removes them. [`StateRegistry::take_if_present`] is
//! the only way to consume an entry and it removes under the same lock it
//! reads with, so a state can be redeemed at most once.
//!
//! Entries carry a time-to-live. Lookups refuse stale entries and
//! [`StateRegistry::spawn_sweeper`] removes abandoned ones periodically.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::pkce::state_prefix;
use crate::auth::types::AuthRequirement;

/// One outstanding interactive authorization
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    /// Single-use correlator
    pub state: String,

    /// Session that issued the request
    pub session_id: String,

    /// Requirement being satisfied
    pub requirement: AuthRequirement,

    /// PKCE verifier to present with the authorization code
    pub code_verifier: String,

    /// When the entry was registered
    pub created_at: Instant,
}

/// Shared `state -> PendingAuthorization` map with expiry
#[derive(Debug)]
pub struct StateRegistry {
    entries: Mutex<HashMap<String, PendingAuthorization>>,
    ttl: Duration,
}

impl StateRegistry {
    /// Creates an empty registry whose entries live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_stale(&self, pending: &PendingAuthorization, now: Instant) -> bool {
        now.duration_since(pending.created_at) >= self.ttl
    }

    /// Registers a pending authorization
    ///
    /// Returns `false` without modifying anything when a live entry already
    /// uses the same state token.
    pub fn put(
        &self,
        state: impl Into<String>,
        session_id: impl Into<String>,
        requirement: AuthRequirement,
        code_verifier: impl Into<String>,
    ) -> bool {
        let state = state.into();
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&state) {
            if !self.is_stale(existing, now) {
                return false;
            }
        }
        let pending = PendingAuthorization {
            state: state.clone(),
            session_id: session_id.into(),
            requirement,
            code_verifier: code_verifier.into(),
            created_at: now,
        };
        entries.insert(state, pending);
        true
    }

    /// Atomically removes and returns the entry for `state`
    ///
    /// Returns `None` for unknown, already consumed, or expired states. An
    /// expired entry is removed as a side effect.
    pub fn take_if_present(&self, state: &str) -> Option<PendingAuthorization> {
        let pending = self.entries.lock().remove(state)?;
        if self.is_stale(&pending, Instant::now()) {
            tracing::debug!(
                state = state_prefix(state),
                "Discarded expired pending authorization"
            );
            return None;
        }
        Some(pending)
    }

    /// Like [`take_if_present`](Self::take_if_present), but only consumes an
    /// entry owned by `session_id`
    ///
    /// An entry owned by another session is left untouched.
    pub fn take_for_session(&self, state: &str, session_id: &str) -> Option<PendingAuthorization> {
        let mut entries = self.entries.lock();
        match entries.get(state) {
            Some(pending) if pending.session_id == session_id => {}
            _ => return None,
        }
        let pending = entries.remove(state)?;
        drop(entries);
        if self.is_stale(&pending, Instant::now()) {
            return None;
        }
        Some(pending)
    }

    /// Removes the entry for `state` without returning it
    pub fn remove(&self, state: &str) -> bool {
        self.entries.lock().remove(state).is_some()
    }

    /// Removes every entry owned by `session_id`
    pub fn remove_session(&self, session_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, pending| pending.session_id != session_id);
        before - entries.len()
    }

    /// Removes expired entries and returns how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, pending| !self.is_stale(pending, now));
        before - entries.len()
    }

    /// Whether a live entry exists for `state`
    pub fn contains(&self, state: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(state)
            .is_some_and(|pending| !self.is_stale(pending, now))
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Spawns a task sweeping expired entries every `interval`
    ///
    /// The task ends when `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired pending authorizations");
                        }
                    }
                }
            }
            tracing::debug!("State registry sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement() -> AuthRequirement {
        AuthRequirement::delegated(["create_bookings"], "booking_api").unwrap()
    }

    #[test]
    fn test_take_if_present_returns_entry_once() {
        let registry = StateRegistry::new(Duration::from_secs(600));
        assert!(registry.put("abc123", "session-1", requirement(), "verifier"));

        let first = registry.take_if_present("abc123").expect("first take succeeds");
        assert_eq!(first.session_id, "session-1");
        assert_eq!(first.code_verifier, "verifier");
        assert_eq!(first.requirement, requirement());

        assert!(registry.take_if_present("abc123").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_state_is_absent() {
        let registry = StateRegistry::new(Duration::from_secs(600));
        assert!(registry.take_if_present("expired-or-unknown").is_none());
    }

    #[test]
    fn test_put_refuses_live_duplicate_state() {
        let registry = StateRegistry::new(Duration::from_secs(600));
        assert!(registry.put("dup", "session-1", requirement(), "v1"));
        assert!(!registry.put("dup", "session-2", requirement(), "v2"));

        let pending = registry.take_if_present("dup").unwrap();
        assert_eq!(pending.session_id, "session-1");
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_returned() {
        let registry = StateRegistry::new(Duration::from_millis(30));
        registry.put("old", "session-1", requirement(), "v");
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!registry.contains("old"));
        assert!(registry.take_if_present("old").is_none());
        assert!(registry.is_empty(), "lazy expiry removes the entry");
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_entries() {
        let registry = StateRegistry::new(Duration::from_millis(50));
        registry.put("old", "session-1", requirement(), "v");
        tokio::time::sleep(Duration::from_millis(80)).await;
        registry.put("new", "session-1", requirement(), "v");

        assert_eq!(registry.sweep_expired(), 1);
        assert!(registry.contains("new"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_take_for_session_leaves_foreign_entries() {
        let registry = StateRegistry::new(Duration::from_secs(600));
        registry.put("s1", "session-1", requirement(), "v");

        assert!(registry.take_for_session("s1", "session-2").is_none());
        assert!(registry.contains("s1"));

        let pending = registry.take_for_session("s1", "session-1").unwrap();
        assert_eq!(pending.state, "s1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_session_only_touches_that_session() {
        let registry = StateRegistry::new(Duration::from_secs(600));
        registry.put("a", "session-1", requirement(), "v");
        registry.put("b", "session-1", requirement(), "v");
        registry.put("c", "session-2", requirement(), "v");

        assert_eq!(registry.remove_session("session-1"), 2);
        assert!(registry.contains("c"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_takes_succeed_exactly_once() {
        let registry = Arc::new(StateRegistry::new(Duration::from_secs(600)));
        registry.put("race", "session-1", requirement(), "v");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.take_if_present("race").is_some())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_sweeper_runs_and_stops_on_cancel() {
        let registry = Arc::new(StateRegistry::new(Duration::from_millis(20)));
        registry.put("old", "session-1", requirement(), "v");

        let shutdown = CancellationToken::new();
        let handle = registry.spawn_sweeper(Duration::from_millis(10), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(registry.is_empty());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper stops after cancellation")
            .unwrap();
    }
}
