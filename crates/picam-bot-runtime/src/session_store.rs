//! Per-user conversation state.
//!
//! One session exists for every authorized username from process start until
//! exit. A single mutex guards the whole mapping; the dispatcher keeps it locked
//! for the full handling of one event.

use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};

/// Conversation state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Waiting for the next command
    #[default]
    Waiting,
}

/// Mutable state of one authorized user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Authorized username
    pub user_id: String,
    /// Current conversation state
    pub status: SessionStatus,
    /// Most recently accepted update identifier
    pub last_update_id: Option<u64>,
}

impl Session {
    /// A fresh session in the waiting state
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            status: SessionStatus::Waiting,
            last_update_id: None,
        }
    }
}

/// Result of presenting an update to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The update is new; carries the session after recording it
    Accepted(Session),
    /// The update id equals the last one accepted for this user
    Duplicate(u64),
    /// No session exists for this user
    UnknownUser,
}

/// Concurrency-safe map of sessions
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create a store with one waiting session per user
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sessions = users
            .into_iter()
            .map(|user| {
                let session = Session::new(user);
                (session.user_id.clone(), session)
            })
            .collect();

        Self {
            sessions: Mutex::new(sessions),
        }
    }

    /// Snapshot of a user's session
    pub async fn get(&self, user_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(user_id).cloned()
    }

    /// Atomically apply `mutator` to a user's session, creating it if missing
    pub async fn upsert<F, R>(&self, user_id: &str, mutator: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(user_id.to_string())
            .or_insert_with(|| Session::new(user_id));
        mutator(session)
    }

    /// Lock the whole mapping for the duration of one event
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            sessions: self.sessions.lock().await,
        }
    }

    /// Number of sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether the store has no sessions
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

/// Exclusive access to all sessions
pub struct SessionGuard<'a> {
    sessions: MutexGuard<'a, HashMap<String, Session>>,
}

impl SessionGuard<'_> {
    /// Session of a user
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&Session> {
        self.sessions.get(user_id)
    }

    /// Record `update_id` for an existing session unless it repeats the last one.
    ///
    /// Duplicates and unknown users leave the store untouched.
    pub fn admit(&mut self, user_id: &str, update_id: u64) -> Admission {
        let Some(session) = self.sessions.get_mut(user_id) else {
            return Admission::UnknownUser;
        };

        if session.last_update_id == Some(update_id) {
            return Admission::Duplicate(update_id);
        }

        session.last_update_id = Some(update_id);
        Admission::Accepted(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_sessions_created_for_all_users() {
        let store = SessionStore::new(["alice", "bob"]);
        assert_eq!(store.len().await, 2);

        let alice = store.get("alice").await;
        assert_eq!(alice, Some(Session::new("alice")));
        assert!(store.get("mallory").await.is_none());
    }

    #[tokio::test]
    async fn test_admit_records_update_id() {
        let store = SessionStore::new(["alice"]);
        let mut guard = store.lock().await;

        let Admission::Accepted(session) = guard.admit("alice", 10) else {
            panic!("first update should be accepted");
        };
        assert_eq!(session.last_update_id, Some(10));
        assert_eq!(guard.admit("alice", 10), Admission::Duplicate(10));
        assert!(matches!(guard.admit("alice", 11), Admission::Accepted(_)));
        assert_eq!(guard.admit("mallory", 1), Admission::UnknownUser);
        drop(guard);

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_is_atomic_read_modify_write() {
        let store = std::sync::Arc::new(SessionStore::new(["alice"]));
        let mut handles = Vec::new();
        for i in 1..=50_u64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert("alice", |s| {
                        let next = s.last_update_id.unwrap_or(0).max(i);
                        s.last_update_id = Some(next);
                    })
                    .await;
            }));
        }
        for handle in handles {
            assert!(handle.await.is_ok());
        }

        let alice = store.get("alice").await;
        assert_eq!(alice.and_then(|s| s.last_update_id), Some(50));
    }

    proptest! {
        #[test]
        fn prop_redelivery_never_mutates(ids in proptest::collection::vec(0_u64..20, 1..40)) {
            let store = SessionStore::new(["alice"]);
            let Ok(sessions) = store.sessions.try_lock() else {
                panic!("fresh store is never locked");
            };
            let mut guard = SessionGuard { sessions };

            for id in ids {
                let before = guard.get("alice").cloned();
                match guard.admit("alice", id) {
                    Admission::Duplicate(dup) => {
                        prop_assert_eq!(dup, id);
                        prop_assert_eq!(guard.get("alice").cloned(), before);
                    }
                    Admission::Accepted(session) => {
                        prop_assert_ne!(before.and_then(|s| s.last_update_id), Some(id));
                        prop_assert_eq!(session.last_update_id, Some(id));
                    }
                    Admission::UnknownUser => prop_assert!(false, "alice has a session"),
                }
            }
        }
    }
}
