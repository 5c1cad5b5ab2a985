use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::user::{User, UserId};

pub mod in_memory_store;

pub type SessionId = Uuid;

/// Sliding expiry window applied on every touch.
pub const DEFAULT_TTL_SECS: i64 = 5 * 60;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown user {0}")]
    UnknownUser(String),
    #[error("Incorrect password")]
    BadCredentials,
}

#[derive(Debug)]
struct SessionState {
    expiry: DateTime<Utc>,
    data: HashMap<String, Value>,
}

/// A time bounded login of one user.
///
/// Every successful read or write through the session slides its expiry
/// forward by the store's window. Once expired it stays expired.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    user: Arc<User>,
    start: DateTime<Utc>,
    ttl: TimeDelta,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(user: Arc<User>, ttl: TimeDelta) -> Self {
        let start = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user,
            start,
            ttl,
            state: Mutex::new(SessionState {
                expiry: start + ttl,
                data: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    pub fn user_id(&self) -> UserId {
        self.user.id()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.state().expiry
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.state().expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Slides the expiry forward. Returns the new expiry, or `None` when the
    /// session has already expired.
    pub fn extend(&self) -> Option<DateTime<Utc>> {
        Self::slide(&mut self.state(), self.ttl)
    }

    fn slide(state: &mut SessionState, ttl: TimeDelta) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        if now >= state.expiry {
            return None;
        }
        state.expiry = now + ttl;
        Some(state.expiry)
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        let mut state = self.state();
        state.data.insert(key.into(), value);
        Self::slide(&mut state, self.ttl);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state();
        let value = state.data.get(key).cloned();
        Self::slide(&mut state, self.ttl);
        value
    }
}

/// Issues and tracks login sessions, at most one live session per user.
pub trait SessionStore: Send + Sync {
    /// Authenticates the user and starts a session, ending any other session
    /// the user had.
    fn create(&self, user_id: UserId, password: &str) -> Result<Arc<Session>, SessionError>;

    /// Looks up a live session and slides its expiry. Expired sessions are
    /// evicted and reported as absent.
    fn get(&self, id: SessionId) -> Option<Arc<Session>>;

    /// True only while this exact session is stored and not expired.
    fn is_valid(&self, session: &Session) -> bool;

    /// Removes the session. Unknown ids are ignored.
    fn end(&self, id: SessionId);
}
