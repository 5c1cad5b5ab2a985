use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{TimeDelta, Utc};
use tracing::debug;

use super::{Session, SessionError, SessionId, SessionStore};
use crate::user::{UserDirectory, UserId};

pub struct InMemorySessionStore {
    users: Arc<dyn UserDirectory>,
    ttl: TimeDelta,
    by_id: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl InMemorySessionStore {
    pub fn new(users: Arc<dyn UserDirectory>, ttl: TimeDelta) -> Self {
        Self {
            users,
            ttl,
            by_id: Mutex::new(HashMap::new()),
        }
    }

    fn by_id(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<Session>>> {
        self.by_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.by_id().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, user_id: UserId, password: &str) -> Result<Arc<Session>, SessionError> {
        let user = self
            .users
            .get_by_id(user_id)
            .ok_or_else(|| SessionError::UnknownUser(user_id.to_string()))?;
        if !user.authenticate(password) {
            debug!(user_id = %user_id, "login rejected");
            return Err(SessionError::BadCredentials);
        }

        let session = Arc::new(Session::new(user, self.ttl));
        let now = Utc::now();
        let mut by_id = self.by_id();
        by_id.retain(|id, existing| {
            if existing.user_id() == user_id {
                debug!(
                    session_id = %id,
                    user_id = %user_id,
                    started = %existing.start(),
                    "ending superseded session"
                );
                false
            } else if existing.is_expired_at(now) {
                debug!(
                    session_id = %id,
                    user_id = %existing.user_id(),
                    started = %existing.start(),
                    "ending expired session"
                );
                false
            } else {
                true
            }
        });
        by_id.insert(session.id(), Arc::clone(&session));
        debug!(
            session_id = %session.id(),
            user_id = %user_id,
            expiry = %session.expiry(),
            live = by_id.len(),
            "session started"
        );
        Ok(session)
    }

    fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        let mut by_id = self.by_id();
        let Some(session) = by_id.get(&id).cloned() else {
            debug!(session_id = %id, "session not found");
            return None;
        };
        if session.extend().is_none() {
            debug!(session_id = %id, expiry = %session.expiry(), "session expired");
            by_id.remove(&id);
            return None;
        }
        Some(session)
    }

    fn is_valid(&self, session: &Session) -> bool {
        self.by_id()
            .get(&session.id())
            .is_some_and(|stored| !stored.is_expired())
    }

    fn end(&self, id: SessionId) {
        if let Some(session) = self.by_id().remove(&id) {
            let duration = Utc::now() - session.start();
            debug!(
                session_id = %id,
                user_id = %session.user_id(),
                duration_ms = duration.num_milliseconds(),
                "session ended"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::user::{User, in_memory_directory::InMemoryUserDirectory};

    fn setup(ttl: TimeDelta) -> (InMemorySessionStore, Arc<User>, Arc<User>) {
        let users = Arc::new(InMemoryUserDirectory::default());
        let one = users.create("27111111111", "one", "aa11").unwrap();
        let two = users.create("27222222222", "two", "bb22").unwrap();
        (InMemorySessionStore::new(users, ttl), one, two)
    }

    #[test]
    fn create_requires_known_user_and_password() {
        let (store, one, _) = setup(TimeDelta::minutes(5));
        assert!(matches!(
            store.create(Uuid::new_v4(), "aa11"),
            Err(SessionError::UnknownUser(_))
        ));
        assert!(matches!(
            store.create(one.id(), "wrong"),
            Err(SessionError::BadCredentials)
        ));
        assert!(store.is_empty());

        let session = store.create(one.id(), "aa11").unwrap();
        assert_eq!(session.user_id(), one.id());
        assert!(store.is_valid(&session));
        assert!(Arc::ptr_eq(&session, &store.get(session.id()).unwrap()));
    }

    #[test]
    fn new_login_supersedes_previous_session() {
        let (store, one, two) = setup(TimeDelta::minutes(5));
        let first = store.create(one.id(), "aa11").unwrap();
        let other_user = store.create(two.id(), "bb22").unwrap();
        let second = store.create(one.id(), "aa11").unwrap();

        assert!(!store.is_valid(&first));
        assert!(store.is_valid(&second));
        assert!(store.is_valid(&other_user));
        assert!(store.get(first.id()).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn expired_sessions_are_evicted() {
        let (store, one, two) = setup(TimeDelta::zero());
        let session = store.create(one.id(), "aa11").unwrap();
        assert!(!store.is_valid(&session));
        assert_eq!(store.len(), 1);
        assert!(store.get(session.id()).is_none());
        assert!(store.is_empty());

        // expired sessions of other users are swept on the next login
        store.create(one.id(), "aa11").unwrap();
        store.create(two.id(), "bb22").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn get_slides_expiry() {
        let (store, one, _) = setup(TimeDelta::minutes(5));
        let session = store.create(one.id(), "aa11").unwrap();
        let before = session.expiry();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.get(session.id()).unwrap();
        assert!(session.expiry() > before);
    }

    #[test]
    fn end_is_idempotent() {
        let (store, one, _) = setup(TimeDelta::minutes(5));
        let session = store.create(one.id(), "aa11").unwrap();
        store.end(session.id());
        assert!(!store.is_valid(&session));
        store.end(session.id());
        store.end(Uuid::new_v4());
        assert!(store.get(session.id()).is_none());
        assert!(store.is_empty());
    }
}
