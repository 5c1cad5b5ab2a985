use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;
use uuid::Uuid;

use super::{
    Credential, User, UserDirectory, UserError, UserId, validate_msisdn, validate_name,
    validate_password,
};

#[derive(Default)]
struct UserIndex {
    by_id: HashMap<UserId, Arc<User>>,
    by_msisdn: HashMap<String, UserId>,
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    index: Mutex<UserIndex>,
}

impl InMemoryUserDirectory {
    fn index(&self) -> MutexGuard<'_, UserIndex> {
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Puts back a user loaded from persistent storage.
    pub(crate) fn restore(&self, user: User) -> Result<Arc<User>, UserError> {
        let mut index = self.index();
        if index.by_msisdn.contains_key(user.msisdn()) {
            return Err(UserError::DuplicateMsisdn(user.msisdn().to_string()));
        }
        let user = Arc::new(user);
        index.by_msisdn.insert(user.msisdn().to_string(), user.id());
        index.by_id.insert(user.id(), Arc::clone(&user));
        Ok(user)
    }

    pub(crate) fn discard(&self, id: UserId) {
        let mut index = self.index();
        if let Some(user) = index.by_id.remove(&id) {
            index.by_msisdn.remove(user.msisdn());
        }
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn create(&self, msisdn: &str, name: &str, password: &str) -> Result<Arc<User>, UserError> {
        let msisdn = validate_msisdn(msisdn)?;
        let name = validate_name(name)?;
        validate_password(password)?;

        let user = self.restore(User::new(
            Uuid::new_v4(),
            msisdn.to_string(),
            name.to_string(),
            Credential::derive(password),
        ))?;
        debug!(user_id = %user.id(), msisdn = user.msisdn(), name = user.name(), "user created");
        Ok(user)
    }

    fn get_by_id(&self, id: UserId) -> Option<Arc<User>> {
        self.index().by_id.get(&id).cloned()
    }

    fn get_by_msisdn(&self, msisdn: &str) -> Option<Arc<User>> {
        let index = self.index();
        let id = index.by_msisdn.get(msisdn.trim())?;
        index.by_id.get(id).cloned()
    }

    fn set_password(
        &self,
        id: UserId,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), UserError> {
        let user = self.get_by_id(id).ok_or(UserError::NotFound(id))?;
        if !user.authenticate(old_password) {
            return Err(UserError::IncorrectPassword);
        }
        validate_password(new_password)?;
        user.replace_credential(Credential::derive(new_password));
        debug!(user_id = %id, "password changed");
        Ok(())
    }

    fn all(&self) -> Vec<Arc<User>> {
        let mut users: Vec<_> = self.index().by_id.values().cloned().collect();
        users.sort_by(|a, b| a.msisdn().cmp(b.msisdn()));
        users
    }
}
