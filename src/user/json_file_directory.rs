use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    Credential, User, UserDirectory, UserError, UserId, in_memory_directory::InMemoryUserDirectory,
};
use crate::document::{JsonCollection, StorageError};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    id: UserId,
    msisdn: String,
    name: String,
    credential: Credential,
}

impl From<&User> for UserDocument {
    fn from(user: &User) -> Self {
        Self {
            id: user.id(),
            msisdn: user.msisdn().to_string(),
            name: user.name().to_string(),
            credential: user.credential(),
        }
    }
}

/// User directory backed by a JSON document file.
///
/// Lookups are served from memory; every change is written through.
pub struct JsonFileUserDirectory {
    inner: InMemoryUserDirectory,
    documents: JsonCollection<UserDocument>,
}

impl JsonFileUserDirectory {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, UserError> {
        let documents: JsonCollection<UserDocument> = JsonCollection::new(path);
        let inner = InMemoryUserDirectory::default();
        for doc in documents.load()? {
            inner.restore(User::new(doc.id, doc.msisdn, doc.name, doc.credential))?;
        }
        debug!(
            path = %documents.path().display(),
            users = inner.all().len(),
            "user documents loaded"
        );
        Ok(Self { inner, documents })
    }

    fn persist(&self) -> Result<(), StorageError> {
        self.documents.save(|| {
            self.inner
                .all()
                .iter()
                .map(|user| UserDocument::from(user.as_ref()))
                .collect()
        })
    }
}

impl UserDirectory for JsonFileUserDirectory {
    fn create(&self, msisdn: &str, name: &str, password: &str) -> Result<Arc<User>, UserError> {
        let user = self.inner.create(msisdn, name, password)?;
        if let Err(err) = self.persist() {
            self.inner.discard(user.id());
            return Err(err.into());
        }
        Ok(user)
    }

    fn get_by_id(&self, id: UserId) -> Option<Arc<User>> {
        self.inner.get_by_id(id)
    }

    fn get_by_msisdn(&self, msisdn: &str) -> Option<Arc<User>> {
        self.inner.get_by_msisdn(msisdn)
    }

    fn set_password(
        &self,
        id: UserId,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), UserError> {
        let user = self.inner.get_by_id(id).ok_or(UserError::NotFound(id))?;
        let previous = user.credential();
        self.inner.set_password(id, old_password, new_password)?;
        if let Err(err) = self.persist() {
            user.replace_credential(previous);
            return Err(err.into());
        }
        Ok(())
    }

    fn all(&self) -> Vec<Arc<User>> {
        self.inner.all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");

        let one_id = {
            let users = JsonFileUserDirectory::open(&path).unwrap();
            let one = users.create("27111111111", "one", "aa11").unwrap();
            users.create("27222222222", "two", "bb22").unwrap();
            users.set_password(one.id(), "aa11", "cc33").unwrap();
            one.id()
        };

        let users = JsonFileUserDirectory::open(&path).unwrap();
        assert_eq!(users.all().len(), 2);
        let one = users.get_by_id(one_id).unwrap();
        assert_eq!(one.msisdn(), "27111111111");
        assert!(one.authenticate("cc33"));
        assert!(!one.authenticate("aa11"));
        assert!(matches!(
            users.create("27111111111", "again", "aa11"),
            Err(UserError::DuplicateMsisdn(_))
        ));
    }

    #[test]
    fn failed_write_rolls_back_create() {
        let dir = tempfile::tempdir().unwrap();
        // parent directory does not exist, so every save fails
        let path = dir.path().join("missing").join("users.json");
        let users = JsonFileUserDirectory::open(&path).unwrap();

        let err = users.create("27111111111", "one", "aa11").unwrap_err();
        assert!(matches!(err, UserError::Storage(StorageError::Io { .. })));
        assert!(users.get_by_msisdn("27111111111").is_none());
    }
}
