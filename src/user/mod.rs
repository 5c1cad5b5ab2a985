use std::sync::{Arc, LazyLock, RwLock};

use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::document::StorageError;

pub mod in_memory_directory;
pub mod json_file_directory;

pub type UserId = Uuid;

static MSISDN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^27[0-9]{9}$").expect("msisdn pattern is valid"));
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9@_.\-]*[a-zA-Z0-9]$").expect("name pattern is valid")
});

const MIN_PASSWORD_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("Invalid msisdn \"{0}\", expected 27 followed by 9 digits")]
    InvalidMsisdn(String),
    #[error("Invalid user name \"{0}\", only alpha-numeric characters and @_.- are allowed")]
    InvalidName(String),
    #[error("Invalid password: {0}")]
    InvalidPassword(&'static str),
    #[error("User with msisdn {0} already exists")]
    DuplicateMsisdn(String),
    #[error("User {0} not found")]
    NotFound(UserId),
    #[error("Incorrect password")]
    IncorrectPassword,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub fn validate_msisdn(msisdn: &str) -> Result<&str, UserError> {
    let msisdn = msisdn.trim();
    if MSISDN_PATTERN.is_match(msisdn) {
        Ok(msisdn)
    } else {
        Err(UserError::InvalidMsisdn(msisdn.to_string()))
    }
}

pub fn validate_name(name: &str) -> Result<&str, UserError> {
    let name = name.trim();
    if NAME_PATTERN.is_match(name) {
        Ok(name)
    } else {
        Err(UserError::InvalidName(name.to_string()))
    }
}

pub fn validate_password(password: &str) -> Result<(), UserError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(UserError::InvalidPassword("shorter than 4 characters"));
    }
    if password.chars().any(char::is_control) {
        return Err(UserError::InvalidPassword("contains a non printable character"));
    }
    Ok(())
}

/// Salted SHA-256 of a password. Plain passwords are never kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    salt: String,
    hash: String,
}

impl Credential {
    pub fn derive(password: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill(&mut salt);
        Self::with_salt(hex::encode(salt), password)
    }

    fn with_salt(salt: String, password: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        let hash = hex::encode(hasher.finalize());
        Self { salt, hash }
    }

    pub fn verify(&self, password: &str) -> bool {
        Self::with_salt(self.salt.clone(), password).hash == self.hash
    }
}

#[derive(Debug)]
pub struct User {
    id: UserId,
    msisdn: String,
    name: String,
    credential: RwLock<Credential>,
}

impl User {
    pub(crate) fn new(id: UserId, msisdn: String, name: String, credential: Credential) -> Self {
        Self {
            id,
            msisdn,
            name,
            credential: RwLock::new(credential),
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn msisdn(&self) -> &str {
        &self.msisdn
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn authenticate(&self, password: &str) -> bool {
        self.credential().verify(password)
    }

    pub(crate) fn credential(&self) -> Credential {
        self.credential
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn replace_credential(&self, credential: Credential) -> Credential {
        let mut current = self
            .credential
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *current, credential)
    }
}

/// Directory of registered users, looked up by id or msisdn.
pub trait UserDirectory: Send + Sync {
    fn create(&self, msisdn: &str, name: &str, password: &str) -> Result<Arc<User>, UserError>;

    fn get_by_id(&self, id: UserId) -> Option<Arc<User>>;

    fn get_by_msisdn(&self, msisdn: &str) -> Option<Arc<User>>;

    fn set_password(&self, id: UserId, old_password: &str, new_password: &str)
    -> Result<(), UserError>;

    fn all(&self) -> Vec<Arc<User>>;
}
