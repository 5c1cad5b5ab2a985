//! Bank configuration.
//!
//! Loaded from an optional JSON file, then overridden from the environment:
//! ```json
//! {
//!   "admin": { "msisdn": "27824526299", "name": "admin", "password": "admin" },
//!   "bankWalletMinBalance": -100000000,
//!   "sessionTtlSecs": 300,
//!   "statementSize": 10,
//!   "storage": { "kind": "jsonFile", "dir": "/var/lib/taxiching" }
//! }
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    session::DEFAULT_TTL_SECS,
    user::{validate_msisdn, validate_name, validate_password},
    wallet::Amount,
};

pub const ENV_ADMIN_PASSWORD: &str = "TAXICHING_ADMIN_PASSWORD";
pub const ENV_SESSION_TTL_SECS: &str = "TAXICHING_SESSION_TTL_SECS";
pub const ENV_STORAGE_DIR: &str = "TAXICHING_STORAGE_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed config `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid value \"{value}\" in {name}")]
    Env { name: &'static str, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminConfig {
    pub msisdn: String,
    pub name: String,
    pub password: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            msisdn: "27824526299".to_string(),
            name: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

/// Which wallet and user backend the bank is composed with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StorageConfig {
    #[default]
    Memory,
    /// `users.json` and `wallets.json` inside `dir`.
    JsonFile { dir: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BankConfig {
    pub admin: AdminConfig,
    /// Floor of the bank float wallet that funds deposits.
    pub bank_wallet_min_balance: Amount,
    pub session_ttl_secs: i64,
    /// Number of recent entries shown on a mini statement.
    pub statement_size: usize,
    pub storage: StorageConfig,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            admin: AdminConfig::default(),
            bank_wallet_min_balance: -100_000_000,
            session_ttl_secs: DEFAULT_TTL_SECS,
            statement_size: 10,
            storage: StorageConfig::Memory,
        }
    }
}

impl BankConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    pub fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
            None => Self::default(),
        };

        if let Some(password) = env(ENV_ADMIN_PASSWORD) {
            config.admin.password = password;
        }
        if let Some(value) = env(ENV_SESSION_TTL_SECS) {
            config.session_ttl_secs = value.trim().parse().map_err(|_| ConfigError::Env {
                name: ENV_SESSION_TTL_SECS,
                value,
            })?;
        }
        if let Some(dir) = env(ENV_STORAGE_DIR) {
            config.storage = StorageConfig::JsonFile { dir: dir.into() };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bank_wallet_min_balance > 0 {
            return Err(ConfigError::Invalid(format!(
                "bankWalletMinBalance must not be positive, got {}",
                self.bank_wallet_min_balance
            )));
        }
        if self.session_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "sessionTtlSecs must be positive, got {}",
                self.session_ttl_secs
            )));
        }
        if self.statement_size == 0 {
            return Err(ConfigError::Invalid(
                "statementSize must be positive".to_string(),
            ));
        }
        validate_msisdn(&self.admin.msisdn)
            .and_then(|_| validate_name(&self.admin.name))
            .and_then(|_| validate_password(&self.admin.password))
            .map_err(|err| ConfigError::Invalid(format!("admin: {err}")))?;
        Ok(())
    }

    pub fn session_ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.session_ttl_secs)
    }
}
