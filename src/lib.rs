/// JSON document collections on disk, shared by the file backed stores.
pub mod document;

/// Users, their credentials and the directory that looks them up by id or
/// msisdn.
pub mod user;

/// Wallets, the stores that own them and deposit reference allocation.
pub mod wallet;

/// Login sessions with a sliding expiry.
pub mod session;

/// The transaction authority. All balance changes go through here.
pub mod ledger;

/// Goods users sell to each other.
pub mod goods;

pub mod config;

/// Composition root plus the client facing operations (deposits, transfers,
/// payments, statements).
pub mod bank;

/// Bootstraps a [`bank::Bank`] from a CSV instruction list. Used by the
/// binary and by the integration tests.
pub mod bin_utils;

pub use bank::{Bank, BankError, ErrorKind, MiniStatement, Receipt};
pub use config::BankConfig;
pub use ledger::{Ledger, LedgerError, Transaction};
