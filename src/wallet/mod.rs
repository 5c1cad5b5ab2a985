use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicI64, Ordering},
};

use thiserror::Error;
use uuid::Uuid;

use crate::{document::StorageError, user::UserId};

pub mod deposit_reference;
pub mod in_memory_store;
pub mod json_file_store;

pub type Amount = i64;
pub type WalletId = Uuid;

/// Name of the wallet every registered user gets.
pub const DEFAULT_WALLET: &str = "default";

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Wallet name is required")]
    MissingName,
    #[error("Minimum balance must not be positive, got {0}")]
    PositiveFloor(Amount),
    #[error("User {owner} already has a wallet named \"{name}\"")]
    Duplicate { owner: UserId, name: String },
    #[error("Wallet not found by {0}")]
    NotFound(String),
    #[error("Unable to allocate a deposit reference after {attempts} attempts")]
    ReferenceExhausted { attempts: usize },
    #[error("Deposit reference {0} is already claimed by another wallet")]
    ReferenceTaken(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// An account holding an integer balance, owned by one user.
///
/// Handles are shared (`Arc<Wallet>`) between the store that owns the wallet
/// and the callers that read it. The balance is only ever changed through
/// [`WalletStore::debit`] and [`WalletStore::credit`].
#[derive(Debug)]
pub struct Wallet {
    id: WalletId,
    owner: UserId,
    name: String,
    min_balance: Amount,
    balance: AtomicI64,
    deposit_reference: OnceLock<String>,
}

impl Wallet {
    pub(crate) fn new(
        id: WalletId,
        owner: UserId,
        name: String,
        min_balance: Amount,
        balance: Amount,
        deposit_reference: Option<String>,
    ) -> Self {
        let wallet = Self {
            id,
            owner,
            name,
            min_balance,
            balance: AtomicI64::new(balance),
            deposit_reference: OnceLock::new(),
        };
        if let Some(reference) = deposit_reference {
            wallet.bind_deposit_reference(reference);
        }
        wallet
    }

    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> Amount {
        self.balance.load(Ordering::SeqCst)
    }

    /// Lowest balance the wallet may reach, never positive.
    pub fn min_balance(&self) -> Amount {
        self.min_balance
    }

    pub fn deposit_reference(&self) -> Option<&str> {
        self.deposit_reference.get().map(String::as_str)
    }

    pub(crate) fn apply_debit(&self, amount: Amount) {
        self.balance.fetch_sub(amount, Ordering::SeqCst);
    }

    pub(crate) fn apply_credit(&self, amount: Amount) {
        self.balance.fetch_add(amount, Ordering::SeqCst);
    }

    /// Returns `false` when the wallet already had a reference.
    pub(crate) fn bind_deposit_reference(&self, reference: String) -> bool {
        self.deposit_reference.set(reference).is_ok()
    }
}

/// Owner of all wallets, indexed by id, by owner and name, and by deposit
/// reference.
pub trait WalletStore: Send + Sync {
    /// Fails when `owner` already has a wallet called `name`.
    fn create(
        &self,
        owner: UserId,
        name: &str,
        min_balance: Amount,
    ) -> Result<Arc<Wallet>, WalletError>;

    fn get_by_id(&self, id: WalletId) -> Result<Arc<Wallet>, WalletError>;

    fn get_by_owner_and_name(&self, owner: UserId, name: &str)
    -> Result<Arc<Wallet>, WalletError>;

    /// Binds a fresh deposit reference to the wallet, or returns the one it
    /// already has.
    fn allocate_deposit_reference(&self, wallet: &Wallet) -> Result<String, WalletError>;

    fn get_by_deposit_reference(&self, reference: &str) -> Result<Arc<Wallet>, WalletError>;

    /// Unconditional `balance -= amount`. The floor is the caller's business.
    fn debit(&self, wallet: &Wallet, amount: Amount);

    /// Unconditional `balance += amount`.
    fn credit(&self, wallet: &Wallet, amount: Amount);

    /// Makes balance changes since the last flush durable. Called once per
    /// transfer, after both the debit and the credit.
    fn flush(&self) {}

    /// All wallets ordered by owner, then name.
    fn all(&self) -> Vec<Arc<Wallet>>;
}
