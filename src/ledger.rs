use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    session::{Session, SessionStore},
    wallet::{Amount, Wallet, WalletId, WalletStore},
};

pub type TransactionId = Uuid;

const SEND_DESCRIPTION: &str = "send";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletSide {
    Debit,
    Credit,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid session")]
    InvalidSession,
    #[error("{side:?} wallet not specified")]
    MissingWallet { side: WalletSide },
    #[error("Cannot send to the same wallet")]
    SameWallet,
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Amount),
    #[error("Reference is required")]
    MissingReference,
    #[error("Cannot send from another user's wallet")]
    NotOwner,
    #[error(
        "Insufficient funds (wallet {wallet}, balance {balance}, minimum balance {min_balance}, amount {amount})"
    )]
    InsufficientFunds {
        wallet: WalletId,
        balance: Amount,
        min_balance: Amount,
        amount: Amount,
    },
}

/// An immutable ledger entry moving `amount` from the debit wallet to the
/// credit wallet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    id: TransactionId,
    timestamp: DateTime<Utc>,
    debit_wallet: WalletId,
    credit_wallet: WalletId,
    amount: Amount,
    description: String,
    reference: String,
    debit_balance_after: Amount,
    credit_balance_after: Amount,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn debit_wallet(&self) -> WalletId {
        self.debit_wallet
    }

    pub fn credit_wallet(&self) -> WalletId {
        self.credit_wallet
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn debit_balance_after(&self) -> Amount {
        self.debit_balance_after
    }

    pub fn credit_balance_after(&self) -> Amount {
        self.credit_balance_after
    }

    pub fn involves(&self, wallet: WalletId) -> bool {
        self.debit_wallet == wallet || self.credit_wallet == wallet
    }
}

/// The transaction authority.
///
/// Every transfer goes through [`Ledger::send`], which is serialised by one
/// process wide lock. The lock covers the funds check, the debit, the credit
/// and the append, so entries are totally ordered and a debit is never
/// visible in the log without its credit.
pub struct Ledger {
    sessions: Arc<dyn SessionStore>,
    wallets: Arc<dyn WalletStore>,
    entries: Mutex<Vec<Arc<Transaction>>>,
}

impl Ledger {
    pub fn new(sessions: Arc<dyn SessionStore>, wallets: Arc<dyn WalletStore>) -> Self {
        Self {
            sessions,
            wallets,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Arc<Transaction>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Moves `amount` from `from` to `to` on behalf of the session's user.
    ///
    /// Checks run in a fixed order and the first failure is returned:
    /// session validity, both wallets present and distinct, positive amount,
    /// non-empty reference, ownership of `from`, and finally that `from`
    /// stays at or above its minimum balance. Nothing is mutated unless all
    /// checks pass.
    pub fn send(
        &self,
        session: &Session,
        from: Option<&Wallet>,
        to: Option<&Wallet>,
        amount: Amount,
        reference: &str,
    ) -> Result<Arc<Transaction>, LedgerError> {
        if !self.sessions.is_valid(session) {
            return Err(LedgerError::InvalidSession);
        }
        let from = from.ok_or(LedgerError::MissingWallet {
            side: WalletSide::Debit,
        })?;
        let to = to.ok_or(LedgerError::MissingWallet {
            side: WalletSide::Credit,
        })?;
        if from.id() == to.id() {
            return Err(LedgerError::SameWallet);
        }
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LedgerError::MissingReference);
        }
        if from.owner() != session.user_id() {
            return Err(LedgerError::NotOwner);
        }

        let mut entries = self.entries();
        // under the lock, so two sends from one wallet cannot both pass
        let balance = from.balance();
        if balance
            .checked_sub(amount)
            .is_none_or(|after| after < from.min_balance())
        {
            return Err(LedgerError::InsufficientFunds {
                wallet: from.id(),
                balance,
                min_balance: from.min_balance(),
                amount,
            });
        }

        self.wallets.debit(from, amount);
        self.wallets.credit(to, amount);
        self.wallets.flush();
        let transaction = Arc::new(Transaction {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            debit_wallet: from.id(),
            credit_wallet: to.id(),
            amount,
            description: SEND_DESCRIPTION.to_string(),
            reference: reference.to_string(),
            debit_balance_after: from.balance(),
            credit_balance_after: to.balance(),
        });
        entries.push(Arc::clone(&transaction));
        drop(entries);

        debug!(
            transaction_id = %transaction.id(),
            debit_wallet = %from.id(),
            credit_wallet = %to.id(),
            amount,
            reference,
            "transaction appended"
        );
        Ok(transaction)
    }

    /// Snapshot of the whole log in append order.
    pub fn all(&self) -> Vec<Arc<Transaction>> {
        self.entries().clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries debiting or crediting `wallet`, in append order.
    ///
    /// Linear scan over the log.
    pub fn for_wallet(&self, wallet: WalletId) -> Vec<Arc<Transaction>> {
        self.entries()
            .iter()
            .filter(|tx| tx.involves(wallet))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::TimeDelta;

    use super::*;
    use crate::{
        session::in_memory_store::InMemorySessionStore,
        user::{UserDirectory, in_memory_directory::InMemoryUserDirectory},
        wallet::{
            DEFAULT_WALLET, in_memory_store::InMemoryWalletStore,
            json_file_store::JsonFileWalletStore,
        },
    };

    struct Fixture {
        sessions: Arc<InMemorySessionStore>,
        ledger: Ledger,
        bank: Arc<Wallet>,
        one: Arc<Wallet>,
        two: Arc<Wallet>,
        admin_session: Arc<Session>,
        one_session: Arc<Session>,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(InMemoryUserDirectory::default());
        let wallets = Arc::new(InMemoryWalletStore::default());
        let sessions = Arc::new(InMemorySessionStore::new(
            users.clone(),
            TimeDelta::minutes(5),
        ));
        let admin = users.create("27824526299", "admin", "admin").unwrap();
        let one = users.create("27111111111", "one", "aa11").unwrap();
        let two = users.create("27222222222", "two", "bb22").unwrap();
        let bank = wallets.create(admin.id(), "bank", -1_000_000).unwrap();
        let one_wallet = wallets.create(one.id(), DEFAULT_WALLET, 0).unwrap();
        let two_wallet = wallets.create(two.id(), DEFAULT_WALLET, 0).unwrap();
        let admin_session = sessions.create(admin.id(), "admin").unwrap();
        let one_session = sessions.create(one.id(), "aa11").unwrap();
        Fixture {
            ledger: Ledger::new(sessions.clone(), wallets),
            sessions,
            bank,
            one: one_wallet,
            two: two_wallet,
            admin_session,
            one_session,
        }
    }

    #[test]
    fn send_conserves_value() {
        let f = fixture();
        f.ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.one), 1000, "load")
            .unwrap();
        let tx = f
            .ledger
            .send(&f.one_session, Some(&*f.one), Some(&*f.two), 300, " rent ")
            .unwrap();

        assert_eq!(f.one.balance(), 700);
        assert_eq!(f.two.balance(), 300);
        assert_eq!(f.bank.balance(), -1000);
        assert_eq!(f.bank.balance() + f.one.balance() + f.two.balance(), 0);

        assert_eq!(tx.debit_wallet(), f.one.id());
        assert_eq!(tx.credit_wallet(), f.two.id());
        assert_eq!(tx.amount(), 300);
        assert_eq!(tx.description(), "send");
        assert_eq!(tx.reference(), "rent");
        assert_eq!(tx.debit_balance_after(), 700);
        assert_eq!(tx.credit_balance_after(), 300);
        assert!(tx.timestamp() <= Utc::now());
        assert_eq!(f.ledger.len(), 2);
    }

    #[test]
    fn bank_wallet_may_go_negative_down_to_its_floor() {
        let f = fixture();
        f.ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.one), 1_000_000, "float")
            .unwrap();
        assert_eq!(f.bank.balance(), -1_000_000);
        let err = f
            .ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.one), 1, "float")
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                balance: -1_000_000,
                min_balance: -1_000_000,
                amount: 1,
                ..
            }
        ));
    }

    #[test]
    fn insufficient_funds_leaves_wallets_untouched() {
        let f = fixture();
        f.ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.one), 50, "load")
            .unwrap();
        let err = f
            .ledger
            .send(&f.one_session, Some(&*f.one), Some(&*f.two), 51, "too much")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(f.one.balance(), 50);
        assert_eq!(f.two.balance(), 0);
        assert_eq!(f.ledger.len(), 1);

        // exactly down to the floor is fine
        f.ledger
            .send(&f.one_session, Some(&*f.one), Some(&*f.two), 50, "all of it")
            .unwrap();
        assert_eq!(f.one.balance(), 0);
    }

    #[test]
    fn only_the_owner_may_debit() {
        let f = fixture();
        f.ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.two), 500, "load")
            .unwrap();
        let err = f
            .ledger
            .send(&f.one_session, Some(&*f.two), Some(&*f.one), 10, "steal")
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotOwner));
        let err = f
            .ledger
            .send(&f.one_session, Some(&*f.bank), Some(&*f.one), 10, "steal")
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotOwner));
        assert_eq!(f.two.balance(), 500);
        assert_eq!(f.ledger.len(), 1);
    }

    #[test]
    fn validation_order() {
        let f = fixture();
        f.sessions.end(f.one_session.id());

        // invalid session wins over everything else
        let err = f
            .ledger
            .send(&f.one_session, None, None, 0, "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSession));

        let s = &f.admin_session;
        let err = f.ledger.send(s, None, Some(&*f.one), 0, "").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::MissingWallet {
                side: WalletSide::Debit
            }
        ));
        let err = f.ledger.send(s, Some(&*f.bank), None, 0, "").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::MissingWallet {
                side: WalletSide::Credit
            }
        ));
        let err = f
            .ledger
            .send(s, Some(&*f.bank), Some(&*f.bank), 0, "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::SameWallet));
        let err = f
            .ledger
            .send(s, Some(&*f.one), Some(&*f.two), 0, "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(0)));
        let err = f
            .ledger
            .send(s, Some(&*f.one), Some(&*f.two), -5, "x")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(-5)));
        let err = f
            .ledger
            .send(s, Some(&*f.one), Some(&*f.two), 5, "  ")
            .unwrap_err();
        assert!(matches!(err, LedgerError::MissingReference));
        let err = f
            .ledger
            .send(s, Some(&*f.one), Some(&*f.two), i64::MAX, "x")
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotOwner));

        assert!(f.ledger.is_empty());
        assert_eq!(f.one.balance(), 0);
        assert_eq!(f.bank.balance(), 0);
    }

    #[test]
    fn superseded_session_cannot_send() {
        let f = fixture();
        let one_id = f.one_session.user_id();
        let newer = f.sessions.create(one_id, "aa11").unwrap();
        f.ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.one), 100, "load")
            .unwrap();

        let err = f
            .ledger
            .send(&f.one_session, Some(&*f.one), Some(&*f.two), 10, "old")
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSession));
        f.ledger
            .send(&newer, Some(&*f.one), Some(&*f.two), 10, "new")
            .unwrap();
    }

    #[test]
    fn for_wallet_filters_in_append_order() {
        let f = fixture();
        f.ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.one), 100, "first")
            .unwrap();
        f.ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.two), 100, "second")
            .unwrap();
        f.ledger
            .send(&f.one_session, Some(&*f.one), Some(&*f.two), 10, "third")
            .unwrap();

        let refs = |wallet: WalletId| -> Vec<String> {
            f.ledger
                .for_wallet(wallet)
                .iter()
                .map(|tx| tx.reference().to_string())
                .collect()
        };
        assert_eq!(refs(f.one.id()), ["first", "third"]);
        assert_eq!(refs(f.two.id()), ["second", "third"]);
        assert_eq!(refs(f.bank.id()), ["first", "second"]);
        assert_eq!(f.ledger.all().len(), 3);
    }

    #[test]
    fn file_backed_transfer_is_written_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let users = Arc::new(InMemoryUserDirectory::default());
        let wallets = Arc::new(JsonFileWalletStore::open(&path).unwrap());
        let sessions = Arc::new(InMemorySessionStore::new(
            users.clone(),
            TimeDelta::minutes(5),
        ));
        let admin = users.create("27824526299", "admin", "admin").unwrap();
        let one = users.create("27111111111", "one", "aa11").unwrap();
        let bank = wallets.create(admin.id(), "bank", -1000).unwrap();
        let one_wallet = wallets.create(one.id(), DEFAULT_WALLET, 0).unwrap();
        let session = sessions.create(admin.id(), "admin").unwrap();
        let ledger = Ledger::new(sessions, wallets);

        ledger
            .send(&session, Some(&*bank), Some(&*one_wallet), 300, "load")
            .unwrap();

        let reloaded = JsonFileWalletStore::open(&path).unwrap();
        let total: Amount = reloaded.all().iter().map(|w| w.balance()).sum();
        assert_eq!(total, 0);
        assert_eq!(reloaded.get_by_id(bank.id()).unwrap().balance(), -300);
        assert_eq!(reloaded.get_by_id(one_wallet.id()).unwrap().balance(), 300);
    }

    #[test]
    fn concurrent_sends_keep_floor_and_total() {
        let f = fixture();
        f.ledger
            .send(&f.admin_session, Some(&*f.bank), Some(&*f.one), 1000, "load")
            .unwrap();

        let ledger = &f.ledger;
        let (one, two, session) = (&*f.one, &*f.two, &*f.one_session);
        let successes: usize = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        (0..50)
                            .filter(|_| {
                                ledger
                                    .send(session, Some(one), Some(two), 7, "spray")
                                    .is_ok()
                            })
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        // 1000 / 7 = 142 transfers fit above the floor
        assert_eq!(successes, 142);
        assert_eq!(f.one.balance(), 1000 - 142 * 7);
        assert_eq!(f.two.balance(), 142 * 7);
        assert!(f.one.balance() >= f.one.min_balance());
        assert_eq!(f.ledger.len(), 143);
    }
}
