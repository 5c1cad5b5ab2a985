use std::{fs, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    config::{BankConfig, ConfigError, StorageConfig},
    document::StorageError,
    goods::{Goods, GoodsCatalog, GoodsError, GoodsId},
    ledger::{Ledger, LedgerError, Transaction, TransactionId},
    session::{
        Session, SessionError, SessionId, SessionStore, in_memory_store::InMemorySessionStore,
    },
    user::{
        User, UserDirectory, UserError, UserId, in_memory_directory::InMemoryUserDirectory,
        json_file_directory::JsonFileUserDirectory,
    },
    wallet::{
        Amount, DEFAULT_WALLET, Wallet, WalletError, WalletStore,
        in_memory_store::InMemoryWalletStore, json_file_store::JsonFileWalletStore,
    },
};

/// Admin wallet that funds deposits. May run down to the configured floor.
pub const BANK_WALLET: &str = "bank";
/// Admin suspense wallet for EFT deposits whose reference matches no wallet.
pub const UNKNOWN_DEPOSITS_WALLET: &str = "unknown-deposits";

const USERS_FILE: &str = "users.json";
const WALLETS_FILE: &str = "wallets.json";

/// Coarse error classes, for callers that map failures onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authorization,
    Conflict,
    InsufficientFunds,
    Internal,
}

impl ErrorKind {
    /// Kind to expose outside the process. Unknown users and sessions are
    /// reported like failed authorization so callers cannot probe for them.
    pub fn public(self) -> Self {
        match self {
            ErrorKind::NotFound => ErrorKind::Authorization,
            kind => kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum BankError {
    #[error(transparent)]
    User(#[from] UserError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Goods(#[from] GoodsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Unknown session")]
    UnknownSession,
    #[error("{0} is restricted to the admin user")]
    AdminOnly(&'static str),
    #[error("Unknown user msisdn={0}")]
    UnknownMsisdn(String),
    #[error("Cannot buy your own goods")]
    OwnGoods,
    #[error("Goods {0} belong to another user")]
    NotGoodsOwner(GoodsId),
    #[error("User {seller} offers no goods named \"{name}\"")]
    GoodsNotOffered { seller: String, name: String },
    #[error("Bank invariant violated: {0}")]
    Internal(String),
}

impl BankError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BankError::User(err) => match err {
                UserError::InvalidMsisdn(_)
                | UserError::InvalidName(_)
                | UserError::InvalidPassword(_) => ErrorKind::Validation,
                UserError::DuplicateMsisdn(_) => ErrorKind::Conflict,
                UserError::NotFound(_) => ErrorKind::NotFound,
                UserError::IncorrectPassword => ErrorKind::Authorization,
                UserError::Storage(_) => ErrorKind::Internal,
            },
            BankError::Wallet(err) => match err {
                WalletError::MissingName | WalletError::PositiveFloor(_) => ErrorKind::Validation,
                WalletError::Duplicate { .. } | WalletError::ReferenceTaken(_) => {
                    ErrorKind::Conflict
                }
                WalletError::NotFound(_) => ErrorKind::NotFound,
                WalletError::ReferenceExhausted { .. } | WalletError::Storage(_) => {
                    ErrorKind::Internal
                }
            },
            BankError::Session(err) => match err {
                SessionError::UnknownUser(_) => ErrorKind::NotFound,
                SessionError::BadCredentials => ErrorKind::Authorization,
            },
            BankError::Ledger(err) => match err {
                LedgerError::InvalidSession | LedgerError::NotOwner => ErrorKind::Authorization,
                LedgerError::MissingWallet { .. }
                | LedgerError::SameWallet
                | LedgerError::InvalidAmount(_)
                | LedgerError::MissingReference => ErrorKind::Validation,
                LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            },
            BankError::Goods(err) => match err {
                GoodsError::MissingName | GoodsError::InvalidCost(_) => ErrorKind::Validation,
                GoodsError::NotFound(_) => ErrorKind::NotFound,
            },
            BankError::Config(_) | BankError::OwnGoods => ErrorKind::Validation,
            BankError::UnknownSession | BankError::AdminOnly(_) | BankError::NotGoodsOwner(_) => {
                ErrorKind::Authorization
            }
            BankError::UnknownMsisdn(_) | BankError::GoodsNotOffered { .. } => ErrorKind::NotFound,
            BankError::Storage(_) | BankError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Outcome of a money movement made through the bank.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub transaction: Arc<Transaction>,
    /// Balance of the wallet the caller cares about: the payer's for
    /// transfers and payments, the receiver's for deposits.
    pub new_balance: Amount,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementLine {
    pub id: TransactionId,
    pub time: DateTime<Utc>,
    pub description: String,
    pub reference: String,
    /// Negative when the wallet was debited.
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MiniStatement {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub expiry: DateTime<Utc>,
    pub balance: Amount,
    /// Most recent entries of the user's default wallet, oldest first.
    pub recent: Vec<StatementLine>,
}

/// Composition root and the operations offered to clients.
///
/// Every money movement goes through the [`Ledger`]. The bank only resolves
/// sessions, users and wallets and builds references.
pub struct Bank {
    users: Arc<dyn UserDirectory>,
    wallets: Arc<dyn WalletStore>,
    sessions: Arc<dyn SessionStore>,
    ledger: Ledger,
    goods: GoodsCatalog,
    admin: Arc<User>,
    bank_wallet: Arc<Wallet>,
    unknown_deposits: Arc<Wallet>,
    statement_size: usize,
}

impl Bank {
    /// Builds the stores selected by `config.storage` and bootstraps the
    /// admin user and wallets.
    pub fn new(config: &BankConfig) -> Result<Self, BankError> {
        config.validate()?;
        let (users, wallets): (Arc<dyn UserDirectory>, Arc<dyn WalletStore>) =
            match &config.storage {
                StorageConfig::Memory => (
                    Arc::new(InMemoryUserDirectory::default()),
                    Arc::new(InMemoryWalletStore::default()),
                ),
                StorageConfig::JsonFile { dir } => {
                    fs::create_dir_all(dir).map_err(|source| StorageError::Io {
                        path: dir.clone(),
                        source,
                    })?;
                    (
                        Arc::new(JsonFileUserDirectory::open(dir.join(USERS_FILE))?),
                        Arc::new(JsonFileWalletStore::open(dir.join(WALLETS_FILE))?),
                    )
                }
            };
        Self::with_stores(config, users, wallets)
    }

    /// Same as [`Bank::new`] over caller supplied stores.
    pub fn with_stores(
        config: &BankConfig,
        users: Arc<dyn UserDirectory>,
        wallets: Arc<dyn WalletStore>,
    ) -> Result<Self, BankError> {
        let admin = match users.get_by_msisdn(&config.admin.msisdn) {
            Some(admin) => admin,
            None => users.create(
                &config.admin.msisdn,
                &config.admin.name,
                &config.admin.password,
            )?,
        };
        let bank_wallet = admin_wallet(
            &*wallets,
            &admin,
            BANK_WALLET,
            config.bank_wallet_min_balance,
        )?;
        let unknown_deposits = admin_wallet(&*wallets, &admin, UNKNOWN_DEPOSITS_WALLET, 0)?;

        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(
            Arc::clone(&users),
            config.session_ttl(),
        ));
        info!(
            admin = %admin.id(),
            bank_wallet = %bank_wallet.id(),
            bank_balance = bank_wallet.balance(),
            storage = ?config.storage,
            "bank started"
        );
        Ok(Self {
            ledger: Ledger::new(Arc::clone(&sessions), Arc::clone(&wallets)),
            users,
            wallets,
            sessions,
            goods: GoodsCatalog::default(),
            admin,
            bank_wallet,
            unknown_deposits,
            statement_size: config.statement_size,
        })
    }

    pub fn users(&self) -> &dyn UserDirectory {
        &*self.users
    }

    pub fn wallets(&self) -> &dyn WalletStore {
        &*self.wallets
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        &*self.sessions
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn goods(&self) -> &GoodsCatalog {
        &self.goods
    }

    pub fn admin(&self) -> &Arc<User> {
        &self.admin
    }

    pub fn bank_wallet(&self) -> &Arc<Wallet> {
        &self.bank_wallet
    }

    pub fn unknown_deposits_wallet(&self) -> &Arc<Wallet> {
        &self.unknown_deposits
    }

    fn session(&self, id: SessionId) -> Result<Arc<Session>, BankError> {
        self.sessions.get(id).ok_or(BankError::UnknownSession)
    }

    fn admin_session(
        &self,
        id: SessionId,
        operation: &'static str,
    ) -> Result<Arc<Session>, BankError> {
        let session = self.session(id)?;
        if session.user_id() != self.admin.id() {
            return Err(BankError::AdminOnly(operation));
        }
        Ok(session)
    }

    fn user_by_msisdn(&self, msisdn: &str) -> Result<Arc<User>, BankError> {
        let msisdn = msisdn.trim();
        self.users
            .get_by_msisdn(msisdn)
            .ok_or_else(|| BankError::UnknownMsisdn(msisdn.to_string()))
    }

    fn default_wallet(&self, user: UserId) -> Result<Arc<Wallet>, BankError> {
        Ok(self.wallets.get_by_owner_and_name(user, DEFAULT_WALLET)?)
    }

    /// Creates the user with a `default` wallet and its deposit reference.
    pub fn register_user(
        &self,
        msisdn: &str,
        name: &str,
        pin: &str,
    ) -> Result<(Arc<User>, Arc<Wallet>), BankError> {
        let user = self.users.create(msisdn, name, pin)?;
        let wallet = self.wallets.create(user.id(), DEFAULT_WALLET, 0)?;
        let reference = self.wallets.allocate_deposit_reference(&wallet)?;
        debug!(
            user_id = %user.id(),
            wallet_id = %wallet.id(),
            deposit_reference = %reference,
            "user registered"
        );
        Ok((user, wallet))
    }

    pub fn login(&self, user: UserId, pin: &str) -> Result<Arc<Session>, BankError> {
        Ok(self.sessions.create(user, pin)?)
    }

    pub fn login_msisdn(&self, msisdn: &str, pin: &str) -> Result<Arc<Session>, BankError> {
        let msisdn = msisdn.trim();
        let user = self
            .users
            .get_by_msisdn(msisdn)
            .ok_or_else(|| SessionError::UnknownUser(msisdn.to_string()))?;
        self.login(user.id(), pin)
    }

    pub fn logout(&self, session: SessionId) {
        self.sessions.end(session);
    }

    /// Slides the session expiry and returns the new one.
    pub fn keep_alive(&self, session: SessionId) -> Result<DateTime<Utc>, BankError> {
        self.session(session)?
            .extend()
            .ok_or(BankError::UnknownSession)
    }

    pub fn change_pin(&self, session: SessionId, old: &str, new: &str) -> Result<(), BankError> {
        let session = self.session(session)?;
        Ok(self.users.set_password(session.user_id(), old, new)?)
    }

    /// Admin only. Loads `amount` from the bank wallet into the default
    /// wallet of the user with `msisdn`.
    pub fn deposit(
        &self,
        session: SessionId,
        msisdn: &str,
        amount: Amount,
    ) -> Result<Receipt, BankError> {
        let session = self.admin_session(session, "deposit")?;
        let user = self.user_by_msisdn(msisdn)?;
        let wallet = self.default_wallet(user.id())?;
        let reference = format!("deposit into {}", user.msisdn());
        let transaction = self.ledger.send(
            &session,
            Some(&*self.bank_wallet),
            Some(&*wallet),
            amount,
            &reference,
        )?;
        Ok(Receipt {
            new_balance: transaction.credit_balance_after(),
            transaction,
        })
    }

    /// Admin only. Loads an EFT payment from the bank statement into the
    /// wallet holding `reference`, or into the suspense wallet when no wallet
    /// does.
    pub fn eft_deposit(
        &self,
        session: SessionId,
        reference: &str,
        amount: Amount,
    ) -> Result<Receipt, BankError> {
        let session = self.admin_session(session, "eft deposit")?;
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(LedgerError::MissingReference.into());
        }
        let wallet = match self.wallets.get_by_deposit_reference(reference) {
            Ok(wallet) => wallet,
            Err(WalletError::NotFound(_)) => {
                info!(reference, amount, "unmatched deposit reference, crediting suspense wallet");
                Arc::clone(&self.unknown_deposits)
            }
            Err(err) => return Err(err.into()),
        };
        let transaction = self.ledger.send(
            &session,
            Some(&*self.bank_wallet),
            Some(&*wallet),
            amount,
            &format!("EFT {reference}"),
        )?;
        Ok(Receipt {
            new_balance: transaction.credit_balance_after(),
            transaction,
        })
    }

    /// Sends from the session user's default wallet to the default wallet of
    /// the user with `to_msisdn`.
    pub fn transfer(
        &self,
        session: SessionId,
        to_msisdn: &str,
        amount: Amount,
        reference: &str,
    ) -> Result<Receipt, BankError> {
        let session = self.session(session)?;
        let from = self.default_wallet(session.user_id())?;
        let to = self.default_wallet(self.user_by_msisdn(to_msisdn)?.id())?;
        let transaction = self
            .ledger
            .send(&session, Some(&*from), Some(&*to), amount, reference)?;
        Ok(Receipt {
            new_balance: transaction.debit_balance_after(),
            transaction,
        })
    }

    pub fn add_goods(
        &self,
        session: SessionId,
        name: &str,
        cost: Amount,
    ) -> Result<Arc<Goods>, BankError> {
        let session = self.session(session)?;
        Ok(self.goods.create(session.user_id(), name, cost)?)
    }

    pub fn remove_goods(
        &self,
        session: SessionId,
        goods: GoodsId,
    ) -> Result<Arc<Goods>, BankError> {
        let session = self.session(session)?;
        if self.goods.get(goods)?.owner() != session.user_id() {
            return Err(BankError::NotGoodsOwner(goods));
        }
        Ok(self.goods.remove(goods).ok_or(GoodsError::NotFound(goods))?)
    }

    /// Goods offered by the session user.
    pub fn list_goods(&self, session: SessionId) -> Result<Vec<Arc<Goods>>, BankError> {
        let session = self.session(session)?;
        Ok(self.goods.by_owner(session.user_id()))
    }

    /// Goods named `name` offered by the user with `seller_msisdn`.
    pub fn find_goods(&self, seller_msisdn: &str, name: &str) -> Result<Arc<Goods>, BankError> {
        let seller = self.user_by_msisdn(seller_msisdn)?;
        self.goods
            .find(seller.id(), name)
            .ok_or_else(|| BankError::GoodsNotOffered {
                seller: seller.msisdn().to_string(),
                name: name.trim().to_string(),
            })
    }

    /// Pays the owner of `goods` its cost from the buyer's default wallet.
    pub fn pay_goods(&self, session: SessionId, goods: GoodsId) -> Result<Receipt, BankError> {
        let session = self.session(session)?;
        let goods = self.goods.get(goods)?;
        if goods.owner() == session.user_id() {
            return Err(BankError::OwnGoods);
        }
        let buyer = self.default_wallet(session.user_id())?;
        let seller = self.default_wallet(goods.owner())?;
        let reference = format!("{} buy {}", session.user().name(), goods.name());
        let transaction = self.ledger.send(
            &session,
            Some(&*buyer),
            Some(&*seller),
            goods.cost(),
            &reference,
        )?;
        Ok(Receipt {
            new_balance: transaction.debit_balance_after(),
            transaction,
        })
    }

    pub fn mini_statement(&self, session: SessionId) -> Result<MiniStatement, BankError> {
        let session = self.session(session)?;
        let wallet = self.default_wallet(session.user_id())?;
        let entries = self.ledger.for_wallet(wallet.id());
        let skip = entries.len().saturating_sub(self.statement_size);
        let recent = entries[skip..]
            .iter()
            .map(|tx| StatementLine {
                id: tx.id(),
                time: tx.timestamp(),
                description: tx.description().to_string(),
                reference: tx.reference().to_string(),
                amount: if tx.debit_wallet() == wallet.id() {
                    -tx.amount()
                } else {
                    tx.amount()
                },
            })
            .collect();
        Ok(MiniStatement {
            session_id: session.id(),
            user_id: session.user_id(),
            expiry: session.expiry(),
            balance: wallet.balance(),
            recent,
        })
    }
}

/// Existing admin wallet `name`, or a new one. An existing wallet must match
/// the owner and floor the bank expects.
fn admin_wallet(
    wallets: &dyn WalletStore,
    admin: &User,
    name: &str,
    min_balance: Amount,
) -> Result<Arc<Wallet>, BankError> {
    let wallet = match wallets.get_by_owner_and_name(admin.id(), name) {
        Ok(wallet) => wallet,
        Err(WalletError::NotFound(_)) => wallets.create(admin.id(), name, min_balance)?,
        Err(err) => return Err(err.into()),
    };
    if wallet.owner() != admin.id() {
        return Err(BankError::Internal(format!(
            "wallet {} is owned by {}, expected admin {}",
            wallet.id(),
            wallet.owner(),
            admin.id()
        )));
    }
    if wallet.min_balance() != min_balance {
        return Err(BankError::Internal(format!(
            "{name} wallet has minimum balance {}, configured {min_balance}",
            wallet.min_balance()
        )));
    }
    Ok(wallet)
}
