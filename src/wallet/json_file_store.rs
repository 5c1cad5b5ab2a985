use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    Amount, Wallet, WalletError, WalletId, WalletStore, in_memory_store::InMemoryWalletStore,
};
use crate::{
    document::{JsonCollection, StorageError},
    user::UserId,
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletDocument {
    id: WalletId,
    owner: UserId,
    name: String,
    min_balance: Amount,
    balance: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deposit_reference: Option<String>,
}

impl From<&Wallet> for WalletDocument {
    fn from(wallet: &Wallet) -> Self {
        Self {
            id: wallet.id(),
            owner: wallet.owner(),
            name: wallet.name().to_string(),
            min_balance: wallet.min_balance(),
            balance: wallet.balance(),
            deposit_reference: wallet.deposit_reference().map(ToOwned::to_owned),
        }
    }
}

/// Wallet store kept as a flat collection of wallet documents in a JSON file.
///
/// All indices live in memory and follow the same rules as
/// [`InMemoryWalletStore`]. The file is rewritten after every create and
/// reference allocation, and on [`WalletStore::flush`] for balances, so both
/// sides of a transfer land in the same write.
pub struct JsonFileWalletStore {
    inner: InMemoryWalletStore,
    documents: JsonCollection<WalletDocument>,
}

impl JsonFileWalletStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, WalletError> {
        let documents: JsonCollection<WalletDocument> = JsonCollection::new(path);
        let inner = InMemoryWalletStore::default();
        for doc in documents.load()? {
            inner.restore(Wallet::new(
                doc.id,
                doc.owner,
                doc.name,
                doc.min_balance,
                doc.balance,
                doc.deposit_reference,
            ))?;
        }
        debug!(
            path = %documents.path().display(),
            wallets = inner.all().len(),
            "wallet documents loaded"
        );
        Ok(Self { inner, documents })
    }

    fn persist(&self) -> Result<(), StorageError> {
        self.documents.save(|| {
            self.inner
                .all()
                .iter()
                .map(|wallet| WalletDocument::from(wallet.as_ref()))
                .collect()
        })
    }

    /// For changes that cannot be undone once applied in memory.
    fn persist_or_warn(&self, operation: &str) {
        if let Err(err) = self.persist() {
            warn!(
                path = %self.documents.path().display(),
                operation,
                "failed to persist wallets: {err}"
            );
        }
    }
}

impl WalletStore for JsonFileWalletStore {
    fn create(
        &self,
        owner: UserId,
        name: &str,
        min_balance: Amount,
    ) -> Result<Arc<Wallet>, WalletError> {
        let wallet = self.inner.create(owner, name, min_balance)?;
        if let Err(err) = self.persist() {
            self.inner.discard(wallet.id());
            return Err(err.into());
        }
        Ok(wallet)
    }

    fn get_by_id(&self, id: WalletId) -> Result<Arc<Wallet>, WalletError> {
        self.inner.get_by_id(id)
    }

    fn get_by_owner_and_name(
        &self,
        owner: UserId,
        name: &str,
    ) -> Result<Arc<Wallet>, WalletError> {
        self.inner.get_by_owner_and_name(owner, name)
    }

    fn allocate_deposit_reference(&self, wallet: &Wallet) -> Result<String, WalletError> {
        let had_reference = wallet.deposit_reference().is_some();
        let reference = self.inner.allocate_deposit_reference(wallet)?;
        if !had_reference {
            self.persist_or_warn("allocate deposit reference");
        }
        Ok(reference)
    }

    fn get_by_deposit_reference(&self, reference: &str) -> Result<Arc<Wallet>, WalletError> {
        self.inner.get_by_deposit_reference(reference)
    }

    fn debit(&self, wallet: &Wallet, amount: Amount) {
        self.inner.debit(wallet, amount);
    }

    fn credit(&self, wallet: &Wallet, amount: Amount) {
        self.inner.credit(wallet, amount);
    }

    fn flush(&self) {
        self.persist_or_warn("flush");
    }

    fn all(&self) -> Vec<Arc<Wallet>> {
        self.inner.all()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::wallet::DEFAULT_WALLET;

    #[test]
    fn wallets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let owner = Uuid::new_v4();

        let (id, reference) = {
            let store = JsonFileWalletStore::open(&path).unwrap();
            let bank = store.create(owner, "bank", -1000).unwrap();
            let wallet = store.create(owner, DEFAULT_WALLET, 0).unwrap();
            let reference = store.allocate_deposit_reference(&wallet).unwrap();
            store.debit(&bank, 250);
            store.credit(&wallet, 250);
            store.flush();
            (wallet.id(), reference)
        };

        let store = JsonFileWalletStore::open(&path).unwrap();
        let wallet = store.get_by_id(id).unwrap();
        assert_eq!(wallet.balance(), 250);
        assert_eq!(wallet.deposit_reference(), Some(reference.as_str()));
        assert!(Arc::ptr_eq(
            &wallet,
            &store.get_by_deposit_reference(&reference).unwrap()
        ));
        let bank = store.get_by_owner_and_name(owner, "bank").unwrap();
        assert_eq!(bank.balance(), -250);
        assert_eq!(bank.min_balance(), -1000);

        // uniqueness still enforced after reload
        assert!(matches!(
            store.create(owner, DEFAULT_WALLET, 0),
            Err(WalletError::Duplicate { .. })
        ));
    }

    #[test]
    fn failed_write_rolls_back_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("wallets.json");
        let store = JsonFileWalletStore::open(&path).unwrap();
        let owner = Uuid::new_v4();

        let err = store.create(owner, DEFAULT_WALLET, 0).unwrap_err();
        assert!(matches!(err, WalletError::Storage(StorageError::Io { .. })));
        assert!(store.get_by_owner_and_name(owner, DEFAULT_WALLET).is_err());
        assert!(store.all().is_empty());
    }

    #[test]
    fn balances_are_written_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let owner = Uuid::new_v4();
        let store = JsonFileWalletStore::open(&path).unwrap();
        let bank = store.create(owner, "bank", -1000).unwrap();
        let wallet = store.create(owner, DEFAULT_WALLET, 0).unwrap();

        store.debit(&bank, 400);
        store.credit(&wallet, 400);
        let reloaded = JsonFileWalletStore::open(&path).unwrap();
        assert_eq!(reloaded.get_by_id(bank.id()).unwrap().balance(), 0);
        assert_eq!(reloaded.get_by_id(wallet.id()).unwrap().balance(), 0);

        store.flush();
        let reloaded = JsonFileWalletStore::open(&path).unwrap();
        assert_eq!(reloaded.get_by_id(bank.id()).unwrap().balance(), -400);
        assert_eq!(reloaded.get_by_id(wallet.id()).unwrap().balance(), 400);
    }

    #[test]
    fn invalid_documents_in_file_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let id = Uuid::new_v4();
        let same_id = serde_json::json!([
            {"id": id, "owner": Uuid::new_v4(), "name": "default", "minBalance": 0, "balance": 0},
            {"id": id, "owner": Uuid::new_v4(), "name": "default", "minBalance": 0, "balance": 5},
        ]);
        std::fs::write(&path, same_id.to_string()).unwrap();
        assert!(matches!(
            JsonFileWalletStore::open(&path),
            Err(WalletError::Duplicate { .. })
        ));

        let positive_floor = serde_json::json!([
            {"id": id, "owner": Uuid::new_v4(), "name": "default", "minBalance": 10, "balance": 0},
        ]);
        std::fs::write(&path, positive_floor.to_string()).unwrap();
        assert!(matches!(
            JsonFileWalletStore::open(&path),
            Err(WalletError::PositiveFloor(10))
        ));
    }

    #[test]
    fn duplicate_references_in_file_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets.json");
        let docs = serde_json::json!([
            {"id": Uuid::new_v4(), "owner": Uuid::new_v4(), "name": "default",
             "minBalance": 0, "balance": 0, "depositReference": "W-1ABC-2DEF"},
            {"id": Uuid::new_v4(), "owner": Uuid::new_v4(), "name": "default",
             "minBalance": 0, "balance": 0, "depositReference": "W-1ABC-2DEF"},
        ]);
        std::fs::write(&path, docs.to_string()).unwrap();
        assert!(matches!(
            JsonFileWalletStore::open(&path),
            Err(WalletError::ReferenceTaken(_))
        ));
    }
}
