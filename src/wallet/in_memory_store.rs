use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use rand::Rng;
use tracing::debug;
use uuid::Uuid;

use super::{
    Amount, Wallet, WalletError, WalletId, WalletStore, deposit_reference::DepositReferenceIndex,
};
use crate::user::UserId;

#[derive(Default)]
struct WalletIndex {
    by_id: HashMap<WalletId, Arc<Wallet>>,
    by_owner_and_name: HashMap<(UserId, String), WalletId>,
}

#[derive(Default)]
pub struct InMemoryWalletStore {
    index: Mutex<WalletIndex>,
    references: DepositReferenceIndex,
}

impl InMemoryWalletStore {
    fn index(&self) -> MutexGuard<'_, WalletIndex> {
        self.index
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Indexes a wallet, including any deposit reference it already carries.
    /// Wallets read back from storage go through the same checks as new ones.
    pub(crate) fn restore(&self, wallet: Wallet) -> Result<Arc<Wallet>, WalletError> {
        if wallet.min_balance() > 0 {
            return Err(WalletError::PositiveFloor(wallet.min_balance()));
        }
        let mut index = self.index();
        let key = (wallet.owner(), wallet.name().to_string());
        if index.by_id.contains_key(&wallet.id()) || index.by_owner_and_name.contains_key(&key) {
            return Err(WalletError::Duplicate {
                owner: key.0,
                name: key.1,
            });
        }
        if let Some(reference) = wallet.deposit_reference() {
            self.references.claim(reference, wallet.id())?;
        }
        let wallet = Arc::new(wallet);
        index.by_owner_and_name.insert(key, wallet.id());
        index.by_id.insert(wallet.id(), Arc::clone(&wallet));
        Ok(wallet)
    }

    pub(crate) fn discard(&self, id: WalletId) {
        let mut index = self.index();
        if let Some(wallet) = index.by_id.remove(&id) {
            index
                .by_owner_and_name
                .remove(&(wallet.owner(), wallet.name().to_string()));
            if let Some(reference) = wallet.deposit_reference() {
                self.references.release(reference);
            }
        }
    }

    pub fn allocate_deposit_reference_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        wallet: &Wallet,
    ) -> Result<String, WalletError> {
        self.references.allocate_with(rng, wallet)
    }
}

impl WalletStore for InMemoryWalletStore {
    fn create(
        &self,
        owner: UserId,
        name: &str,
        min_balance: Amount,
    ) -> Result<Arc<Wallet>, WalletError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WalletError::MissingName);
        }
        let wallet = self.restore(Wallet::new(
            Uuid::new_v4(),
            owner,
            name.to_string(),
            min_balance,
            0,
            None,
        ))?;
        debug!(wallet_id = %wallet.id(), owner = %owner, name, min_balance, "wallet created");
        Ok(wallet)
    }

    fn get_by_id(&self, id: WalletId) -> Result<Arc<Wallet>, WalletError> {
        self.index()
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("id {id}")))
    }

    fn get_by_owner_and_name(
        &self,
        owner: UserId,
        name: &str,
    ) -> Result<Arc<Wallet>, WalletError> {
        let index = self.index();
        index
            .by_owner_and_name
            .get(&(owner, name.to_string()))
            .and_then(|id| index.by_id.get(id))
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("owner {owner} and name \"{name}\"")))
    }

    fn allocate_deposit_reference(&self, wallet: &Wallet) -> Result<String, WalletError> {
        self.references.allocate(wallet)
    }

    fn get_by_deposit_reference(&self, reference: &str) -> Result<Arc<Wallet>, WalletError> {
        self.references
            .resolve(reference)
            .and_then(|id| self.index().by_id.get(&id).cloned())
            .ok_or_else(|| WalletError::NotFound(format!("deposit reference \"{reference}\"")))
    }

    fn debit(&self, wallet: &Wallet, amount: Amount) {
        wallet.apply_debit(amount);
    }

    fn credit(&self, wallet: &Wallet, amount: Amount) {
        wallet.apply_credit(amount);
    }

    fn all(&self) -> Vec<Arc<Wallet>> {
        let mut wallets: Vec<_> = self.index().by_id.values().cloned().collect();
        wallets.sort_by(|a, b| (a.owner(), a.name()).cmp(&(b.owner(), b.name())));
        wallets
    }
}
