//! Short, human-typable codes standing in for a wallet id on EFT deposits.
//!
//! A reference looks like `W-3KQZ-7ABD`: a digit and three upper case
//! letters, twice. The space is small (about 3 * 10^11 codes), so every draw
//! is checked against the references already handed out.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Mutex, MutexGuard},
};

use rand::Rng;
use tracing::{debug, warn};

use super::{Wallet, WalletError, WalletId};

pub const MAX_ATTEMPTS: usize = 10;

pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut reference = String::with_capacity(11);
    reference.push_str("W-");
    push_group(rng, &mut reference);
    reference.push('-');
    push_group(rng, &mut reference);
    reference
}

fn push_group<R: Rng + ?Sized>(rng: &mut R, out: &mut String) {
    out.push(char::from(b'0' + rng.gen_range(0..10u8)));
    for _ in 0..3 {
        out.push(char::from(b'A' + rng.gen_range(0..26u8)));
    }
}

/// Global index of claimed references. Guarded by its own lock, separate
/// from the wallet indices.
#[derive(Default)]
pub struct DepositReferenceIndex {
    by_reference: Mutex<HashMap<String, WalletId>>,
}

impl DepositReferenceIndex {
    fn by_reference(&self) -> MutexGuard<'_, HashMap<String, WalletId>> {
        self.by_reference
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn allocate(&self, wallet: &Wallet) -> Result<String, WalletError> {
        self.allocate_with(&mut rand::thread_rng(), wallet)
    }

    pub fn allocate_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        wallet: &Wallet,
    ) -> Result<String, WalletError> {
        let mut by_reference = self.by_reference();
        if let Some(existing) = wallet.deposit_reference() {
            return Ok(existing.to_string());
        }

        for attempt in 1..=MAX_ATTEMPTS {
            let candidate = generate(rng);
            match by_reference.entry(candidate) {
                Entry::Occupied(entry) => {
                    debug!(
                        attempt,
                        reference = entry.key().as_str(),
                        "deposit reference collision"
                    );
                }
                Entry::Vacant(entry) => {
                    let reference = entry.key().clone();
                    if !wallet.bind_deposit_reference(reference.clone()) {
                        // bound elsewhere without going through the index
                        let existing = wallet.deposit_reference().unwrap_or_default();
                        return Ok(existing.to_string());
                    }
                    entry.insert(wallet.id());
                    debug!(
                        wallet_id = %wallet.id(),
                        reference = reference.as_str(),
                        "deposit reference allocated"
                    );
                    return Ok(reference);
                }
            }
        }

        warn!(wallet_id = %wallet.id(), "deposit reference space exhausted");
        Err(WalletError::ReferenceExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    pub fn resolve(&self, reference: &str) -> Option<WalletId> {
        self.by_reference().get(reference.trim()).copied()
    }

    /// Registers a reference restored from storage.
    pub(crate) fn claim(&self, reference: &str, wallet: WalletId) -> Result<(), WalletError> {
        match self.by_reference().entry(reference.to_string()) {
            Entry::Occupied(entry) if *entry.get() != wallet => {
                Err(WalletError::ReferenceTaken(reference.to_string()))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(wallet);
                Ok(())
            }
        }
    }

    pub(crate) fn release(&self, reference: &str) {
        self.by_reference().remove(reference);
    }
}
