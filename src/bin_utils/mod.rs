//! Drives a [`Bank`] from a CSV instruction list and prints the resulting
//! wallets. Shared by the binary and the integration tests.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use csv_parser::{CsvInstructionParser, Instruction, InstructionKind};
use csv_printer::{WalletRow, print_wallets};
use thiserror::Error;
use tracing::warn;

use crate::{
    bank::{Bank, BankError},
    config::{AdminConfig, BankConfig},
    session::SessionId,
};
pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum InstructionError {
    #[error("Malformed row: {0}")]
    Parse(#[from] csv::Error),
    #[error("Missing {field} for {kind:?} instruction")]
    MissingField {
        kind: InstructionKind,
        field: &'static str,
    },
    #[error(transparent)]
    Rejected(#[from] BankError),
}

pub struct Service<'w, R, W: 'w> {
    pub config: BankConfig,
    pub input: R,
    pub output: &'w mut W,
    pub error_printer: Box<dyn FnMut(u64, InstructionError) + 'w>,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let bank = Bank::new(&self.config).context("Failed to start the bank")?;
        let admin = &self.config.admin;
        let session = bank
            .login_msisdn(&admin.msisdn, &admin.password)
            .context("Failed to log in as admin")?;
        bank.logout(session.id());

        for (line, row) in CsvInstructionParser::new(self.input) {
            let outcome = row
                .map_err(InstructionError::from)
                .and_then(|instruction| execute(&bank, admin, instruction));
            if let Err(err) = outcome {
                warn!(line, error = %err, "instruction rejected");
                (self.error_printer)(line, err);
            }
        }

        let mut rows: Vec<_> = bank
            .wallets()
            .all()
            .iter()
            .map(|wallet| WalletRow {
                owner: bank
                    .users()
                    .get_by_id(wallet.owner())
                    .map(|user| user.msisdn().to_string())
                    .unwrap_or_else(|| wallet.owner().to_string()),
                wallet: wallet.name().to_string(),
                deposit_reference: wallet.deposit_reference().unwrap_or_default().to_string(),
                balance: wallet.balance(),
                min_balance: wallet.min_balance(),
            })
            .collect();
        rows.sort_by(|a, b| (&a.owner, &a.wallet).cmp(&(&b.owner, &b.wallet)));
        print_wallets(self.output, rows.into_iter())
    }
}

fn require<T>(
    kind: InstructionKind,
    field: &'static str,
    value: Option<T>,
) -> Result<T, InstructionError> {
    value.ok_or(InstructionError::MissingField { kind, field })
}

/// Runs `action` in a fresh session of the user, logging out afterwards
/// whatever the outcome.
fn as_user<T>(
    bank: &Bank,
    msisdn: &str,
    pin: &str,
    action: impl FnOnce(SessionId) -> Result<T, BankError>,
) -> Result<T, BankError> {
    let session = bank.login_msisdn(msisdn, pin)?;
    let result = action(session.id());
    bank.logout(session.id());
    result
}

/// Admin instructions get their own session too: any row logging in with the
/// admin msisdn ends the admin's previous session.
fn execute(bank: &Bank, admin: &AdminConfig, row: Instruction) -> Result<(), InstructionError> {
    let kind = row.kind;
    let msisdn = || require(kind, "msisdn", row.msisdn.as_deref());
    let pin = || require(kind, "pin", row.pin.as_deref());
    let name = || require(kind, "name", row.name.as_deref());
    let target = || require(kind, "target", row.target.as_deref());
    let amount = || require(kind, "amount", row.amount);

    match kind {
        InstructionKind::Register => {
            bank.register_user(msisdn()?, name()?, pin()?)?;
        }
        InstructionKind::Deposit => {
            let (to, amount) = (target()?, amount()?);
            as_user(bank, &admin.msisdn, &admin.password, |session| {
                bank.deposit(session, to, amount)
            })?;
        }
        InstructionKind::Eft => {
            let reference = require(kind, "reference", row.reference.as_deref())?;
            let amount = amount()?;
            as_user(bank, &admin.msisdn, &admin.password, |session| {
                bank.eft_deposit(session, reference, amount)
            })?;
        }
        InstructionKind::Send => {
            let (to, amount) = (target()?, amount()?);
            let reference = row.reference.as_deref().unwrap_or_default();
            as_user(bank, msisdn()?, pin()?, |session| {
                bank.transfer(session, to, amount, reference)
            })?;
        }
        InstructionKind::Goods => {
            let (goods, cost) = (name()?, amount()?);
            as_user(bank, msisdn()?, pin()?, |session| {
                bank.add_goods(session, goods, cost)
            })?;
        }
        InstructionKind::Buy => {
            let goods = bank.find_goods(target()?, name()?)?;
            as_user(bank, msisdn()?, pin()?, |session| {
                bank.pay_goods(session, goods.id())
            })?;
        }
    }
    Ok(())
}
