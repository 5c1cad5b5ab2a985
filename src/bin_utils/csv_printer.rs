use std::io::Write;

use csv::Writer;
use serde::Serialize;

use crate::wallet::Amount;

#[derive(Debug, Serialize)]
pub struct WalletRow {
    /// Owner msisdn.
    pub owner: String,
    pub wallet: String,
    pub deposit_reference: String,
    pub balance: Amount,
    pub min_balance: Amount,
}

pub fn print_wallets<W>(
    output: &mut W,
    wallets: impl Iterator<Item = WalletRow>,
) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for row in wallets {
        if let Err(err) = writer.serialize(row) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}
