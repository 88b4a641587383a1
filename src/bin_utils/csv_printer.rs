use std::io::Write;

use anyhow::Context;
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::account::{AccountId, AccountSnapshot};

#[derive(Debug, Serialize)]
pub struct AccountRow {
    pub account: AccountId,
    pub owner: String,
    pub balance: Decimal,
    pub locked: bool,
    pub transactions: usize,
}

impl From<AccountSnapshot> for AccountRow {
    fn from(snapshot: AccountSnapshot) -> Self {
        Self {
            account: snapshot.id,
            owner: snapshot.owner,
            balance: snapshot.balance,
            locked: snapshot.locked,
            transactions: snapshot.transactions,
        }
    }
}

/// Writes the account summary as CSV, one row per account.
pub fn print_accounts<W>(
    output: &mut W,
    accounts: impl IntoIterator<Item = AccountRow>,
) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for row in accounts {
        let account = row.account;
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write account {account} to CSV"))?;
    }
    writer.flush().context("Failed to flush CSV writer")
}
