use std::io::Read;

use csv::{Position, StringRecord, StringRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::account::AccountId;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptAction {
    Open,
    Login,
    Logout,
    Balance,
    Deposit,
    Withdraw,
    Transfer,
    /// Last few transactions.
    History,
    /// Every transaction.
    Statement,
    ChangeSecret,
    Unlock,
    Wait,
}

/// One terminal interaction. Which columns are required depends on `action`.
#[derive(Debug, Deserialize)]
pub struct ScriptRow {
    pub action: ScriptAction,
    #[serde(default)]
    pub account: Option<AccountId>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub new_secret: Option<String>,
    #[serde(default)]
    pub target: Option<AccountId>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Parses an ATM script in CSV format, yielding each row with its line number.
pub struct CsvScriptParser<R> {
    headers: StringRecord,
    records: StringRecordsIntoIter<R>,
}

impl<R> CsvScriptParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);
        let headers = reader.headers()?.clone();

        Ok(Self {
            headers,
            records: reader.into_records(),
        })
    }
}

impl<R> Iterator for CsvScriptParser<R>
where
    R: Read,
{
    type Item = (u64, Result<ScriptRow, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(match record {
            Ok(record) => (
                record.position().map_or(0, Position::line),
                record.deserialize(Some(&self.headers)),
            ),
            Err(err) => (err.position().map_or(0, Position::line), Err(err)),
        })
    }
}
