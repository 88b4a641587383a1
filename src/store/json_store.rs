use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind, Write},
    path::PathBuf,
};

use tracing::info;

use crate::account::Account;

use super::{AccountStore, StoreError};

/// Keeps the account set in a single JSON file. Saving writes a sibling
/// temp file first and renames it over the old one.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AccountStore for JsonFileStore {
    fn load(&self) -> Result<Vec<Account>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no account store yet, starting empty");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };
        let accounts: Vec<Account> = serde_json::from_reader(BufReader::new(file))?;
        info!(path = %self.path.display(), count = accounts.len(), "accounts loaded");
        Ok(accounts)
    }

    fn save(&mut self, accounts: &[Account]) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, accounts)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        info!(path = %self.path.display(), count = accounts.len(), "accounts saved");
        Ok(())
    }
}
