use thiserror::Error;

use crate::account::Account;

pub mod json_store;
pub mod memory_store;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Account store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Account store is corrupt: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Load/save of the full account set. Called outside any session, the core
/// does not care how accounts are encoded.
pub trait AccountStore {
    /// All persisted accounts, empty when nothing was saved yet.
    fn load(&self) -> Result<Vec<Account>, StoreError>;

    fn save(&mut self, accounts: &[Account]) -> Result<(), StoreError>;
}
