use crate::account::Account;

use super::{AccountStore, StoreError};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    accounts: Vec<Account>,
}

impl AccountStore for MemoryStore {
    fn load(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.accounts.clone())
    }

    fn save(&mut self, accounts: &[Account]) -> Result<(), StoreError> {
        self.accounts = accounts.to_vec();
        Ok(())
    }
}
