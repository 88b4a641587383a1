use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use rand::Rng;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use crate::{
    account::{
        Account, AccountError, AccountId, AccountSnapshot, InvalidAccountId, MAX_ACCOUNT_ID,
        MIN_ACCOUNT_ID,
    },
    config::LedgerConfig,
    secret::is_valid_secret,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error(transparent)]
    AccountErr(#[from] AccountError),
    #[error(transparent)]
    InvalidId(#[from] InvalidAccountId),
    #[error("Account {0} not found")]
    UnknownAccount(AccountId),
    #[error("Account {0} already exists")]
    DuplicateId(AccountId),
    #[error("Opening balance must be at least {minimum}")]
    BelowMinimumOpening { minimum: Decimal },
    #[error("Access code must be at least {min_len} digits and contain only digits")]
    InvalidSecret { min_len: usize },
    #[error("No free account numbers left")]
    IdSpaceExhausted,
    #[error("Stored account {id} is corrupt: {reason}")]
    CorruptAccount { id: AccountId, reason: &'static str },
}

/// Shared reference to an account registered in the directory.
#[derive(Debug, Clone)]
pub struct AccountHandle {
    id: AccountId,
    inner: Arc<Mutex<Account>>,
}

impl AccountHandle {
    fn new(account: Account) -> Self {
        Self {
            id: account.id(),
            inner: Arc::new(Mutex::new(account)),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    /// Exclusive access to the account. A panic in another holder does not
    /// invalidate the account, every mutation is all-or-nothing.
    pub fn lock(&self) -> MutexGuard<'_, Account> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of every account in a running program. Lookups are exact-match by id.
#[derive(Debug)]
pub struct AccountDirectory {
    config: LedgerConfig,
    accounts: RwLock<BTreeMap<AccountId, AccountHandle>>,
}

impl AccountDirectory {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            accounts: RwLock::default(),
        }
    }

    /// Rebuilds a directory from persisted accounts. Each account must
    /// satisfy the same invariants a live one does.
    pub fn from_accounts(
        config: LedgerConfig,
        accounts: impl IntoIterator<Item = Account>,
    ) -> Result<Self, DirectoryError> {
        let mut map = BTreeMap::new();
        for account in accounts {
            account
                .check_invariants()
                .map_err(|reason| DirectoryError::CorruptAccount {
                    id: account.id(),
                    reason,
                })?;
            match map.entry(account.id()) {
                Entry::Occupied(entry) => return Err(DirectoryError::DuplicateId(*entry.key())),
                Entry::Vacant(entry) => {
                    entry.insert(AccountHandle::new(account));
                }
            }
        }
        Ok(Self {
            config,
            accounts: RwLock::new(map),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Opens an account under a freshly generated, unused id.
    pub fn create(
        &self,
        owner: impl Into<String>,
        secret: &str,
        initial_balance: Decimal,
    ) -> Result<AccountHandle, DirectoryError> {
        self.check_opening(secret, initial_balance)?;
        let mut accounts = self.write();
        let id = allocate_id(
            |id| accounts.contains_key(&id),
            self.config.random_id_attempts,
            &mut rand::thread_rng(),
        )
        .ok_or(DirectoryError::IdSpaceExhausted)?;
        Ok(register(&mut accounts, id, owner.into(), secret, initial_balance))
    }

    /// Opens an account under a caller chosen id.
    pub fn create_with_id(
        &self,
        id: AccountId,
        owner: impl Into<String>,
        secret: &str,
        initial_balance: Decimal,
    ) -> Result<AccountHandle, DirectoryError> {
        self.check_opening(secret, initial_balance)?;
        let mut accounts = self.write();
        if accounts.contains_key(&id) {
            return Err(DirectoryError::DuplicateId(id));
        }
        Ok(register(&mut accounts, id, owner.into(), secret, initial_balance))
    }

    pub fn lookup(&self, id: AccountId) -> Option<AccountHandle> {
        self.read().get(&id).cloned()
    }

    /// Transfers between two registered accounts. Both accounts are locked
    /// for the whole operation, lower id first.
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<(), DirectoryError> {
        if from == to {
            return Err(AccountError::SameAccount.into());
        }
        let sender = self.lookup(from).ok_or(DirectoryError::UnknownAccount(from))?;
        let receiver = self.lookup(to).ok_or(DirectoryError::UnknownAccount(to))?;

        let (first, second) = if from < to {
            (&sender, &receiver)
        } else {
            (&receiver, &sender)
        };
        let mut first = first.lock();
        let mut second = second.lock();
        let (sender, receiver) = if from < to {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };
        sender.transfer(receiver, amount)?;
        info!(%from, %to, %amount, "transfer completed");
        Ok(())
    }

    /// Copies of all accounts, ordered by id, for persistence.
    pub fn export(&self) -> Vec<Account> {
        self.read().values().map(|handle| handle.lock().clone()).collect()
    }

    pub fn snapshots(&self) -> Vec<AccountSnapshot> {
        self.read().values().map(|handle| handle.lock().snapshot()).collect()
    }

    fn check_opening(&self, secret: &str, initial_balance: Decimal) -> Result<(), DirectoryError> {
        if !is_valid_secret(secret, self.config.minimum_secret_length) {
            return Err(DirectoryError::InvalidSecret {
                min_len: self.config.minimum_secret_length,
            });
        }
        if initial_balance < self.config.minimum_opening_balance {
            return Err(DirectoryError::BelowMinimumOpening {
                minimum: self.config.minimum_opening_balance,
            });
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<AccountId, AccountHandle>> {
        self.accounts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<AccountId, AccountHandle>> {
        self.accounts.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn register(
    accounts: &mut BTreeMap<AccountId, AccountHandle>,
    id: AccountId,
    owner: String,
    secret: &str,
    initial_balance: Decimal,
) -> AccountHandle {
    let handle = AccountHandle::new(Account::open(id, owner, secret, initial_balance));
    accounts.insert(id, handle.clone());
    info!(account = %id, %initial_balance, "account opened");
    handle
}

/// Random draws first, then a full scan, so a crowded id space terminates
/// with `None` instead of looping.
fn allocate_id<R: Rng>(
    is_taken: impl Fn(AccountId) -> bool,
    random_attempts: u32,
    rng: &mut R,
) -> Option<AccountId> {
    let free = |raw: u32| AccountId::new(raw).ok().filter(|id| !is_taken(*id));
    (0..random_attempts)
        .find_map(|_| free(rng.gen_range(MIN_ACCOUNT_ID..=MAX_ACCOUNT_ID)))
        .or_else(|| (MIN_ACCOUNT_ID..=MAX_ACCOUNT_ID).find_map(free))
}
