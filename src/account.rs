use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    secret::SecretDigest,
    transaction::{Transaction, TransactionKind},
};

/// Consecutive failed verifications that lock an account.
pub const MAX_FAILED_ATTEMPTS: u32 = 3;

pub const MIN_ACCOUNT_ID: u32 = 100_000;
pub const MAX_ACCOUNT_ID: u32 = 999_999;

/// Six digit account number. Ordering of ids is the lock order used by transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(u32);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("`{0}` is not a six digit account number")]
pub struct InvalidAccountId(pub String);

impl AccountId {
    pub fn new(raw: u32) -> Result<Self, InvalidAccountId> {
        if (MIN_ACCOUNT_ID..=MAX_ACCOUNT_ID).contains(&raw) {
            Ok(Self(raw))
        } else {
            Err(InvalidAccountId(raw.to_string()))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl FromStr for AccountId {
    type Err = InvalidAccountId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidAccountId(s.to_owned()));
        }
        s.parse::<u32>()
            .map_err(|_| InvalidAccountId(s.to_owned()))
            .and_then(Self::new)
    }
}

impl TryFrom<String> for AccountId {
    type Error = InvalidAccountId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Account is locked after too many failed attempts")]
    AccountLocked,
    #[error("Incorrect access code, {attempts_left} attempt(s) left")]
    WrongSecret { attempts_left: u32 },
    #[error("Amount must be positive, got {amount}")]
    NonPositiveAmount { amount: Decimal },
    #[error("Insufficient funds: balance is {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("Cannot transfer to the same account")]
    SameAccount,
    #[error("Amount {amount} would overflow the balance of account {account}")]
    BalanceOverflow { account: AccountId, amount: Decimal },
}

/// Read-only view for reporting and persistence; taking it is not account activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub owner: String,
    pub balance: Decimal,
    pub locked: bool,
    pub transactions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    owner: String,
    secret: SecretDigest,
    balance: Decimal,
    failed_attempts: u32,
    locked: bool,
    history: Vec<Transaction>,
    last_activity: DateTime<Utc>,
}

impl Account {
    /// Only [`crate::directory::AccountDirectory`] opens accounts.
    pub(crate) fn open(id: AccountId, owner: String, secret: &str, initial_balance: Decimal) -> Self {
        Self {
            id,
            owner,
            secret: SecretDigest::of(secret),
            balance: initial_balance,
            failed_attempts: 0,
            locked: false,
            history: Vec::new(),
            last_activity: Utc::now(),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id,
            owner: self.owner.clone(),
            balance: self.balance,
            locked: self.locked,
            transactions: self.history.len(),
        }
    }

    /// The only path that can lock an account. A locked account refuses
    /// without consuming an attempt.
    pub fn verify(&mut self, secret: &str) -> Result<(), AccountError> {
        self.touch();
        if self.locked {
            return Err(AccountError::AccountLocked);
        }
        if self.secret.matches(secret) {
            self.failed_attempts = 0;
            return Ok(());
        }
        self.failed_attempts += 1;
        if self.failed_attempts >= MAX_FAILED_ATTEMPTS {
            self.locked = true;
            warn!(account = %self.id, "account locked after {} failed attempts", self.failed_attempts);
        } else {
            warn!(account = %self.id, attempts = self.failed_attempts, "wrong access code");
        }
        Err(AccountError::WrongSecret {
            attempts_left: MAX_FAILED_ATTEMPTS.saturating_sub(self.failed_attempts),
        })
    }

    /// Administrative override. Callers gate it behind their own credential.
    pub fn unlock(&mut self) {
        self.locked = false;
        self.failed_attempts = 0;
        info!(account = %self.id, "account unlocked");
    }

    pub fn change_secret(&mut self, old: &str, new: &str) -> Result<(), AccountError> {
        self.verify(old)?;
        self.secret = SecretDigest::of(new);
        info!(account = %self.id, "access code changed");
        Ok(())
    }

    pub fn balance(&mut self) -> Decimal {
        self.touch();
        self.balance
    }

    pub fn deposit(&mut self, amount: Decimal) -> Result<(), AccountError> {
        self.ensure_unlocked()?;
        ensure_positive(amount)?;
        self.balance = self.credited(amount)?;
        self.post(Transaction::single(TransactionKind::Deposit, amount, self.id));
        Ok(())
    }

    pub fn withdraw(&mut self, amount: Decimal) -> Result<(), AccountError> {
        self.ensure_unlocked()?;
        ensure_positive(amount)?;
        self.ensure_covers(amount)?;
        self.balance -= amount;
        self.post(Transaction::single(TransactionKind::Withdrawal, amount, self.id));
        Ok(())
    }

    /// Moves `amount` to `target`. Every check runs before the first write,
    /// so a failure leaves both accounts untouched.
    pub fn transfer(&mut self, target: &mut Account, amount: Decimal) -> Result<(), AccountError> {
        self.ensure_unlocked()?;
        if self.id == target.id {
            return Err(AccountError::SameAccount);
        }
        ensure_positive(amount)?;
        self.ensure_covers(amount)?;
        let credited = target.credited(amount)?;

        self.balance -= amount;
        target.balance = credited;
        self.post(Transaction::transfer(
            TransactionKind::TransferOut,
            amount,
            self.id,
            target.id,
        ));
        target.post(Transaction::transfer(
            TransactionKind::TransferIn,
            amount,
            self.id,
            target.id,
        ));
        Ok(())
    }

    /// Last `n` entries, oldest first.
    pub fn recent_history(&mut self, n: usize) -> &[Transaction] {
        self.touch();
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn history(&mut self) -> &[Transaction] {
        self.touch();
        &self.history
    }

    fn ensure_unlocked(&self) -> Result<(), AccountError> {
        if self.locked {
            Err(AccountError::AccountLocked)
        } else {
            Ok(())
        }
    }

    fn ensure_covers(&self, amount: Decimal) -> Result<(), AccountError> {
        if amount > self.balance {
            Err(AccountError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            })
        } else {
            Ok(())
        }
    }

    fn credited(&self, amount: Decimal) -> Result<Decimal, AccountError> {
        self.balance
            .checked_add(amount)
            .ok_or(AccountError::BalanceOverflow {
                account: self.id,
                amount,
            })
    }

    /// Checks state that did not come from this type's own operations,
    /// such as an account read back from a store.
    pub(crate) fn check_invariants(&self) -> Result<(), &'static str> {
        if self.balance < Decimal::ZERO {
            return Err("negative balance");
        }
        if self.failed_attempts >= MAX_FAILED_ATTEMPTS && !self.locked {
            return Err("too many failed attempts on an unlocked account");
        }
        if self.history.iter().any(|t| t.amount() <= Decimal::ZERO) {
            return Err("non-positive amount in history");
        }
        Ok(())
    }

    fn post(&mut self, transaction: Transaction) {
        debug!(account = %self.id, kind = ?transaction.kind(), amount = %transaction.amount(), "posted");
        self.history.push(transaction);
        self.touch();
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), AccountError> {
    if amount <= Decimal::ZERO {
        Err(AccountError::NonPositiveAmount { amount })
    } else {
        Ok(())
    }
}
