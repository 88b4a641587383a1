use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    TransferOut,
    TransferIn,
}

/// Ledger entry. Built only by [`crate::account::Account`] at posting time,
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    kind: TransactionKind,
    amount: Decimal,
    source: AccountId,
    target: Option<AccountId>,
    timestamp: DateTime<Utc>,
}

impl Transaction {
    pub(crate) fn single(kind: TransactionKind, amount: Decimal, source: AccountId) -> Self {
        Self {
            kind,
            amount,
            source,
            target: None,
            timestamp: Utc::now(),
        }
    }

    /// `source` is always the debited side, `target` the credited one,
    /// whichever account the entry is posted to.
    pub(crate) fn transfer(
        kind: TransactionKind,
        amount: Decimal,
        source: AccountId,
        target: AccountId,
    ) -> Self {
        Self {
            kind,
            amount,
            source,
            target: Some(target),
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn source(&self) -> AccountId {
        self.source
    }

    pub fn target(&self) -> Option<AccountId> {
        self.target
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        let amount = self.amount;
        match (self.kind, self.target) {
            (TransactionKind::Deposit, _) => write!(f, "[{at}] DEPOSIT: ${amount:.2}"),
            (TransactionKind::Withdrawal, _) => write!(f, "[{at}] WITHDRAWAL: ${amount:.2}"),
            (TransactionKind::TransferOut, Some(target)) => {
                write!(f, "[{at}] TRANSFER OUT: ${amount:.2} to account {target}")
            }
            (TransactionKind::TransferIn, _) => write!(
                f,
                "[{at}] TRANSFER IN: ${amount:.2} from account {}",
                self.source
            ),
            (TransactionKind::TransferOut, None) => write!(f, "[{at}] TRANSFER OUT: ${amount:.2}"),
        }
    }
}
