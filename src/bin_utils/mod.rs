//! Script-driven ATM front end. It plays the role of the terminal menu:
//! every row of the script is one user interaction routed through a
//! [`Session`], and the account set is loaded from and saved to an
//! [`AccountStore`] around the run.

use std::{
    io::{Read, Write},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    account::AccountId,
    config::LedgerConfig,
    directory::{AccountDirectory, DirectoryError},
    secret::SecretDigest,
    session::{Session, SessionError},
    store::AccountStore,
};
use csv_printer::{AccountRow, print_accounts};
use script_parser::{CsvScriptParser, ScriptAction, ScriptRow};
pub mod csv_printer;
pub mod script_parser;

/// Seeded into an empty store: id, owner, access code, opening balance.
pub const SAMPLE_ACCOUNTS: [(u32, &str, &str, i64); 2] = [
    (123_456, "John Doe", "1234", 5000),
    (789_012, "Jane Smith", "5678", 7500),
];

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Malformed script row: {0}")]
    Parse(#[from] csv::Error),
    #[error("`{field}` is required for {action:?}")]
    MissingField {
        action: ScriptAction,
        field: &'static str,
    },
    #[error("`{0}` is not a valid wait time")]
    InvalidWait(Decimal),
    #[error("Admin credential rejected, account remains locked")]
    AdminDenied,
    #[error(transparent)]
    SessionErr(#[from] SessionError),
    #[error(transparent)]
    DirectoryErr(#[from] DirectoryError),
}

pub struct Service<'w, R, W: 'w, S> {
    pub input: R,
    pub output: &'w mut W,
    pub store: S,
    pub config: LedgerConfig,
    /// Digest of the out-of-band credential that gates `unlock`.
    /// Without one, unlocking is refused.
    pub admin: Option<SecretDigest>,
    pub error_printer: Box<dyn FnMut(u64, ScriptError)>,
}

impl<'w, R, W, S> Service<'w, R, W, S>
where
    R: Read,
    W: Write + 'w,
    S: AccountStore,
{
    /// Runs the whole script and hands the store back after the final save.
    pub fn run(mut self) -> Result<S> {
        let accounts = self.store.load().context("Failed to load accounts")?;
        let directory = AccountDirectory::from_accounts(self.config.clone(), accounts)
            .context("Persisted accounts are inconsistent")?;
        if directory.is_empty() {
            seed_sample_accounts(&directory).context("Failed to seed sample accounts")?;
        }
        let directory = Arc::new(directory);

        let parser = CsvScriptParser::new(self.input).context("Failed to read script header")?;
        let mut teller = Teller {
            session: Session::new(Arc::clone(&directory)),
            admin: self.admin,
            recent_history_len: self.config.recent_history_len,
        };
        for (line, row) in parser {
            if let Err(err) = row.map_err(ScriptError::from).and_then(|row| teller.execute(row)) {
                (self.error_printer)(line, err);
            }
        }
        // the final save happens outside any session
        teller.close();
        drop(teller);

        self.store
            .save(&directory.export())
            .context("Failed to save accounts")?;
        print_accounts(
            self.output,
            directory.snapshots().into_iter().map(AccountRow::from),
        )?;
        Ok(self.store)
    }
}

pub fn seed_sample_accounts(directory: &AccountDirectory) -> Result<(), DirectoryError> {
    info!("initializing sample accounts");
    for (raw, owner, secret, balance) in SAMPLE_ACCOUNTS {
        directory.create_with_id(AccountId::new(raw)?, owner, secret, Decimal::from(balance))?;
    }
    Ok(())
}

struct Teller {
    session: Session,
    admin: Option<SecretDigest>,
    recent_history_len: usize,
}

impl Teller {
    /// Ends whatever session the script left open. Returns the account that
    /// was still logged in, if any.
    fn close(&mut self) -> Option<AccountId> {
        match self.session.logout() {
            Ok(account) => Some(account),
            Err(SessionError::NotAuthenticated) => None,
            Err(err) => {
                warn!(%err, "failed to end session");
                None
            }
        }
    }

    fn execute(&mut self, row: ScriptRow) -> Result<(), ScriptError> {
        let action = row.action;
        let required = |field| ScriptError::MissingField { action, field };
        match action {
            ScriptAction::Open => {
                let owner = row.owner.ok_or_else(|| required("owner"))?;
                let secret = row.secret.ok_or_else(|| required("secret"))?;
                let amount = row.amount.ok_or_else(|| required("amount"))?;
                let handle = self.session.directory().create(owner, &secret, amount)?;
                info!(account = %handle.id(), "account created, remember the account number");
            }
            ScriptAction::Login => {
                let account = row.account.ok_or_else(|| required("account"))?;
                let secret = row.secret.ok_or_else(|| required("secret"))?;
                self.session.authenticate(account, &secret)?;
            }
            ScriptAction::Logout => {
                self.session.logout()?;
            }
            ScriptAction::Balance => {
                let balance = self.session.balance()?;
                info!(%balance, "balance inquiry");
            }
            ScriptAction::Deposit => {
                self.session.deposit(row.amount.ok_or_else(|| required("amount"))?)?;
            }
            ScriptAction::Withdraw => {
                self.session.withdraw(row.amount.ok_or_else(|| required("amount"))?)?;
            }
            ScriptAction::Transfer => {
                let target = row.target.ok_or_else(|| required("target"))?;
                let amount = row.amount.ok_or_else(|| required("amount"))?;
                self.session.transfer(target, amount)?;
            }
            ScriptAction::History => {
                for entry in self.session.recent_history(self.recent_history_len)? {
                    info!("{entry}");
                }
            }
            ScriptAction::Statement => {
                for entry in self.session.history()? {
                    info!("{entry}");
                }
            }
            ScriptAction::ChangeSecret => {
                let secret = row.secret.ok_or_else(|| required("secret"))?;
                let new_secret = row.new_secret.ok_or_else(|| required("new_secret"))?;
                self.session.change_secret(&secret, &new_secret)?;
            }
            ScriptAction::Unlock => {
                let account = row.account.ok_or_else(|| required("account"))?;
                let credential = row.secret.ok_or_else(|| required("secret"))?;
                if !self.admin.as_ref().is_some_and(|admin| admin.matches(&credential)) {
                    warn!(%account, "unlock refused");
                    return Err(ScriptError::AdminDenied);
                }
                self.session
                    .directory()
                    .lookup(account)
                    .ok_or(DirectoryError::UnknownAccount(account))?
                    .lock()
                    .unlock();
            }
            ScriptAction::Wait => {
                let seconds = row.amount.ok_or_else(|| required("amount"))?;
                let wait = seconds
                    .to_f64()
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .ok_or(ScriptError::InvalidWait(seconds))?;
                thread::sleep(wait);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;

    fn teller(admin: Option<&str>) -> Teller {
        let directory = AccountDirectory::new(LedgerConfig::default());
        seed_sample_accounts(&directory).unwrap();
        Teller {
            session: Session::new(Arc::new(directory)),
            admin: admin.map(SecretDigest::of),
            recent_history_len: 5,
        }
    }

    fn row(action: ScriptAction) -> ScriptRow {
        ScriptRow {
            action,
            account: None,
            owner: None,
            secret: None,
            new_secret: None,
            target: None,
            amount: None,
        }
    }

    #[test]
    fn missing_fields_are_reported() {
        let mut teller = teller(None);
        let err = teller.execute(row(ScriptAction::Login)).unwrap_err();
        assert!(matches!(
            err,
            ScriptError::MissingField {
                action: ScriptAction::Login,
                field: "account"
            }
        ));
        assert_eq!(err.to_string(), "`account` is required for Login");
    }

    #[test]
    fn unlock_requires_admin_credential() {
        let mut teller = teller(Some("9999"));
        let john: AccountId = "123456".parse().unwrap();
        for _ in 0..3 {
            let _ = teller.session.authenticate(john, "0000");
        }

        let unlock = |secret: &str| ScriptRow {
            account: Some(john),
            secret: Some(secret.to_string()),
            ..row(ScriptAction::Unlock)
        };
        assert!(matches!(
            teller.execute(unlock("1111")),
            Err(ScriptError::AdminDenied)
        ));
        assert!(teller.session.directory().lookup(john).unwrap().lock().is_locked());

        teller.execute(unlock("9999")).unwrap();
        assert!(!teller.session.directory().lookup(john).unwrap().lock().is_locked());
    }

    #[test]
    fn unlock_without_configured_admin_is_refused() {
        let mut teller = teller(None);
        let unlock = ScriptRow {
            account: Some("123456".parse().unwrap()),
            secret: Some("admin".to_string()),
            ..row(ScriptAction::Unlock)
        };
        assert!(matches!(teller.execute(unlock), Err(ScriptError::AdminDenied)));
    }

    #[test]
    fn negative_wait_is_rejected() {
        let mut teller = teller(None);
        let wait = ScriptRow {
            amount: Some(Decimal::from_i32(-1).unwrap()),
            ..row(ScriptAction::Wait)
        };
        assert!(matches!(teller.execute(wait), Err(ScriptError::InvalidWait(_))));
    }

    #[test]
    fn close_ends_an_open_session() {
        let mut teller = teller(None);
        assert_eq!(teller.close(), None);

        let mut login = row(ScriptAction::Login);
        login.account = Some(AccountId::new(123_456).unwrap());
        login.secret = Some("1234".to_string());
        teller.execute(login).unwrap();
        assert_eq!(teller.close(), Some(AccountId::new(123_456).unwrap()));
        assert!(!teller.session.is_active());
        assert_eq!(teller.close(), None);
    }
}
