use std::{
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    account::{Account, AccountError, AccountId},
    config::MAX_SESSION_TIMEOUT_SECS,
    directory::{AccountDirectory, DirectoryError},
    secret::is_valid_secret,
    transaction::Transaction,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not authenticated, please log in")]
    NotAuthenticated,
    #[error(transparent)]
    AccountErr(#[from] AccountError),
    #[error(transparent)]
    DirectoryErr(DirectoryError),
    #[error("Failed to start session watcher: {0}")]
    Watcher(#[from] io::Error),
}

impl From<DirectoryError> for SessionError {
    fn from(value: DirectoryError) -> Self {
        match value {
            DirectoryError::AccountErr(err) => Self::AccountErr(err),
            err => Self::DirectoryErr(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated(AccountId),
}

/// How the previous login cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    LoggedOut,
    Expired,
}

#[derive(Debug, Default)]
struct Slot {
    account: Option<AccountId>,
    deadline: Option<Instant>,
    /// Bumped by every transition out of a login cycle; a watcher only acts
    /// while the generation it was started for is current.
    generation: u64,
    last_end: Option<SessionEnd>,
}

impl Slot {
    /// Refreshes the deadline of a live session, or expires an overdue one.
    fn touch(&mut self, now: Instant, timeout: Duration) -> Result<AccountId, SessionError> {
        let (Some(id), Some(deadline)) = (self.account, self.deadline) else {
            return Err(SessionError::NotAuthenticated);
        };
        if now >= deadline {
            self.end(SessionEnd::Expired);
            return Err(SessionError::NotAuthenticated);
        }
        self.deadline = Some(now + timeout);
        Ok(id)
    }

    fn end(&mut self, reason: SessionEnd) -> Option<AccountId> {
        let account = self.account.take();
        self.deadline = None;
        self.generation += 1;
        if let Some(id) = account {
            self.last_end = Some(reason);
            match reason {
                SessionEnd::Expired => info!(account = %id, "session expired"),
                SessionEnd::LoggedOut => info!(account = %id, "logged out"),
            }
        }
        account
    }
}

#[derive(Debug, Default)]
struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Binding between the terminal user and one authenticated account.
///
/// All state transitions and every account operation run under the slot
/// mutex, so the expiry watcher can never clear the binding while an
/// operation is in flight, and no operation runs past the deadline.
#[derive(Debug)]
pub struct Session {
    directory: Arc<AccountDirectory>,
    timeout: Duration,
    shared: Arc<Shared>,
    watcher: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(directory: Arc<AccountDirectory>) -> Self {
        let timeout = directory.config().session_timeout();
        Self::with_timeout(directory, timeout)
    }

    /// `timeout` is capped at [`MAX_SESSION_TIMEOUT_SECS`].
    pub fn with_timeout(directory: Arc<AccountDirectory>, timeout: Duration) -> Self {
        Self {
            directory,
            timeout: timeout.min(Duration::from_secs(MAX_SESSION_TIMEOUT_SECS)),
            shared: Arc::default(),
            watcher: None,
        }
    }

    pub fn directory(&self) -> &Arc<AccountDirectory> {
        &self.directory
    }

    /// Verifies `secret` against the account and binds the session to it.
    /// A failed verification counts towards the account lockout and leaves
    /// the current binding as it was.
    pub fn authenticate(&mut self, id: AccountId, secret: &str) -> Result<(), SessionError> {
        let handle = self
            .directory
            .lookup(id)
            .ok_or(DirectoryError::UnknownAccount(id))?;
        let generation = {
            let mut slot = self.shared.lock();
            handle.lock().verify(secret)?;
            slot.end(SessionEnd::LoggedOut);
            slot.account = Some(id);
            slot.deadline = Some(Instant::now() + self.timeout);
            self.shared.wake.notify_all();
            slot.generation
        };
        self.join_watcher();
        self.watcher = Some(spawn_watcher(Arc::clone(&self.shared), generation)?);
        info!(account = %id, "authenticated");
        Ok(())
    }

    /// Refreshes the expiry deadline.
    pub fn activity(&self) -> Result<AccountId, SessionError> {
        self.shared.lock().touch(Instant::now(), self.timeout)
    }

    pub fn logout(&mut self) -> Result<AccountId, SessionError> {
        let account = {
            let mut slot = self.shared.lock();
            let account = slot.end(SessionEnd::LoggedOut);
            self.shared.wake.notify_all();
            account
        };
        self.join_watcher();
        account.ok_or(SessionError::NotAuthenticated)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), SessionState::Authenticated(_))
    }

    pub fn state(&self) -> SessionState {
        let slot = self.shared.lock();
        match (slot.account, slot.deadline) {
            (Some(id), Some(deadline)) if Instant::now() < deadline => {
                SessionState::Authenticated(id)
            }
            _ => SessionState::Anonymous,
        }
    }

    pub fn last_end(&self) -> Option<SessionEnd> {
        self.shared.lock().last_end
    }

    pub fn balance(&self) -> Result<Decimal, SessionError> {
        self.with_account(|account| Ok(account.balance()))
    }

    pub fn deposit(&self, amount: Decimal) -> Result<(), SessionError> {
        self.with_account(|account| account.deposit(amount))
    }

    pub fn withdraw(&self, amount: Decimal) -> Result<(), SessionError> {
        self.with_account(|account| account.withdraw(amount))
    }

    pub fn transfer(&self, to: AccountId, amount: Decimal) -> Result<(), SessionError> {
        self.with_session(|from| Ok(self.directory.transfer(from, to, amount)?))
    }

    pub fn recent_history(&self, n: usize) -> Result<Vec<Transaction>, SessionError> {
        self.with_account(|account| Ok(account.recent_history(n).to_vec()))
    }

    pub fn history(&self) -> Result<Vec<Transaction>, SessionError> {
        self.with_account(|account| Ok(account.history().to_vec()))
    }

    /// The new code is checked against the secret policy before the old one
    /// is verified, so a rejected new code costs no attempt.
    pub fn change_secret(&self, old: &str, new: &str) -> Result<(), SessionError> {
        self.with_session(|id| {
            let min_len = self.directory.config().minimum_secret_length;
            if !is_valid_secret(new, min_len) {
                return Err(DirectoryError::InvalidSecret { min_len }.into());
            }
            self.on_account(id, |account| account.change_secret(old, new))
        })
    }

    fn with_session<T>(
        &self,
        op: impl FnOnce(AccountId) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut slot = self.shared.lock();
        let id = slot.touch(Instant::now(), self.timeout)?;
        op(id)
    }

    fn with_account<T>(
        &self,
        op: impl FnOnce(&mut Account) -> Result<T, AccountError>,
    ) -> Result<T, SessionError> {
        self.with_session(|id| self.on_account(id, op))
    }

    fn on_account<T>(
        &self,
        id: AccountId,
        op: impl FnOnce(&mut Account) -> Result<T, AccountError>,
    ) -> Result<T, SessionError> {
        let handle = self
            .directory
            .lookup(id)
            .ok_or(DirectoryError::UnknownAccount(id))?;
        let mut account = handle.lock();
        Ok(op(&mut *account)?)
    }

    fn join_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                debug!("session watcher panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        {
            let mut slot = self.shared.lock();
            slot.generation += 1;
            self.shared.wake.notify_all();
        }
        self.join_watcher();
    }
}

fn spawn_watcher(shared: Arc<Shared>, generation: u64) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("session-watcher".to_string())
        .spawn(move || {
            let mut slot = shared.lock();
            loop {
                if slot.generation != generation {
                    return;
                }
                let Some(deadline) = slot.deadline else {
                    return;
                };
                let now = Instant::now();
                if now >= deadline {
                    slot.end(SessionEnd::Expired);
                    return;
                }
                slot = shared
                    .wake
                    .wait_timeout(slot, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        })
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;
    use crate::config::LedgerConfig;

    fn dec(v: u32) -> Decimal {
        Decimal::from_u32(v).unwrap()
    }

    fn id(raw: &str) -> AccountId {
        raw.parse().unwrap()
    }

    fn directory() -> Arc<AccountDirectory> {
        let directory = AccountDirectory::new(LedgerConfig::default());
        directory
            .create_with_id(id("123456"), "John Doe", "1234", dec(5000))
            .unwrap();
        directory
            .create_with_id(id("789012"), "Jane Smith", "5678", dec(7500))
            .unwrap();
        Arc::new(directory)
    }

    #[test]
    fn anonymous_session_refuses_operations() {
        let session = Session::new(directory());
        assert_eq!(session.state(), SessionState::Anonymous);
        assert!(matches!(session.balance(), Err(SessionError::NotAuthenticated)));
        assert!(matches!(session.deposit(dec(1)), Err(SessionError::NotAuthenticated)));
        assert!(matches!(session.withdraw(dec(1)), Err(SessionError::NotAuthenticated)));
        assert!(matches!(
            session.transfer(id("789012"), dec(1)),
            Err(SessionError::NotAuthenticated)
        ));
        assert!(matches!(session.history(), Err(SessionError::NotAuthenticated)));
        assert!(matches!(session.activity(), Err(SessionError::NotAuthenticated)));
    }

    #[test]
    fn login_operate_logout() {
        let directory = directory();
        let mut session = Session::new(Arc::clone(&directory));

        assert!(matches!(
            session.authenticate(id("123456"), "0000"),
            Err(SessionError::AccountErr(AccountError::WrongSecret { attempts_left: 2 }))
        ));
        assert!(!session.is_active());
        assert!(matches!(
            session.authenticate(id("111111"), "1234"),
            Err(SessionError::DirectoryErr(DirectoryError::UnknownAccount(_)))
        ));

        session.authenticate(id("123456"), "1234").unwrap();
        assert_eq!(session.state(), SessionState::Authenticated(id("123456")));

        session.deposit(dec(100)).unwrap();
        assert_eq!(session.balance().unwrap(), dec(5100));
        assert!(matches!(
            session.withdraw(dec(6000)),
            Err(SessionError::AccountErr(AccountError::InsufficientFunds { .. }))
        ));
        assert!(matches!(
            session.transfer(id("123456"), dec(1)),
            Err(SessionError::AccountErr(AccountError::SameAccount))
        ));
        session.transfer(id("789012"), dec(5100)).unwrap();
        assert_eq!(session.balance().unwrap(), Decimal::ZERO);
        assert_eq!(session.history().unwrap().len(), 2);
        assert_eq!(session.recent_history(1).unwrap()[0].amount(), dec(5100));

        assert_eq!(session.logout().unwrap(), id("123456"));
        assert_eq!(session.last_end(), Some(SessionEnd::LoggedOut));
        assert!(matches!(session.balance(), Err(SessionError::NotAuthenticated)));
        assert!(matches!(session.logout(), Err(SessionError::NotAuthenticated)));

        let receiver = directory.lookup(id("789012")).unwrap();
        assert_eq!(receiver.lock().balance(), dec(12600));
    }

    #[test]
    fn locked_account_cannot_authenticate() {
        let mut session = Session::new(directory());
        for _ in 0..3 {
            session.authenticate(id("123456"), "0000").unwrap_err();
        }
        assert!(matches!(
            session.authenticate(id("123456"), "1234"),
            Err(SessionError::AccountErr(AccountError::AccountLocked))
        ));
        assert!(!session.is_active());

        session.directory().lookup(id("123456")).unwrap().lock().unlock();
        session.authenticate(id("123456"), "1234").unwrap();
        assert!(session.is_active());
    }

    #[test]
    fn change_secret_checks_policy_first() {
        let mut session = Session::new(directory());
        session.authenticate(id("123456"), "1234").unwrap();
        assert!(matches!(
            session.change_secret("1234", "12"),
            Err(SessionError::DirectoryErr(DirectoryError::InvalidSecret { min_len: 4 }))
        ));
        assert!(matches!(
            session.change_secret("9999", "4321"),
            Err(SessionError::AccountErr(AccountError::WrongSecret { .. }))
        ));
        session.change_secret("1234", "4321").unwrap();
        session.logout().unwrap();
        session.authenticate(id("123456"), "1234").unwrap_err();
        session.authenticate(id("123456"), "4321").unwrap();
    }

    #[test]
    fn idle_session_expires() {
        let mut session = Session::with_timeout(directory(), Duration::from_millis(50));
        session.authenticate(id("123456"), "1234").unwrap();
        thread::sleep(Duration::from_millis(150));

        assert_eq!(session.state(), SessionState::Anonymous);
        assert_eq!(session.last_end(), Some(SessionEnd::Expired));
        assert!(matches!(session.deposit(dec(1)), Err(SessionError::NotAuthenticated)));

        // re-authentication starts a fresh cycle
        session.authenticate(id("123456"), "1234").unwrap();
        session.deposit(dec(1)).unwrap();
    }

    #[test]
    fn activity_keeps_session_alive() {
        let mut session = Session::with_timeout(directory(), Duration::from_millis(200));
        session.authenticate(id("123456"), "1234").unwrap();
        for _ in 0..6 {
            thread::sleep(Duration::from_millis(60));
            session.balance().unwrap();
        }
        assert!(session.is_active());
        assert_eq!(session.activity().unwrap(), id("123456"));
    }

    #[test]
    fn overdue_operation_is_refused_without_watcher() {
        let mut slot = Slot {
            account: Some(id("123456")),
            deadline: Some(Instant::now()),
            ..Default::default()
        };
        let later = Instant::now() + Duration::from_millis(1);
        assert!(matches!(
            slot.touch(later, Duration::from_secs(60)),
            Err(SessionError::NotAuthenticated)
        ));
        assert_eq!(slot.account, None);
        assert_eq!(slot.generation, 1);
        assert_eq!(slot.last_end, Some(SessionEnd::Expired));
    }

    #[test]
    fn logout_cancels_watcher() {
        let mut session = Session::with_timeout(directory(), Duration::from_millis(30));
        session.authenticate(id("123456"), "1234").unwrap();
        session.logout().unwrap();
        assert!(session.watcher.is_none());
        thread::sleep(Duration::from_millis(80));
        // a stale watcher would have recorded an expiry
        assert_eq!(session.last_end(), Some(SessionEnd::LoggedOut));
    }

    #[test]
    fn oversized_timeout_is_capped() {
        let mut session = Session::with_timeout(directory(), Duration::MAX);
        assert_eq!(session.timeout, Duration::from_secs(MAX_SESSION_TIMEOUT_SECS));
        session.authenticate(id("123456"), "1234").unwrap();
        session.deposit(dec(1)).unwrap();
        assert_eq!(session.logout().unwrap(), id("123456"));
    }
}
