/// Account entity: balance, access code, lockout and its ledger.
/// Every invariant is enforced here, whatever the caller does.
pub mod account;

/// Immutable ledger entries.
pub mod transaction;

/// One-way digest of access codes.
pub mod secret;

/// Owner of all accounts: creation with unique ids, lookup, and
/// transfers that lock both accounts in id order.
pub mod directory;

/// Login cycle of the single terminal user, with inactivity expiry.
pub mod session;

pub mod config;

/// Load/save seam for the account set, plus JSON file and in memory
/// implementations.
pub mod store;

/// Script-driven ATM front end used by the binary and the integration
/// tests. It would live in its own crate in a larger setup.
pub mod bin_utils;
