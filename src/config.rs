use std::{path::Path, time::Duration};

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("`{field}` must be greater than zero")]
    MustBePositive { field: &'static str },
    #[error("`{field}` must be at most {max}")]
    TooLarge { field: &'static str, max: u64 },
}

/// Upper bound on the inactivity timeout, one day.
pub const MAX_SESSION_TIMEOUT_SECS: u64 = 86_400;

/// Tunables of the ledger core. Every field has a default, so a config file
/// only needs the values it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub minimum_opening_balance: Decimal,
    pub minimum_secret_length: usize,
    pub session_timeout_secs: u64,
    /// Random draws before account id generation falls back to a linear scan.
    pub random_id_attempts: u32,
    pub recent_history_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            minimum_opening_balance: Decimal::ONE_HUNDRED,
            minimum_secret_length: 4,
            session_timeout_secs: 60,
            random_id_attempts: 64,
            recent_history_len: 5,
        }
    }
}

impl LedgerConfig {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_timeout_secs == 0 {
            return Err(ConfigError::MustBePositive {
                field: "session_timeout_secs",
            });
        }
        if self.session_timeout_secs > MAX_SESSION_TIMEOUT_SECS {
            return Err(ConfigError::TooLarge {
                field: "session_timeout_secs",
                max: MAX_SESSION_TIMEOUT_SECS,
            });
        }
        if self.random_id_attempts == 0 {
            return Err(ConfigError::MustBePositive {
                field: "random_id_attempts",
            });
        }
        if self.minimum_secret_length == 0 {
            return Err(ConfigError::MustBePositive {
                field: "minimum_secret_length",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::prelude::FromPrimitive;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = LedgerConfig::from_toml("session_timeout_secs = 5\n").unwrap();
        assert_eq!(config.session_timeout(), Duration::from_secs(5));
        assert_eq!(config.minimum_opening_balance, Decimal::from_u32(100).unwrap());
        assert_eq!(config.minimum_secret_length, 4);
        assert_eq!(config.recent_history_len, 5);
    }

    #[test]
    fn decimal_opening_balance() {
        let config = LedgerConfig::from_toml("minimum_opening_balance = \"25.50\"\n").unwrap();
        assert_eq!(config.minimum_opening_balance, Decimal::new(2550, 2));
    }

    #[test]
    fn reject_invalid_values() {
        let err = LedgerConfig::from_toml("session_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MustBePositive {
                field: "session_timeout_secs"
            }
        ));
        assert!(matches!(
            LedgerConfig::from_toml("unknown = 1\n").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn session_timeout_is_bounded() {
        assert!(LedgerConfig::from_toml("session_timeout_secs = 86400\n").is_ok());
        assert!(matches!(
            LedgerConfig::from_toml("session_timeout_secs = 86401\n").unwrap_err(),
            ConfigError::TooLarge {
                field: "session_timeout_secs",
                max: MAX_SESSION_TIMEOUT_SECS
            }
        ));
        let huge = LedgerConfig {
            session_timeout_secs: u64::MAX,
            ..LedgerConfig::default()
        };
        assert!(matches!(huge.validate(), Err(ConfigError::TooLarge { .. })));
    }
}
