use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One-way SHA-256 digest of an access code, hex encoded.
///
/// The raw code is never kept around; [`SecretDigest::matches`] recomputes
/// the digest of the candidate and compares.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretDigest(String);

impl SecretDigest {
    pub fn of(secret: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn matches(&self, secret: &str) -> bool {
        let candidate = Self::of(secret);
        // both sides are 64 hex chars, fold the whole string
        self.0
            .bytes()
            .zip(candidate.0.bytes())
            .fold(self.0.len() ^ candidate.0.len(), |acc, (a, b)| {
                acc | usize::from(a ^ b)
            })
            == 0
    }
}

impl fmt::Debug for SecretDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretDigest(..)")
    }
}

/// Access codes are ASCII digits only, at least `min_len` of them.
pub fn is_valid_secret(secret: &str, min_len: usize) -> bool {
    secret.len() >= min_len && secret.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_hides_secret() {
        let a = SecretDigest::of("1234");
        let b = SecretDigest::of("1234");
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 64);
        assert!(!a.0.contains("1234"));
        assert_eq!(
            a.0,
            "03ac674216f3e15c761ee1a5e255f067953623c8b388b4459e13f978d7c846f4"
        );
    }

    #[test]
    fn matches_only_same_secret() {
        let digest = SecretDigest::of("1234");
        assert!(digest.matches("1234"));
        assert!(!digest.matches("1235"));
        assert!(!digest.matches(""));
        assert_eq!(format!("{digest:?}"), "SecretDigest(..)");
    }

    #[test]
    fn secret_policy() {
        assert!(is_valid_secret("1234", 4));
        assert!(is_valid_secret("123456", 4));
        assert!(!is_valid_secret("123", 4));
        assert!(!is_valid_secret("12a4", 4));
        assert!(!is_valid_secret("", 4));
    }
}
