//! Client-supplied idempotency key.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shortest key accepted from clients.
pub const IDEMPOTENCY_KEY_MIN_LEN: usize = 10;
/// Longest key accepted from clients.
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 255;

/// Validation errors for [`IdempotencyKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyKeyValidationError {
    #[error("idempotency key must be at least {min} characters, got {actual}")]
    TooShort { min: usize, actual: usize },
    #[error("idempotency key must be at most {max} characters, got {actual}")]
    TooLong { max: usize, actual: usize },
    #[error("idempotency key must not contain whitespace or control characters")]
    InvalidCharacters,
}

/// Opaque key that makes a registration request safely repeatable.
///
/// Keys are compared byte for byte. Two keys differing only in case are
/// distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate and construct a key.
    ///
    /// # Example
    ///
    /// ```
    /// # use compete_backend::domain::IdempotencyKey;
    /// let key = IdempotencyKey::new("checkout-7f3a9c").expect("valid key");
    /// assert_eq!(key.as_ref(), "checkout-7f3a9c");
    /// assert!(IdempotencyKey::new("short").is_err());
    /// ```
    pub fn new(key: impl Into<String>) -> Result<Self, IdempotencyKeyValidationError> {
        Self::from_owned(key.into())
    }

    fn from_owned(key: String) -> Result<Self, IdempotencyKeyValidationError> {
        let actual = key.chars().count();
        if actual < IDEMPOTENCY_KEY_MIN_LEN {
            return Err(IdempotencyKeyValidationError::TooShort {
                min: IDEMPOTENCY_KEY_MIN_LEN,
                actual,
            });
        }
        if actual > IDEMPOTENCY_KEY_MAX_LEN {
            return Err(IdempotencyKeyValidationError::TooLong {
                max: IDEMPOTENCY_KEY_MAX_LEN,
                actual,
            });
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdempotencyKeyValidationError::InvalidCharacters);
        }
        Ok(Self(key))
    }

    /// Short stable digest safe to write to logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl AsRef<str> for IdempotencyKey {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<IdempotencyKey> for String {
    fn from(value: IdempotencyKey) -> Self {
        value.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = IdempotencyKeyValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_owned(value)
    }
}
