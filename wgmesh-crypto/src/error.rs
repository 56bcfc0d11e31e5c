//! Error types for key derivation and envelope crypto.

use displaydoc::Display;
use thiserror::Error;

/// Errors produced by the crypto substrate.
#[derive(Debug, Display, Error)]
pub enum CryptoError {
    /// shared secret must be at least {min} bytes, got {actual}
    SecretTooShort { min: usize, actual: usize },
    /// envelope failed to decrypt or deserialize
    BadMessage,
    /// envelope protocol tag `{0}` is not `wgmesh-v1`
    WrongProtocol(String),
    /// envelope timestamp {ts} is outside the replay window around {now}
    ReplayWindow { ts: i64, now: i64 },
    /// announcement field `{field}` exceeds its validation limit
    ValidationLimit { field: &'static str },
    /// membership token did not match any of the accepted hours
    InvalidMembershipToken,
    /// rotation announcement signature did not verify
    InvalidRotationSignature,
    /// rotation announcement timestamp outside the ±1 hour window
    RotationTimestampOutOfRange,
    /// json serialization failed: {0}
    Serialization(String),
}

impl From<serde_json::Error> for CryptoError {
    fn from(e: serde_json::Error) -> Self {
        CryptoError::Serialization(e.to_string())
    }
}

/// Coarse error classification used by call sites to decide propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadMessage,
    Transient,
    Permanent,
    Capacity,
    NotFound,
    Corrupt,
}

impl CryptoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptoError::SecretTooShort { .. } => ErrorKind::Permanent,
            CryptoError::BadMessage
            | CryptoError::WrongProtocol(_)
            | CryptoError::ReplayWindow { .. }
            | CryptoError::ValidationLimit { .. }
            | CryptoError::InvalidMembershipToken
            | CryptoError::InvalidRotationSignature
            | CryptoError::RotationTimestampOutOfRange => ErrorKind::BadMessage,
            CryptoError::Serialization(_) => ErrorKind::Corrupt,
        }
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
