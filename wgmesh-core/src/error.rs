//! Error types for the peer store and shared data model.

use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum CoreError {
    /// peer store is at capacity (1000 peers) and `{0}` is not already known
    StoreFull(String),
    /// no peer found for pubkey `{0}`
    PeerNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Capacity,
    NotFound,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::StoreFull(_) => ErrorKind::Capacity,
            CoreError::PeerNotFound(_) => ErrorKind::NotFound,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
