//! Error type for on-disk persistence.

use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum PersistError {
    /// filesystem operation on {path} failed: {source}
    Io { path: String, source: std::io::Error },
    /// malformed persisted state: {0}
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Decode,
}

impl PersistError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PersistError::Io { .. } => ErrorKind::Io,
            PersistError::Decode(_) => ErrorKind::Decode,
        }
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        PersistError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type PersistResult<T> = Result<T, PersistError>;
