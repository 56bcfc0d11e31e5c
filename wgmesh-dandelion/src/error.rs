//! Error type for the Dandelion++ router.

use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum DandelionError {
    /// stem/fluff delivery failed: {0}
    Transport(String),
    /// announcement envelope could not be decoded: {0}
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Decode,
}

impl DandelionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DandelionError::Transport(_) => ErrorKind::Transport,
            DandelionError::Decode(_) => ErrorKind::Decode,
        }
    }
}

pub type DandelionResult<T> = Result<T, DandelionError>;
