//! Error types for the reconciler.

use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum ReconcileError {
    /// kernel WireGuard control failed: {0}
    WireGuard(#[from] wgmesh_netctl::NetCtlError),
    /// route driver failed: {0}
    Route(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    WireGuard,
    Route,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::WireGuard(_) => ErrorKind::WireGuard,
            ReconcileError::Route(_) => ErrorKind::Route,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
