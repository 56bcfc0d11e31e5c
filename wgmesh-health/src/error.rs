//! Error types for the health monitor.

use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum HealthError {
    /// kernel WireGuard control failed: {0}
    WireGuard(#[from] wgmesh_netctl::NetCtlError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    WireGuard,
}

impl HealthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HealthError::WireGuard(_) => ErrorKind::WireGuard,
        }
    }
}

pub type HealthResult<T> = Result<T, HealthError>;
