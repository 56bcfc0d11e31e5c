//! Top-level daemon error. Library crates classify their own errors into
//! section 7's six kinds; this enum wraps them for `main`'s single
//! non-zero-exit diagnostic plus the handful of failures that only make
//! sense at the orchestration layer (bad config, missing identity).

use displaydoc::Display;
use thiserror::Error;

#[derive(Debug, Display, Error)]
pub enum WgmeshdError {
    /// invalid configuration: {0}
    InvalidConfig(String),
    /// crypto error: {0}
    Crypto(#[from] wgmesh_crypto::CryptoError),
    /// netctl error: {0}
    NetCtl(#[from] wgmesh_netctl::NetCtlError),
    /// discovery error: {0}
    Discovery(#[from] wgmesh_discovery::DiscoveryError),
    /// reconcile error: {0}
    Reconcile(#[from] wgmesh_reconcile::ReconcileError),
    /// persistence error: {0}
    Persist(#[from] wgmesh_persist::PersistError),
    /// io error on {path}: {source}
    Io { path: String, source: std::io::Error },
}

pub type WgmeshdResult<T> = Result<T, WgmeshdError>;
