//! Shared data model and peer registry for wgmesh.
//!
//! This crate has no network or filesystem dependencies of its own: it is the
//! vocabulary (`types`) and the single source of truth (`store`) that every
//! other wgmesh crate reads from and writes into.

pub mod error;
pub mod store;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use store::{should_update_endpoint, PeerStore, PeerStoreStats};
pub use types::{
    ip_is_global_unicast_v6, ip_is_private_or_loopback, unix_now, DesiredPeerConfig, DiscoveryMethod, LocalNode,
    NatType, PeerEvent, PeerEventKind, PeerInfo, RelayRoutes,
};
