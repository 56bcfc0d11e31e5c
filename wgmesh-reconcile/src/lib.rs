//! Desired-state reconciliation and mesh-IP collision resolution
//! (sections 4.J and 4.M).
//!
//! [`Reconciler`] owns the one place WireGuard kernel state is mutated: it
//! reads the peer store, decides direct vs relay per peer, diffs the result
//! against [`wgmesh_netctl::WireGuardControl::get_peers`], and applies only
//! what changed. [`collision`] runs at the end of every cycle to keep mesh
//! IPv4 addresses unique.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod collision;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod relay;

pub use collision::{Collision, CollisionOutcome};
pub use config::{ReconcileConfig, ReconcileConfigBuilder};
pub use error::{ReconcileError, ReconcileResult};
pub use reconciler::{Reconciler, ReconcileSummary};
pub use relay::RelayDecisionInput;
