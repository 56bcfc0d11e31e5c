//! Dual-signal peer liveness monitoring and eviction for the mesh overlay.
//!
//! Two independent signals can evict a peer: a stale WireGuard
//! handshake/transfer reading, or repeated failure of a TCP probe sent
//! through the tunnel itself. Either signal reaching its threshold removes
//! the peer from the kernel interface and the shared registry, and starts a
//! cooldown during which the reconciler will not re-add it.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod config;
pub mod error;
pub mod monitor;
pub mod offline;
pub mod probe;
pub mod state;

pub use config::HealthConfig;
pub use error::{HealthError, HealthResult};
pub use monitor::{HealthEvent, HealthMonitor};
pub use offline::OfflineRegistry;
pub use probe::{ProbeDialer, TcpPingProbe};
pub use state::{HealthAction, PeerHealthState};
