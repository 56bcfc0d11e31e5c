//! On-disk state for the mesh daemon: node identity, the peer cache, and a
//! DHT bootstrap node hint list (section 4.N).
//!
//! Nothing here talks to the network; callers hand in the in-memory state
//! ([`wgmesh_core::LocalNode`], [`wgmesh_core::PeerStore`], a routing-table
//! snapshot closure) and get back file paths and load/save functions.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod dht_cache;
pub mod error;
pub mod identity;
mod io_util;
pub mod paths;
pub mod peer_cache;
pub mod scheduler;

pub use dht_cache::{load_dht_nodes, save_dht_nodes};
pub use error::{PersistError, PersistResult};
pub use identity::{load_identity, save_identity};
pub use paths::{PersistPaths, DEFAULT_BASE_DIR};
pub use peer_cache::{load_peer_cache, save_peer_cache};
pub use scheduler::{spawn as spawn_scheduler, PersistHandle};
