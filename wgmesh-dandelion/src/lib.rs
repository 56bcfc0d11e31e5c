//! Optional Dandelion++ privacy relay for mesh peer announcements.
//!
//! An announcement stems through up to [`config::DandelionConfig::hop_cap`]
//! relays before fluffing to the normal broadcast path, so an observer of
//! any single relay cannot reliably attribute an announcement to its
//! origin. The relay set rotates every epoch from a value derived from the
//! mesh's shared secret, so cooperating nodes agree on relays without
//! exchanging anything.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod config;
pub mod epoch;
pub mod error;
pub mod message;
pub mod router;

pub use config::{DandelionConfig, DandelionConfigBuilder};
pub use epoch::{epoch_id_for, select_relays, Epoch};
pub use error::{DandelionError, DandelionResult};
pub use message::DandelionEnvelope;
pub use router::{should_fluff, spawn, DandelionCommand, DandelionHandle, DandelionTransport};
