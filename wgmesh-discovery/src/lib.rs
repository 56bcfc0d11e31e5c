//! Zero-configuration peer discovery for the mesh overlay.
//!
//! A node finds its peers through four independent, overlapping channels,
//! all keyed off nothing but the shared mesh secret:
//!
//! - [`lan`]: LAN-local multicast announce/listen.
//! - [`stun`]: RFC 5389 reflexive-address discovery and NAT classification.
//! - [`exchange`]: direct UDP peer exchange (HELLO/REPLY), hole punching, and
//!   introducer-mediated rendezvous for peers behind symmetric NATs.
//! - [`dht`]: BEP-5 Mainline DHT rendezvous under an hourly-rotating
//!   info_hash, plus a reactor that promotes transitively-known peers to
//!   direct contact attempts.
//! - [`gossip`]: once a tunnel exists, peers exchange knowledge of other
//!   peers over the mesh itself.
//!
//! [`service::DiscoveryService`] wires all four into one handle. Every
//! subsystem feeds the same [`wgmesh_core::PeerStore`], which applies the
//! rank-based endpoint merge rules from section 4.B of the peer model.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod config;
pub mod dht;
pub mod error;
pub mod exchange;
pub mod gossip;
pub mod lan;
pub mod messages;
pub mod rate_limit;
pub mod service;
pub mod stun;

pub use config::{DiscoveryConfig, DiscoveryConfigBuilder};
pub use dht::{DhtCommand, DhtHandle};
pub use error::{DiscoveryError, DiscoveryResult};
pub use exchange::{ExchangeCommand, ExchangeHandle};
pub use gossip::{AnnounceSender, GossipCommand, GossipHandle};
pub use lan::LAN_MULTICAST_PORT;
pub use messages::{
    message_type, pair_id, AnnouncePayload, GoodbyePayload, HelloPayload, KnownPeerEntry,
    NodeDescription, RendezvousOfferPayload, RendezvousStartPayload, ReplyPayload,
};
pub use rate_limit::{RateLimitResult, SourceRateLimitConfig, SourceRateLimiter, SourceRateStats};
pub use service::{DiscoveryService, DiscoveryServiceConfig};
