//! Secret-derived cryptographic substrate for wgmesh.
//!
//! Every node that shares the same opaque secret string computes byte-identical
//! key material here; nothing in this crate talks to the network or the
//! filesystem. See `keys` for the deterministic key schedule, `envelope` for
//! the AES-256-GCM wire format shared by LAN/exchange/gossip traffic, and
//! `membership` for the HMAC tokens that stand in for authentication.

pub mod envelope;
pub mod error;
pub mod keys;
pub mod membership;
pub mod validate;

pub use envelope::{open_envelope_raw, seal_envelope, OpenedEnvelope};
pub use error::{CryptoError, CryptoResult, ErrorKind};
pub use keys::{
    active_network_ids, derive_keys, derive_mesh_ipv4, derive_mesh_ipv4_with_nonce, derive_mesh_ipv6,
    rotating_network_id, DerivedKeys,
};
pub use membership::{
    generate_membership_token, generate_rotation_announcement, validate_membership_token,
    validate_rotation_announcement, verify_new_secret, RotationAnnouncement,
};
