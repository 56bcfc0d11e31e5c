//! Error types for the discovery stack (LAN, STUN, peer exchange, DHT, gossip).

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur anywhere in the discovery stack.
#[derive(Debug, Display, Error)]
pub enum DiscoveryError {
    /// envelope rejected: {0}
    Envelope(#[from] wgmesh_crypto::CryptoError),

    /// peer store rejected update: {0}
    Store(#[from] wgmesh_core::CoreError),

    /// socket I/O error: {0}
    Io(String),

    /// STUN request timed out
    StunTimeout,

    /// STUN reply had a malformed or missing mapped address
    StunMalformedReply,

    /// both STUN queries failed
    StunBothFailed,

    /// no REPLY received for HELLO to {0} within the exchange window
    ExchangeTimeout(String),

    /// rendezvous pair id {0:x} is unknown to this introducer
    UnknownPairId(u64),

    /// DHT bootstrap failed: {0}
    DhtBootstrap(String),

    /// rate limit exceeded for source {0}
    RateLimited(String),

    /// channel closed unexpectedly
    ChannelClosed,
}

impl From<std::io::Error> for DiscoveryError {
    fn from(e: std::io::Error) -> Self {
        DiscoveryError::Io(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadMessage,
    Transient,
    Capacity,
    NotFound,
}

impl DiscoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DiscoveryError::Envelope(e) => match e.kind() {
                wgmesh_crypto::ErrorKind::BadMessage => ErrorKind::BadMessage,
                wgmesh_crypto::ErrorKind::Capacity => ErrorKind::Capacity,
                _ => ErrorKind::Transient,
            },
            DiscoveryError::Store(e) => match e.kind() {
                wgmesh_core::error::ErrorKind::Capacity => ErrorKind::Capacity,
                wgmesh_core::error::ErrorKind::NotFound => ErrorKind::NotFound,
            },
            DiscoveryError::RateLimited(_) => ErrorKind::Capacity,
            DiscoveryError::UnknownPairId(_) => ErrorKind::NotFound,
            _ => ErrorKind::Transient,
        }
    }
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
