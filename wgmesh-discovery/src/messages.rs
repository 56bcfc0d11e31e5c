//! Wire payloads for the peer-exchange, LAN and gossip protocols (sections
//! 4.E, 4.G, 4.I). Every payload here is sealed inside a
//! [`wgmesh_crypto::envelope`] before it touches a socket; this module only
//! describes what lives inside the envelope.

use std::net::SocketAddr;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Envelope `message_type` strings, shared by both peer exchange and LAN
/// discovery so a single dispatcher can route on them.
pub mod message_type {
    pub const HELLO: &str = "HELLO";
    pub const REPLY: &str = "REPLY";
    pub const ANNOUNCE: &str = "ANNOUNCE";
    pub const RENDEZVOUS_OFFER: &str = "RENDEZVOUS_OFFER";
    pub const RENDEZVOUS_START: &str = "RENDEZVOUS_START";
    pub const GOODBYE: &str = "GOODBYE";
    /// Opaque Dandelion++ stem hop (section 4.L). The exchange server never
    /// parses this payload itself; it only forwards it to a registered sink.
    pub const DANDELION_STEM: &str = "DANDELION_STEM";
}

/// Compact description of a peer, carried inside HELLO/REPLY/ANNOUNCE
/// `known_peers` lists. Deliberately smaller than [`wgmesh_core::PeerInfo`]:
/// only what a recipient needs to attempt its own exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownPeerEntry {
    pub pubkey_hex: String,
    pub endpoint: Option<SocketAddr>,
    pub mesh_ipv4: std::net::Ipv4Addr,
    pub mesh_ipv6: Option<std::net::Ipv6Addr>,
}

/// Fields common to HELLO, REPLY and ANNOUNCE: a node's self-description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub pubkey_hex: String,
    pub mesh_ipv4: std::net::Ipv4Addr,
    pub mesh_ipv6: std::net::Ipv6Addr,
    pub gossip_port: u16,
    pub introducer: bool,
    pub routable_networks: Vec<String>,
    pub hostname: String,
    pub nat_type: String,
}

/// `HELLO`: opens a direct exchange. Carries the full known-peers list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloPayload {
    #[serde(flatten)]
    pub node: NodeDescription,
    pub known_peers: Vec<KnownPeerEntry>,
}

/// `REPLY`: answers a HELLO. `observed_endpoint` lets the sender act as a
/// STUN reflector for the HELLO's originator (section 4.G step 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    #[serde(flatten)]
    pub node: NodeDescription,
    pub known_peers: Vec<KnownPeerEntry>,
    pub observed_endpoint: SocketAddr,
}

/// `ANNOUNCE`: used by both LAN discovery (section 4.E, `known_peers` always
/// empty to keep the datagram small) and in-mesh gossip (section 4.I, full
/// `known_peers`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncePayload {
    #[serde(flatten)]
    pub node: NodeDescription,
    pub known_peers: Vec<KnownPeerEntry>,
}

/// `RENDEZVOUS_OFFER`: sent by the initiator to up to three introducers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendezvousOfferPayload {
    pub pair_id: u64,
    pub initiator_pubkey_hex: String,
    pub target_pubkey_hex: String,
    pub candidates: Vec<SocketAddr>,
}

/// `RENDEZVOUS_START`: sent by an introducer to both sides once it has
/// matched a pair of offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendezvousStartPayload {
    pub pair_id: u64,
    pub start_at_unix_ms: u64,
    pub candidates: Vec<SocketAddr>,
}

/// `GOODBYE`: signed departure notice. Signature lives in the envelope
/// (AES-GCM already authenticates it); `timestamp` bounds replay per the
/// ±60s acceptance window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodbyePayload {
    pub pubkey_hex: String,
    pub timestamp: i64,
}

/// Order-independent pair identifier for introducer rendezvous: `PairID =
/// FNV-1a(sorted(a, b))`. Order independence means both ends of a pair
/// compute the same ID without coordinating who is "first".
pub fn pair_id(a: &[u8; 32], b: &[u8; 32]) -> u64 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = FnvHasher::default();
    hasher.write(lo);
    hasher.write(hi);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_id_is_order_independent() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert_eq!(pair_id(&a, &b), pair_id(&b, &a));
    }

    #[test]
    fn pair_id_differs_for_different_pairs() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        assert_ne!(pair_id(&a, &b), pair_id(&a, &c));
    }

    #[test]
    fn hello_payload_round_trips_through_json() {
        let hello = HelloPayload {
            node: NodeDescription {
                pubkey_hex: "ab".repeat(32),
                mesh_ipv4: "10.1.2.3".parse().unwrap(),
                mesh_ipv6: "fd00::1".parse().unwrap(),
                gossip_port: 51821,
                introducer: false,
                routable_networks: vec![],
                hostname: "node-a".into(),
                nat_type: "cone".into(),
            },
            known_peers: vec![KnownPeerEntry {
                pubkey_hex: "cd".repeat(32),
                endpoint: Some("203.0.113.1:51821".parse().unwrap()),
                mesh_ipv4: "10.1.2.4".parse().unwrap(),
                mesh_ipv6: None,
            }],
        };
        let json = serde_json::to_string(&hello).unwrap();
        let back: HelloPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(hello, back);
    }
}
