//! The shared data model: local identity, peer records, and the events/config
//! shapes that flow between discovery, the reconciler, and health monitoring.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// How a peer's current endpoint/record was most recently learned.
///
/// Ordering here is purely nominal; use [`DiscoveryMethod::rank`] for the
/// merge-priority comparisons the peer store performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiscoveryMethod {
    Lan,
    DhtRendezvous,
    Dht,
    Gossip,
    DhtTransitive,
    GossipTransitive,
    Other,
    Cache,
}

impl DiscoveryMethod {
    /// Endpoint-replacement priority: higher wins on [`PeerStore::update`].
    pub fn rank(self) -> u8 {
        match self {
            DiscoveryMethod::Lan => 100,
            DiscoveryMethod::DhtRendezvous => 90,
            DiscoveryMethod::Dht => 70,
            DiscoveryMethod::Gossip => 65,
            DiscoveryMethod::DhtTransitive => 40,
            DiscoveryMethod::GossipTransitive => 35,
            DiscoveryMethod::Other => 30,
            DiscoveryMethod::Cache => 20,
        }
    }

    /// `true` for methods that represent a direct observation of the peer,
    /// as opposed to a secondhand report (transitive) or a cold restore (cache).
    pub fn is_direct(self) -> bool {
        matches!(
            self,
            DiscoveryMethod::Lan | DiscoveryMethod::DhtRendezvous | DiscoveryMethod::Dht | DiscoveryMethod::Gossip
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NatType {
    Cone,
    Symmetric,
    Unknown,
}

impl NatType {
    pub fn as_str(self) -> &'static str {
        match self {
            NatType::Cone => "cone",
            NatType::Symmetric => "symmetric",
            NatType::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for NatType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cone" => Ok(NatType::Cone),
            "symmetric" => Ok(NatType::Symmetric),
            _ => Ok(NatType::Unknown),
        }
    }
}

impl Default for NatType {
    fn default() -> Self {
        NatType::Unknown
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_secs() as i64
}

/// This process's own identity: stable across restarts once persisted.
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub pubkey: [u8; 32],
    pub privkey: [u8; 32],
    pub mesh_ipv4: Ipv4Addr,
    pub mesh_ipv6: Ipv6Addr,
    pub endpoint: Option<SocketAddr>,
    pub nat_type: NatType,
    pub routable_networks: Vec<String>,
    pub introducer: bool,
    pub hostname: String,
}

/// One known remote peer, keyed externally by `pubkey`.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub pubkey: [u8; 32],
    pub mesh_ipv4: Ipv4Addr,
    pub mesh_ipv6: Option<Ipv6Addr>,
    pub hostname: String,

    pub endpoint: Option<SocketAddr>,
    pub endpoint_method: Option<DiscoveryMethod>,
    pub nat_type: NatType,
    pub routable_networks: Vec<String>,

    pub discovered_via: BTreeSet<DiscoveryMethod>,
    pub introducer: bool,
    pub last_seen: i64,
}

impl PeerInfo {
    pub fn new(pubkey: [u8; 32], mesh_ipv4: Ipv4Addr, now: i64) -> Self {
        PeerInfo {
            pubkey,
            mesh_ipv4,
            mesh_ipv6: None,
            hostname: String::new(),
            endpoint: None,
            endpoint_method: None,
            nat_type: NatType::Unknown,
            routable_networks: Vec::new(),
            discovered_via: BTreeSet::new(),
            introducer: false,
            last_seen: now,
        }
    }

    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.pubkey)
    }

    pub fn is_active(&self, now: i64) -> bool {
        now - self.last_seen < 5 * 60
    }

    pub fn is_dead_eligible(&self, now: i64) -> bool {
        now - self.last_seen > 10 * 60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEventKind {
    New,
    Updated,
}

#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub pubkey: [u8; 32],
    pub kind: PeerEventKind,
}

/// Per-pubkey desired WireGuard configuration, produced once per reconcile tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPeerConfig {
    pub pubkey: [u8; 32],
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: BTreeSet<String>,
}

impl DesiredPeerConfig {
    /// The comparison key the reconciler caches to elide redundant writes:
    /// `"endpoint|sorted-allowed-ips"`.
    pub fn signature(&self) -> String {
        let endpoint = self
            .endpoint
            .map(|e| e.to_string())
            .unwrap_or_default();
        let allowed: Vec<&str> = self.allowed_ips.iter().map(String::as_str).collect();
        format!("{endpoint}|{}", allowed.join(","))
    }
}

/// pubkey -> relay pubkey, rebuilt every reconcile tick.
pub type RelayRoutes = std::collections::HashMap<[u8; 32], [u8; 32]>;

pub fn ip_is_global_unicast_v6(addr: &Ipv6Addr) -> bool {
    !addr.is_loopback() && !addr.is_unspecified() && (addr.segments()[0] & 0xe000) == 0x2000
}

pub fn ip_is_private_or_loopback(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_ordering_matches_spec_table() {
        assert!(DiscoveryMethod::Lan.rank() > DiscoveryMethod::DhtRendezvous.rank());
        assert!(DiscoveryMethod::DhtRendezvous.rank() > DiscoveryMethod::Dht.rank());
        assert!(DiscoveryMethod::Dht.rank() > DiscoveryMethod::Gossip.rank());
        assert!(DiscoveryMethod::Gossip.rank() > DiscoveryMethod::DhtTransitive.rank());
        assert!(DiscoveryMethod::DhtTransitive.rank() > DiscoveryMethod::GossipTransitive.rank());
        assert!(DiscoveryMethod::GossipTransitive.rank() > DiscoveryMethod::Other.rank());
        assert!(DiscoveryMethod::Other.rank() > DiscoveryMethod::Cache.rank());
    }

    #[test]
    fn desired_config_signature_is_order_independent_on_allowed_ips() {
        let mut a = DesiredPeerConfig {
            pubkey: [0u8; 32],
            endpoint: None,
            allowed_ips: BTreeSet::new(),
        };
        a.allowed_ips.insert("10.0.0.2/32".into());
        a.allowed_ips.insert("10.0.0.1/32".into());
        assert_eq!(a.signature(), "|10.0.0.1/32,10.0.0.2/32");
    }
}
