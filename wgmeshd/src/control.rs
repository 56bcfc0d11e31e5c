//! In-process control-plane API (section 6): peer listing, peer counts and
//! daemon status for an embedding orchestrator. The specification leaves
//! the transport unspecified and explicitly allows degrading gracefully
//! when nothing external is wired up, so this stays a plain struct with no
//! RPC server of its own; a caller that wants one wraps it.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use wgmesh_core::{LocalNode, PeerInfo, PeerStore};

/// Counts mirroring [`wgmesh_core::store::PeerStoreStats`] plus the derived
/// "dead" bucket (known but not recently active).
#[derive(Debug, Clone, Copy)]
pub struct PeerCounts {
    pub active: usize,
    pub total: usize,
    pub dead: usize,
}

/// Snapshot of this node's own identity and uptime.
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub mesh_ipv4: Ipv4Addr,
    pub mesh_ipv6: Ipv6Addr,
    pub pubkey_hex: String,
    pub interface: String,
    pub uptime: std::time::Duration,
}

/// Read-only view over the running daemon's peer store and identity, handed
/// to whatever embeds `wgmeshd` as a library.
#[derive(Clone)]
pub struct ControlPlane {
    store: PeerStore,
    local: Arc<RwLock<LocalNode>>,
    iface: String,
    started_at: Instant,
}

impl ControlPlane {
    pub fn new(store: PeerStore, local: Arc<RwLock<LocalNode>>, iface: String) -> Self {
        ControlPlane {
            store,
            local,
            iface,
            started_at: Instant::now(),
        }
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.store.get_all()
    }

    pub fn peer(&self, pubkey: &[u8; 32]) -> Option<PeerInfo> {
        self.store.get(pubkey)
    }

    pub fn peer_counts(&self) -> PeerCounts {
        let stats = self.store.stats();
        PeerCounts {
            active: stats.active,
            total: stats.total,
            dead: stats.total.saturating_sub(stats.active),
        }
    }

    pub async fn status(&self) -> DaemonStatus {
        let local = self.local.read().await;
        DaemonStatus {
            mesh_ipv4: local.mesh_ipv4,
            mesh_ipv6: local.mesh_ipv6,
            pubkey_hex: hex::encode(local.pubkey),
            interface: self.iface.clone(),
            uptime: self.started_at.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_core::{DiscoveryMethod, NatType};

    fn local_node() -> LocalNode {
        LocalNode {
            pubkey: [3u8; 32],
            privkey: [4u8; 32],
            mesh_ipv4: "10.0.0.5".parse().unwrap(),
            mesh_ipv6: "fd00::5".parse().unwrap(),
            endpoint: None,
            nat_type: NatType::Unknown,
            routable_networks: Vec::new(),
            introducer: false,
            hostname: "test".into(),
        }
    }

    #[tokio::test]
    async fn status_reports_identity_and_interface() {
        let store = PeerStore::new();
        let control = ControlPlane::new(store, Arc::new(RwLock::new(local_node())), "wgmesh0".into());
        let status = control.status().await;
        assert_eq!(status.interface, "wgmesh0");
        assert_eq!(status.pubkey_hex, hex::encode([3u8; 32]));
    }

    #[test]
    fn peer_counts_derives_dead_from_total_minus_active() {
        let store = PeerStore::new();
        let now = wgmesh_core::unix_now();
        let mut peer = PeerInfo::new([5u8; 32], "10.0.0.6".parse().unwrap(), now);
        peer.last_seen = now - 10_000;
        store.update(peer, DiscoveryMethod::Cache).unwrap();

        let control = ControlPlane::new(store, Arc::new(RwLock::new(local_node())), "wgmesh0".into());
        let counts = control.peer_counts();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.active, 0);
        assert_eq!(counts.dead, 1);
    }
}
