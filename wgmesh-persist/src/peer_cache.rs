//! Peer cache persistence: `<iface>-peers.json` (section 4.N).
//!
//! Restored peers are re-added via [`wgmesh_core::DiscoveryMethod::Cache`],
//! the lowest-ranked discovery method, so a peer the daemon has not heard
//! from since restart never outranks a live discovery source and is not
//! treated as active until reconfirmed.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use wgmesh_core::{DiscoveryMethod, NatType, PeerInfo};

use crate::error::{PersistError, PersistResult};
use crate::io_util::write_atomic;

const MAX_CACHE_AGE_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PeerCacheEntry {
    pubkey_b64: String,
    mesh_ipv4: Ipv4Addr,
    mesh_ipv6: Option<Ipv6Addr>,
    hostname: String,
    endpoint: Option<SocketAddr>,
    endpoint_method: Option<DiscoveryMethod>,
    nat_type: NatType,
    routable_networks: Vec<String>,
    discovered_via: BTreeSet<DiscoveryMethod>,
    introducer: bool,
    last_seen: i64,
}

fn to_entry(peer: &PeerInfo) -> PeerCacheEntry {
    PeerCacheEntry {
        pubkey_b64: base64::engine::general_purpose::STANDARD.encode(peer.pubkey),
        mesh_ipv4: peer.mesh_ipv4,
        mesh_ipv6: peer.mesh_ipv6,
        hostname: peer.hostname.clone(),
        endpoint: peer.endpoint,
        endpoint_method: peer.endpoint_method,
        nat_type: peer.nat_type,
        routable_networks: peer.routable_networks.clone(),
        discovered_via: peer.discovered_via.clone(),
        introducer: peer.introducer,
        last_seen: peer.last_seen,
    }
}

fn from_entry(entry: PeerCacheEntry) -> PersistResult<PeerInfo> {
    let pubkey_bytes = base64::engine::general_purpose::STANDARD
        .decode(&entry.pubkey_b64)
        .map_err(|e| PersistError::io("<peer cache pubkey>", std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    let pubkey: [u8; 32] = pubkey_bytes
        .try_into()
        .map_err(|_| PersistError::io("<peer cache pubkey>", std::io::Error::new(std::io::ErrorKind::InvalidData, "pubkey is not 32 bytes")))?;

    Ok(PeerInfo {
        pubkey,
        mesh_ipv4: entry.mesh_ipv4,
        mesh_ipv6: entry.mesh_ipv6,
        hostname: entry.hostname,
        endpoint: entry.endpoint,
        endpoint_method: entry.endpoint_method,
        nat_type: entry.nat_type,
        routable_networks: entry.routable_networks,
        discovered_via: entry.discovered_via,
        introducer: entry.introducer,
        last_seen: entry.last_seen,
    })
}

/// Writes every peer's current state to `path` as a JSON array.
pub fn save_peer_cache(path: &Path, peers: &[PeerInfo]) -> PersistResult<()> {
    let entries: Vec<PeerCacheEntry> = peers.iter().map(to_entry).collect();
    let bytes = serde_json::to_vec(&entries)?;
    write_atomic(path, &bytes)
}

/// Loads the peer cache, discarding entries older than 24 hours. Returns an
/// empty list if the file does not exist yet.
pub fn load_peer_cache(path: &Path, now: i64) -> PersistResult<Vec<PeerInfo>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path).map_err(|e| PersistError::io(path.display().to_string(), e))?;
    let entries: Vec<PeerCacheEntry> = serde_json::from_slice(&bytes)?;
    entries
        .into_iter()
        .filter(|e| now - e.last_seen <= MAX_CACHE_AGE_SECS)
        .map(from_entry)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("wgmesh-persist-peers-{name}-{suffix}"))
    }

    fn sample_peer(pubkey: u8, last_seen: i64) -> PeerInfo {
        let mut peer = PeerInfo::new([pubkey; 32], Ipv4Addr::new(10, 88, 0, pubkey), last_seen);
        peer.discovered_via.insert(DiscoveryMethod::Gossip);
        peer
    }

    #[test]
    fn roundtrips_active_entries() {
        let path = scratch_path("roundtrip");
        let peers = vec![sample_peer(1, 1_000), sample_peer(2, 1_000)];
        save_peer_cache(&path, &peers).unwrap();
        let loaded = load_peer_cache(&path, 1_100).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|p| p.pubkey == [1; 32]));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn drops_entries_older_than_24_hours() {
        let path = scratch_path("stale");
        let now = 100_000;
        let peers = vec![sample_peer(1, now - 25 * 3600), sample_peer(2, now - 3600)];
        save_peer_cache(&path, &peers).unwrap();
        let loaded = load_peer_cache(&path, now).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].pubkey, [2; 32]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_returns_empty() {
        let path = scratch_path("missing");
        assert!(load_peer_cache(&path, 0).unwrap().is_empty());
    }
}
