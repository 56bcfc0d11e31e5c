//! Thread-safe peer registry with rank-based endpoint merging and an event bus.
//!
//! Mirrors the reader/writer-lock-guarded `HashMap` registry pattern used
//! throughout the discovery stack: writers take the lock only for the
//! mutation itself, reads hand back deep copies, and subscriber notification
//! happens outside the lock so a slow subscriber can never stall an `update`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::types::{unix_now, DiscoveryMethod, NatType, PeerEvent, PeerEventKind, PeerInfo};

const MAX_PEERS: usize = 1000;
const STALE_AFTER_SECS: i64 = 10 * 60;
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Default, Clone, Copy)]
pub struct PeerStoreStats {
    pub total: usize,
    pub active: usize,
}

struct Inner {
    peers: HashMap<[u8; 32], PeerInfo>,
    subscribers: Vec<mpsc::Sender<PeerEvent>>,
}

/// The rank-merging, event-emitting peer registry described in section 4.B.
///
/// Cheaply [`Clone`]-able: every clone shares the same underlying registry,
/// so the discovery stack's subsystems (LAN, exchange, DHT, gossip) can each
/// hold their own handle to one store.
#[derive(Clone)]
pub struct PeerStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for PeerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerStore {
    pub fn new() -> Self {
        PeerStore {
            inner: Arc::new(RwLock::new(Inner {
                peers: HashMap::new(),
                subscribers: Vec::new(),
            })),
        }
    }

    /// Merge `incoming` into the store under `method`, applying the per-field
    /// merge rules from section 4.B. Returns `Err(CoreError::StoreFull)` when
    /// the pubkey is new and the store is already at its 1000-peer cap.
    pub fn update(&self, incoming: PeerInfo, method: DiscoveryMethod) -> CoreResult<PeerEventKind> {
        let now = unix_now();
        let (kind, event) = {
            let mut guard = self.inner.write().expect("peer store lock poisoned");

            let is_new = !guard.peers.contains_key(&incoming.pubkey);
            if is_new && guard.peers.len() >= MAX_PEERS {
                return Err(CoreError::StoreFull(incoming.pubkey_hex()));
            }

            let kind = if is_new {
                PeerEventKind::New
            } else {
                PeerEventKind::Updated
            };

            let entry = guard.peers.entry(incoming.pubkey).or_insert_with(|| {
                // Seed with the incoming record's own last_seen (not `now`) so a
                // cache restore keeps its historical timestamp until the peer is
                // re-confirmed live by a direct method.
                PeerInfo::new(incoming.pubkey, incoming.mesh_ipv4, incoming.last_seen)
            });

            merge_endpoint(entry, &incoming, method);

            if !incoming.routable_networks.is_empty() {
                entry.routable_networks = incoming.routable_networks.clone();
            }
            if incoming.mesh_ipv4 != std::net::Ipv4Addr::UNSPECIFIED {
                entry.mesh_ipv4 = incoming.mesh_ipv4;
            }
            if incoming.mesh_ipv6.is_some() {
                entry.mesh_ipv6 = incoming.mesh_ipv6;
            }
            if !incoming.hostname.is_empty() {
                entry.hostname = incoming.hostname.clone();
            }
            if incoming.nat_type != NatType::Unknown {
                entry.nat_type = incoming.nat_type;
            }
            entry.introducer = incoming.introducer;
            entry.discovered_via.insert(method);

            if method.is_direct() {
                entry.last_seen = now;
            }

            let pubkey = entry.pubkey;
            (kind, PeerEvent { pubkey, kind })
        };

        self.notify(event);
        Ok(kind)
    }

    pub fn get(&self, pubkey: &[u8; 32]) -> Option<PeerInfo> {
        self.inner
            .read()
            .expect("peer store lock poisoned")
            .peers
            .get(pubkey)
            .cloned()
    }

    pub fn get_all(&self) -> Vec<PeerInfo> {
        self.inner
            .read()
            .expect("peer store lock poisoned")
            .peers
            .values()
            .cloned()
            .collect()
    }

    pub fn get_active(&self) -> Vec<PeerInfo> {
        let now = unix_now();
        self.inner
            .read()
            .expect("peer store lock poisoned")
            .peers
            .values()
            .filter(|p| p.is_active(now))
            .cloned()
            .collect()
    }

    pub fn remove(&self, pubkey: &[u8; 32]) -> Option<PeerInfo> {
        self.inner.write().expect("peer store lock poisoned").peers.remove(pubkey)
    }

    /// Drop peers that have been silent for more than 10 minutes.
    pub fn cleanup_stale(&self) -> usize {
        let now = unix_now();
        let mut guard = self.inner.write().expect("peer store lock poisoned");
        let before = guard.peers.len();
        guard.peers.retain(|_, p| now - p.last_seen <= STALE_AFTER_SECS);
        before - guard.peers.len()
    }

    pub fn stats(&self) -> PeerStoreStats {
        let now = unix_now();
        let guard = self.inner.read().expect("peer store lock poisoned");
        PeerStoreStats {
            total: guard.peers.len(),
            active: guard.peers.values().filter(|p| p.is_active(now)).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("peer store lock poisoned").peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to peer events on a bounded, lag-dropping channel.
    pub fn subscribe(&self) -> mpsc::Receiver<PeerEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.inner.write().expect("peer store lock poisoned").subscribers.push(tx);
        rx
    }

    fn notify(&self, event: PeerEvent) {
        let subscribers = self.inner.read().expect("peer store lock poisoned").subscribers.clone();
        for sub in subscribers {
            if sub.try_send(event.clone()).is_err() {
                debug!("peer store subscriber lagging, dropping event");
            }
        }
    }
}

/// `true` when `new` would replace `existing` under the endpoint ranking in
/// section 4.B: higher rank wins, ties prefer IPv6, a LAN endpoint is sticky.
pub fn should_update_endpoint(
    existing_method: Option<DiscoveryMethod>,
    existing_is_v6: bool,
    new_method: DiscoveryMethod,
    new_is_v6: bool,
) -> bool {
    let Some(existing_method) = existing_method else {
        return true;
    };
    if existing_method == DiscoveryMethod::Lan && new_method != DiscoveryMethod::Lan {
        return false;
    }
    match new_method.rank().cmp(&existing_method.rank()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => new_is_v6 && !existing_is_v6,
    }
}

fn merge_endpoint(entry: &mut PeerInfo, incoming: &PeerInfo, method: DiscoveryMethod) {
    let Some(new_endpoint) = incoming.endpoint else {
        return;
    };
    let existing_is_v6 = entry.endpoint.map(|e| e.is_ipv6()).unwrap_or(false);
    let new_is_v6 = new_endpoint.is_ipv6();
    if should_update_endpoint(entry.endpoint_method, existing_is_v6, method, new_is_v6) {
        entry.endpoint = Some(new_endpoint);
        entry.endpoint_method = Some(method);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};

    fn peer_with_endpoint(pubkey: [u8; 32], endpoint: &str) -> PeerInfo {
        let mut p = PeerInfo::new(pubkey, Ipv4Addr::new(10, 0, 0, 1), unix_now());
        p.endpoint = Some(endpoint.parse::<SocketAddr>().unwrap());
        p
    }

    #[test]
    fn new_peer_emits_new_event() {
        let store = PeerStore::new();
        let kind = store
            .update(peer_with_endpoint([1; 32], "203.0.113.5:51820"), DiscoveryMethod::Dht)
            .unwrap();
        assert_eq!(kind, PeerEventKind::New);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn endpoint_ranking_scenario_from_spec() {
        let store = PeerStore::new();
        store
            .update(peer_with_endpoint([1; 32], "203.0.113.5:51820"), DiscoveryMethod::Dht)
            .unwrap();
        store
            .update(peer_with_endpoint([1; 32], "192.168.1.5:51820"), DiscoveryMethod::Lan)
            .unwrap();
        store
            .update(peer_with_endpoint([1; 32], "198.51.100.5:51820"), DiscoveryMethod::Dht)
            .unwrap();

        let peer = store.get(&[1; 32]).unwrap();
        assert_eq!(peer.endpoint.unwrap().to_string(), "192.168.1.5:51820");
    }

    #[test]
    fn capacity_cap_rejects_new_but_allows_updates() {
        let store = PeerStore::new();
        for i in 0..1000u32 {
            let mut pubkey = [0u8; 32];
            pubkey[0..4].copy_from_slice(&i.to_be_bytes());
            store
                .update(peer_with_endpoint(pubkey, "203.0.113.5:51820"), DiscoveryMethod::Dht)
                .unwrap();
        }
        assert_eq!(store.len(), 1000);

        let mut overflow_pubkey = [0u8; 32];
        overflow_pubkey[0..4].copy_from_slice(&1000u32.to_be_bytes());
        let err = store
            .update(peer_with_endpoint(overflow_pubkey, "203.0.113.5:51820"), DiscoveryMethod::Dht)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Capacity);
        assert_eq!(store.len(), 1000);

        let mut existing_pubkey = [0u8; 32];
        existing_pubkey[0..4].copy_from_slice(&0u32.to_be_bytes());
        store
            .update(
                peer_with_endpoint(existing_pubkey, "198.51.100.9:51820"),
                DiscoveryMethod::Lan,
            )
            .unwrap();
        assert_eq!(store.len(), 1000);
    }

    #[test]
    fn discovered_via_has_no_duplicates() {
        let store = PeerStore::new();
        store
            .update(peer_with_endpoint([5; 32], "203.0.113.5:51820"), DiscoveryMethod::Dht)
            .unwrap();
        store
            .update(peer_with_endpoint([5; 32], "203.0.113.5:51820"), DiscoveryMethod::Dht)
            .unwrap();
        store
            .update(peer_with_endpoint([5; 32], "203.0.113.5:51820"), DiscoveryMethod::Gossip)
            .unwrap();
        let peer = store.get(&[5; 32]).unwrap();
        assert_eq!(peer.discovered_via.len(), 2);
    }

    #[test]
    fn rank_is_monotone_never_demoted() {
        assert!(should_update_endpoint(
            Some(DiscoveryMethod::Lan),
            false,
            DiscoveryMethod::Dht,
            false
        ) == false);
        assert!(should_update_endpoint(
            Some(DiscoveryMethod::Dht),
            false,
            DiscoveryMethod::Lan,
            false
        ));
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let store = PeerStore::new();
        let mut rx = store.subscribe();
        store
            .update(peer_with_endpoint([9; 32], "203.0.113.5:51820"), DiscoveryMethod::Dht)
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.pubkey, [9; 32]);
        assert_eq!(event.kind, PeerEventKind::New);
    }

    #[test]
    fn cleanup_stale_removes_silent_peers() {
        let store = PeerStore::new();
        let mut peer = peer_with_endpoint([2; 32], "203.0.113.5:51820");
        peer.last_seen = unix_now() - 3600;
        store.update(peer, DiscoveryMethod::Cache).unwrap();
        assert_eq!(store.cleanup_stale(), 1);
        assert!(store.is_empty());
    }
}
