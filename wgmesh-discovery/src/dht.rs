//! BEP-5 Mainline DHT discovery and the transitive-connect reactor (section 4.H).
//!
//! Bound to `GossipPort + 1`, entirely separate from the peer-exchange
//! socket in [`crate::exchange`]. The DHT never carries application
//! payloads: it only returns `SocketAddr`s worth trying, which are then
//! handed to [`ExchangeHandle::exchange_with_peer`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fnv::FnvHasher;
use futures::StreamExt;
use mainline::{Dht, Id};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use wgmesh_core::{unix_now, LocalNode, PeerStore};
use wgmesh_crypto::active_network_ids;

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::exchange::ExchangeHandle;
use crate::stun;

pub enum DhtCommand {
    Shutdown,
}

#[derive(Clone)]
pub struct DhtHandle {
    command_tx: mpsc::Sender<DhtCommand>,
}

impl DhtHandle {
    pub async fn shutdown(&self) -> DiscoveryResult<()> {
        self.command_tx
            .send(DhtCommand::Shutdown)
            .await
            .map_err(|_| DiscoveryError::ChannelClosed)
    }
}

struct Shared {
    dht: Dht,
    secret: String,
    own_pubkey: [u8; 32],
    local: Arc<RwLock<LocalNode>>,
    store: PeerStore,
    config: DiscoveryConfig,
    exchange: ExchangeHandle,
    stun_socket: tokio::net::UdpSocket,
    stun_servers: (SocketAddr, SocketAddr),
    contacted: Mutex<HashMap<SocketAddr, Instant>>,
    backoff: Mutex<HashMap<u64, (Duration, Instant)>>,
}

/// Builds the DHT node and spawns its announce/query/STUN-refresh/transitive
/// reactor loops as a single background task.
pub fn spawn(
    secret: String,
    own_pubkey: [u8; 32],
    local: Arc<RwLock<LocalNode>>,
    store: PeerStore,
    config: DiscoveryConfig,
    exchange: ExchangeHandle,
    stun_socket: tokio::net::UdpSocket,
    stun_servers: (SocketAddr, SocketAddr),
) -> DiscoveryResult<DhtHandle> {
    let mut builder = Dht::builder().server().port(config.dht_port());
    if !config.dht_bootstrap_routers.is_empty() {
        builder = builder.bootstrap(&config.dht_bootstrap_routers);
    }
    let dht = builder
        .build()
        .map_err(|e| DiscoveryError::DhtBootstrap(e.to_string()))?;

    let shared = Arc::new(Shared {
        dht,
        secret,
        own_pubkey,
        local,
        store,
        config,
        exchange,
        stun_socket,
        stun_servers,
        contacted: Mutex::new(HashMap::new()),
        backoff: Mutex::new(HashMap::new()),
    });

    let (command_tx, command_rx) = mpsc::channel(8);
    tokio::spawn(run(shared, command_rx));
    Ok(DhtHandle { command_tx })
}

fn info_hash(bytes: [u8; 20]) -> DiscoveryResult<Id> {
    Id::from_bytes(bytes).map_err(|e| DiscoveryError::DhtBootstrap(e.to_string()))
}

async fn run(shared: Arc<Shared>, mut commands: mpsc::Receiver<DhtCommand>) {
    let async_dht = shared.dht.clone().as_async();

    let mut announce_ticker = tokio::time::interval(shared.config.dht_announce_interval());
    let mut stun_ticker = tokio::time::interval(shared.config.stun_refresh_interval());
    let mut reactor_ticker = tokio::time::interval(shared.config.transitive_reactor_poll_interval());
    let mut query_deadline = tokio::time::Instant::now();

    let mut events = shared.store.subscribe();

    loop {
        let known = shared.store.get_active().len();
        let query_interval = shared.config.dht_query_interval(known);
        if tokio::time::Instant::now() >= query_deadline {
            query_deadline = tokio::time::Instant::now() + query_interval;
        }

        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(DhtCommand::Shutdown) | None => return,
                }
            }
            _ = announce_ticker.tick() => {
                announce(&shared, &async_dht).await;
            }
            _ = tokio::time::sleep_until(query_deadline) => {
                query(&shared, &async_dht).await;
                query_deadline = tokio::time::Instant::now() + query_interval;
            }
            _ = stun_ticker.tick() => {
                refresh_stun(&shared).await;
            }
            _ = reactor_ticker.tick() => {
                reactor_sweep(&shared).await;
            }
            Some(event) = events.recv() => {
                reactor_on_event(&shared, event).await;
            }
        }
    }
}

async fn announce(shared: &Shared, async_dht: &mainline::async_dht::AsyncDht) {
    let port = shared.local.read().await.endpoint.map(|e| e.port());
    for network_id in active_network_ids(&shared.secret, unix_now()) {
        let Ok(id) = info_hash(network_id) else { continue };
        match async_dht.announce_peer(id, port).await {
            Ok(_) => debug!(network_id = %hex::encode(network_id), "DHT announce ok"),
            Err(e) => warn!(error = %e, "DHT announce failed"),
        }
    }
}

async fn query(shared: &Shared, async_dht: &mainline::async_dht::AsyncDht) {
    for network_id in active_network_ids(&shared.secret, unix_now()) {
        let Ok(id) = info_hash(network_id) else { continue };
        let Ok(mut stream) = async_dht.get_peers(id) else { continue };
        while let Some(peers) = stream.next().await {
            for addr in peers {
                consider_contact(shared, addr).await;
            }
        }
    }
}

async fn consider_contact(shared: &Shared, addr: SocketAddr) {
    if let Some(own) = shared.local.read().await.endpoint {
        if own == addr {
            return;
        }
    }
    {
        let mut contacted = shared.contacted.lock().expect("contacted lock poisoned");
        if let Some(last) = contacted.get(&addr) {
            if last.elapsed() < shared.config.dht_contact_recency_window {
                return;
            }
        }
        contacted.insert(addr, Instant::now());
    }

    let exchange = shared.exchange.clone();
    tokio::spawn(async move {
        match exchange.exchange_with_peer(addr).await {
            Ok(reply) => {
                debug!(peer = %reply.node.pubkey_hex, %addr, "DHT-discovered peer replied");
            }
            Err(e) => {
                debug!(%addr, error = %e, "DHT-discovered peer did not reply");
            }
        }
    });
}

/// Re-runs STUN (section 4.F) and, when global IPv6 connectivity exists,
/// prefers it over STUN's reflexive address (section 4.H step: "IPv6-first").
async fn refresh_stun(shared: &Shared) {
    let already_has_global_v6 = {
        let local = shared.local.read().await;
        match local.endpoint {
            Some(SocketAddr::V6(v6)) => wgmesh_core::ip_is_global_unicast_v6(v6.ip()),
            _ => false,
        }
    };
    if already_has_global_v6 {
        return;
    }

    match stun::detect_nat_type(
        &shared.stun_socket,
        shared.stun_servers.0,
        shared.stun_servers.1,
        shared.config.stun_timeout,
    )
    .await
    {
        Ok((nat_type, Some(reflexive))) => {
            let mut local = shared.local.write().await;
            local.nat_type = nat_type;
            local.endpoint = Some(reflexive);
            info!(?nat_type, endpoint = %reflexive, "STUN refresh updated local endpoint");
        }
        Ok((nat_type, None)) => {
            let mut local = shared.local.write().await;
            local.nat_type = nat_type;
        }
        Err(e) => warn!(error = %e, "STUN refresh failed"),
    }
}

/// `pairFnvModPeriod` for the transitive timing window: `FNV(pair_id) mod
/// slot_period`, matching the formula in [`DiscoveryConfig::in_transitive_reactor_slot`].
fn pair_fnv_mod_period(pid: u64, period: i64) -> i64 {
    let mut hasher = FnvHasher::default();
    std::hash::Hasher::write_u64(&mut hasher, pid);
    (std::hash::Hasher::finish(&hasher) % period.max(1) as u64) as i64
}

async fn reactor_on_event(shared: &Shared, event: wgmesh_core::PeerEvent) {
    let Some(peer) = shared.store.get(&event.pubkey) else { return };
    if peer.discovered_via.is_empty()
        || peer
            .discovered_via
            .iter()
            .any(|m| m.is_direct())
    {
        return;
    }
    try_transitive_connect(shared, &peer.pubkey, peer.endpoint).await;
}

async fn reactor_sweep(shared: &Shared) {
    let now = unix_now();
    for peer in shared.store.get_all() {
        if peer.discovered_via.iter().any(|m| m.is_direct()) {
            continue;
        }
        let Some(endpoint) = peer.endpoint else { continue };

        let pid = crate::messages::pair_id(&shared.own_pubkey, &peer.pubkey);
        let slot = pair_fnv_mod_period(pid, shared.config.transitive_reactor_slot_period_secs);
        if !shared.config.in_transitive_reactor_slot(now, slot) {
            continue;
        }

        {
            let mut backoff = shared.backoff.lock().expect("backoff lock poisoned");
            if let Some((_, next_allowed)) = backoff.get(&pid) {
                if Instant::now() < *next_allowed {
                    continue;
                }
            }
        }

        try_transitive_connect(shared, &peer.pubkey, Some(endpoint)).await;
    }
}

async fn try_transitive_connect(shared: &Shared, peer_pubkey: &[u8; 32], endpoint: Option<SocketAddr>) {
    let Some(endpoint) = endpoint else { return };
    let pid = crate::messages::pair_id(&shared.own_pubkey, peer_pubkey);

    match shared.exchange.exchange_with_peer(endpoint).await {
        Ok(_) => {
            shared.backoff.lock().expect("backoff lock poisoned").remove(&pid);
        }
        Err(_) => {
            let mut backoff = shared.backoff.lock().expect("backoff lock poisoned");
            let (current, _) = backoff
                .get(&pid)
                .cloned()
                .unwrap_or((shared.config.transitive_reactor_backoff_initial, Instant::now()));
            let next = (current * 2).min(shared.config.transitive_reactor_backoff_max);
            backoff.insert(pid, (next, Instant::now() + current));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_fnv_mod_period_is_within_range() {
        for pid in [0u64, 1, 42, u64::MAX] {
            let slot = pair_fnv_mod_period(pid, 20);
            assert!((0..20).contains(&slot));
        }
    }

    #[test]
    fn pair_fnv_mod_period_is_deterministic() {
        assert_eq!(pair_fnv_mod_period(12345, 20), pair_fnv_mod_period(12345, 20));
    }
}
