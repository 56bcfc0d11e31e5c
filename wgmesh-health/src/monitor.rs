//! Orchestrates both health signals as independent tasks against one shared
//! per-peer state table (section 4.K).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use tokio::sync::mpsc;
use tracing::{info, warn};

use wgmesh_core::{unix_now, PeerStore, RelayRoutes};
use wgmesh_netctl::WireGuardControl;

use crate::config::HealthConfig;
use crate::error::HealthResult;
use crate::offline::OfflineRegistry;
use crate::probe::ProbeDialer;
use crate::state::{decide_handshake_signal, decide_probe_signal, handshake_is_stale, probe_is_due, HealthAction, PeerHealthState};

/// Emitted whenever a signal changes a peer's health state, so the daemon
/// orchestrator can react (clear the reconciler's signature cache, trigger
/// an immediate reconcile, tear down a probe session).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    ForceReconnect([u8; 32]),
    Evicted([u8; 32]),
}

fn b64(pubkey: &[u8; 32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pubkey)
}

pub struct HealthMonitor {
    wg: Arc<dyn WireGuardControl>,
    store: PeerStore,
    offline: OfflineRegistry,
    probe_dialer: Arc<dyn ProbeDialer>,
    config: HealthConfig,
    iface: String,
    state: Mutex<HashMap<[u8; 32], PeerHealthState>>,
    prev_transfer: Mutex<HashMap<[u8; 32], (u64, u64)>>,
    events: mpsc::Sender<HealthEvent>,
}

impl HealthMonitor {
    pub fn new(
        wg: Arc<dyn WireGuardControl>,
        store: PeerStore,
        offline: OfflineRegistry,
        probe_dialer: Arc<dyn ProbeDialer>,
        config: HealthConfig,
        iface: String,
    ) -> (Self, mpsc::Receiver<HealthEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (
            HealthMonitor {
                wg,
                store,
                offline,
                probe_dialer,
                config,
                iface,
                state: Mutex::new(HashMap::new()),
                prev_transfer: Mutex::new(HashMap::new()),
                events: tx,
            },
            rx,
        )
    }

    /// Spawns the handshake/transfer loop and the TCP probe loop as two
    /// independent tasks. Relay-route membership (needed by the probe
    /// exemption rule) is re-read from `relay_routes` on every tick.
    pub fn spawn(self: Arc<Self>, relay_routes: impl Fn() -> RelayRoutes + Send + Sync + 'static) {
        let relay_routes = Arc::new(relay_routes);

        let handshake_self = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(handshake_self.config.handshake_check_interval());
            loop {
                ticker.tick().await;
                if let Err(e) = handshake_self.run_handshake_check().await {
                    warn!(error = %e, "handshake/transfer health check failed");
                }
            }
        });

        let probe_self = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(probe_self.config.probe_interval());
            loop {
                ticker.tick().await;
                probe_self.run_probe_round(&relay_routes).await;
            }
        });
    }

    async fn run_handshake_check(&self) -> HealthResult<()> {
        let now = unix_now();
        let handshakes = self.wg.get_latest_handshakes(&self.iface).await?;
        let transfers = self.wg.get_peer_transfers(&self.iface).await?;

        for peer in self.store.get_active() {
            let key = b64(&peer.pubkey);
            let handshake_ts = handshakes.get(&key).copied();
            let transfer = transfers.get(&key).map(|t| (t.rx_bytes, t.tx_bytes)).unwrap_or((0, 0));

            let previous = {
                let mut prev = self.prev_transfer.lock().expect("transfer lock poisoned");
                let entry = prev.entry(peer.pubkey).or_insert((0, 0));
                let previous = *entry;
                *entry = transfer;
                previous
            };

            let is_stale = handshake_is_stale(now, handshake_ts, transfer, previous, self.config.handshake_stale_secs);

            let action = {
                let mut states = self.state.lock().expect("health state lock poisoned");
                let entry = states.entry(peer.pubkey).or_insert_with(|| PeerHealthState::new(now));
                decide_handshake_signal(entry, now, is_stale, handshake_ts)
            };

            self.apply_action(peer.pubkey, action).await;
        }
        Ok(())
    }

    async fn run_probe_round(&self, relay_routes: &Arc<impl Fn() -> RelayRoutes>) {
        let now = unix_now();
        let routes = relay_routes();

        for peer in self.store.get_active() {
            let relay_routed = routes.contains_key(&peer.pubkey);
            let first_seen = self
                .state
                .lock()
                .expect("health state lock poisoned")
                .get(&peer.pubkey)
                .map(|s| s.first_seen)
                .unwrap_or(now);
            let has_handshaken = self
                .state
                .lock()
                .expect("health state lock poisoned")
                .get(&peer.pubkey)
                .and_then(|s| s.last_handshake_seen)
                .is_some();

            if !probe_is_due(now, first_seen, self.config.probe_grace_secs, relay_routed, has_handshaken) {
                continue;
            }

            let Some(addr) = probe_target(&peer, self.config.probe_port) else { continue };
            let success = self.probe_dialer.probe(addr, self.config.probe_timeout).await;

            let action = {
                let mut states = self.state.lock().expect("health state lock poisoned");
                let entry = states.entry(peer.pubkey).or_insert_with(|| PeerHealthState::new(now));
                decide_probe_signal(entry, success, self.config.probe_fail_threshold)
            };

            self.apply_action(peer.pubkey, action).await;
        }
    }

    async fn apply_action(&self, pubkey: [u8; 32], action: HealthAction) {
        match action {
            HealthAction::None => {}
            HealthAction::ForceReconnect => {
                info!(peer = %hex::encode(pubkey), "health signal forcing reconnect");
                let _ = self.events.send(HealthEvent::ForceReconnect(pubkey)).await;
            }
            HealthAction::Evict => {
                info!(peer = %hex::encode(pubkey), "health signal evicting peer");
                self.offline.mark_offline(pubkey, Duration::from_secs(self.config.eviction_cooldown_secs as u64));
                self.store.remove(&pubkey);
                if let Err(e) = self.wg.remove_peer(&self.iface, &b64(&pubkey)).await {
                    warn!(peer = %hex::encode(pubkey), error = %e, "failed to remove evicted peer from kernel");
                }
                self.state.lock().expect("health state lock poisoned").remove(&pubkey);
                self.prev_transfer.lock().expect("transfer lock poisoned").remove(&pubkey);
                let _ = self.events.send(HealthEvent::Evicted(pubkey)).await;
            }
        }
    }
}

fn probe_target(peer: &wgmesh_core::PeerInfo, probe_port: u16) -> Option<SocketAddr> {
    if let Some(v6) = peer.mesh_ipv6 {
        return Some(SocketAddr::new(v6.into(), probe_port));
    }
    if !peer.mesh_ipv4.is_unspecified() {
        return Some(SocketAddr::new(peer.mesh_ipv4.into(), probe_port));
    }
    None
}
