//! Drives the peer store toward the kernel: one cycle computes desired
//! WireGuard peer configs and routes, diffs them against current kernel
//! state, and applies only what changed (section 4.J), then runs the
//! collision resolver (section 4.M).

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use base64::Engine;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use wgmesh_core::{unix_now, DesiredPeerConfig, DiscoveryMethod, LocalNode, NatType, PeerInfo, PeerStore, RelayRoutes};
use wgmesh_netctl::{DesiredRoute, RouteDriver, WireGuardControl};

use crate::collision::{self, Collision, CollisionOutcome};
use crate::config::ReconcileConfig;
use crate::error::ReconcileResult;
use crate::relay::{self, RelayDecisionInput};

fn b64(pubkey: &[u8; 32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pubkey)
}

/// Counts from one completed reconcile cycle, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub applied: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub collisions: usize,
}

pub struct Reconciler {
    wg: Arc<dyn WireGuardControl>,
    route: Arc<dyn RouteDriver>,
    store: PeerStore,
    local: Arc<RwLock<LocalNode>>,
    secret: String,
    psk_b64: String,
    iface: String,
    config: ReconcileConfig,
    last_applied: Mutex<HashMap<[u8; 32], String>>,
    relay_routes: Mutex<RelayRoutes>,
    expected_remote: Mutex<HashMap<[u8; 32], std::net::Ipv4Addr>>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        wg: Arc<dyn WireGuardControl>,
        route: Arc<dyn RouteDriver>,
        store: PeerStore,
        local: Arc<RwLock<LocalNode>>,
        secret: String,
        psk: [u8; 32],
        iface: String,
        config: ReconcileConfig,
    ) -> Self {
        Reconciler {
            wg,
            route,
            store,
            local,
            secret,
            psk_b64: base64::engine::general_purpose::STANDARD.encode(psk),
            iface,
            config,
            last_applied: Mutex::new(HashMap::new()),
            relay_routes: Mutex::new(HashMap::new()),
            expected_remote: Mutex::new(HashMap::new()),
        }
    }

    /// Current relay assignments, as computed by the last reconcile cycle.
    pub fn relay_routes(&self) -> RelayRoutes {
        self.relay_routes.lock().expect("relay routes lock poisoned").clone()
    }

    /// Loser pubkeys from the last cycle's collisions, along with the mesh
    /// IP they are expected to self-correct to.
    pub fn expected_remote_updates(&self) -> HashMap<[u8; 32], std::net::Ipv4Addr> {
        self.expected_remote.lock().expect("expected-remote lock poisoned").clone()
    }

    /// Runs one full reconcile cycle. `offline` lists pubkeys the health
    /// monitor has temporarily marked down (section 4.K): they are skipped
    /// entirely, as if absent from the peer store.
    pub async fn reconcile_once(&self, offline: &HashSet<[u8; 32]>) -> ReconcileResult<ReconcileSummary> {
        let now = unix_now();
        let local = self.local.read().await.clone();

        let active: Vec<PeerInfo> = self
            .store
            .get_active()
            .into_iter()
            .filter(|p| p.pubkey != local.pubkey && p.pubkey != [0u8; 32] && !offline.contains(&p.pubkey))
            .collect();

        let relay_candidates: Vec<[u8; 32]> = active
            .iter()
            .filter(|p| {
                p.introducer && p.endpoint.is_some() && now - p.last_seen <= self.config.relay_candidate_window_secs
            })
            .map(|p| p.pubkey)
            .collect();

        let handshakes = self.wg.get_latest_handshakes(&self.iface).await?;

        let mut desired: HashMap<[u8; 32], DesiredPeerConfig> = HashMap::new();
        let mut relay_routes: RelayRoutes = HashMap::new();
        let mut routes: Vec<DesiredRoute> = Vec::new();

        for peer in &active {
            let on_lan = peer.discovered_via.contains(&DiscoveryMethod::Lan);
            let peer_only_transitive = !peer.discovered_via.iter().any(|m| m.is_direct());
            let seconds_since_handshake = handshakes.get(&b64(&peer.pubkey)).map(|ts| now - ts);

            let candidates_excluding_peer: Vec<[u8; 32]> =
                relay_candidates.iter().copied().filter(|c| *c != peer.pubkey).collect();

            let decision_input = RelayDecisionInput {
                local_is_introducer: local.introducer,
                target_is_introducer: peer.introducer,
                target_discovered_via_lan: on_lan,
                target_endpoint_on_local_subnet: on_lan,
                target_endpoint_is_ipv6: peer.endpoint.map(|e| e.is_ipv6()).unwrap_or(false),
                relay_candidate_exists: !candidates_excluding_peer.is_empty(),
                force_relay: self.config.force_relay,
                both_sides_symmetric: local.nat_type == NatType::Symmetric && peer.nat_type == NatType::Symmetric,
                peer_only_transitive,
                seconds_since_handshake,
                handshake_stale_secs: self.config.handshake_stale_secs,
                ipv6_disabled: self.config.ipv6_disabled,
            };

            let mut cidrs: BTreeSet<String> = BTreeSet::new();
            cidrs.insert(format!("{}/32", peer.mesh_ipv4));
            if let Some(v6) = peer.mesh_ipv6 {
                cidrs.insert(format!("{v6}/128"));
            }
            for net in &peer.routable_networks {
                cidrs.insert(net.clone());
            }

            let route_gateway;
            if relay::should_relay(&decision_input) {
                let Some(relay_pub) = relay::pick_relay(&candidates_excluding_peer, &local.pubkey, &peer.pubkey)
                else {
                    continue;
                };
                let relay_peer = active.iter().find(|p| p.pubkey == relay_pub);
                let relay_endpoint = relay_peer.and_then(|p| p.endpoint);
                let relay_mesh_ip = relay_peer.map(|p| p.mesh_ipv4).unwrap_or(peer.mesh_ipv4);

                relay_routes.insert(peer.pubkey, relay_pub);
                route_gateway = relay_mesh_ip;

                let entry = desired.entry(relay_pub).or_insert_with(|| DesiredPeerConfig {
                    pubkey: relay_pub,
                    endpoint: relay_endpoint,
                    allowed_ips: BTreeSet::new(),
                });
                entry.allowed_ips.extend(cidrs);
            } else {
                route_gateway = peer.mesh_ipv4;
                let entry = desired.entry(peer.pubkey).or_insert_with(|| DesiredPeerConfig {
                    pubkey: peer.pubkey,
                    endpoint: peer.endpoint,
                    allowed_ips: BTreeSet::new(),
                });
                entry.allowed_ips.extend(cidrs);
            }

            for net in &peer.routable_networks {
                routes.push(DesiredRoute {
                    network: net.clone(),
                    gateway: route_gateway.to_string(),
                });
            }
        }

        *self.relay_routes.lock().expect("relay routes lock poisoned") = relay_routes;

        let summary = self.apply_desired(desired).await?;
        self.route.sync_routes(&self.iface, &routes).await.map_err(|e| {
            crate::error::ReconcileError::Route(e.to_string())
        })?;

        let collisions = self.run_collision_resolver(&active, &local).await;

        Ok(ReconcileSummary {
            collisions: collisions.len(),
            ..summary
        })
    }

    async fn apply_desired(&self, desired: HashMap<[u8; 32], DesiredPeerConfig>) -> ReconcileResult<ReconcileSummary> {
        let current = self.wg.get_peers(&self.iface).await?;
        let current_pubkeys: HashSet<String> = current.iter().map(|p| p.pubkey.clone()).collect();
        let desired_pubkeys: HashSet<String> = desired.keys().map(b64).collect();

        let mut removed = 0;
        for stale in current_pubkeys.difference(&desired_pubkeys) {
            self.wg.remove_peer(&self.iface, stale).await?;
            self.last_applied.lock().expect("last-applied lock poisoned").retain(|pub_key, _| &b64(pub_key) != stale);
            removed += 1;
        }

        let mut applied = 0;
        let mut unchanged = 0;
        for config in desired.values() {
            let signature = config.signature();
            let already_applied = {
                let cache = self.last_applied.lock().expect("last-applied lock poisoned");
                cache.get(&config.pubkey) == Some(&signature)
            };
            if already_applied {
                unchanged += 1;
                continue;
            }

            // Optimistic write order: mark the cache before the kernel call so a
            // retry after a crash mid-apply does not re-skip a half-applied peer;
            // roll back on failure so the next cycle retries instead of wedging.
            self.last_applied
                .lock()
                .expect("last-applied lock poisoned")
                .insert(config.pubkey, signature.clone());

            let allowed_ips_csv = config.allowed_ips.iter().cloned().collect::<Vec<_>>().join(",");
            let result = self
                .wg
                .set_peer(&self.iface, &b64(&config.pubkey), &self.psk_b64, config.endpoint, &allowed_ips_csv)
                .await;

            match result {
                Ok(()) => {
                    applied += 1;
                    debug!(peer = %hex::encode(config.pubkey), "peer config applied");
                }
                Err(e) => {
                    self.last_applied.lock().expect("last-applied lock poisoned").remove(&config.pubkey);
                    warn!(peer = %hex::encode(config.pubkey), error = %e, "set_peer failed, will retry next cycle");
                }
            }
        }

        Ok(ReconcileSummary {
            applied,
            unchanged,
            removed,
            collisions: 0,
        })
    }

    async fn run_collision_resolver(&self, active: &[PeerInfo], local: &LocalNode) -> Vec<Collision> {
        let mut all = active.to_vec();
        all.push(PeerInfo::new(local.pubkey, local.mesh_ipv4, unix_now()));

        let collisions = collision::detect_collisions(&all);
        if collisions.is_empty() {
            return collisions;
        }

        let taken: Vec<std::net::Ipv4Addr> = all.iter().map(|p| p.mesh_ipv4).collect();
        let mut expected_remote = HashMap::new();

        for c in &collisions {
            let outcome = collision::resolve(c, &local.pubkey, &self.secret, &taken, |secret, loser_bytes, nonce| {
                let mut loser = [0u8; 32];
                loser.copy_from_slice(loser_bytes);
                let keys = wgmesh_crypto::derive_keys(secret).expect("secret already validated at startup");
                wgmesh_crypto::derive_mesh_ipv4_with_nonce(&keys, secret, &loser, nonce)
            });

            match outcome {
                CollisionOutcome::ReconfigureLocal { new_ip } => {
                    info!(%new_ip, "mesh IP collision: reconfiguring local address");
                    let cidr = format!("{new_ip}/16");
                    if let Err(e) = self.wg.set_address(&self.iface, &cidr, None).await {
                        warn!(error = %e, "failed to reconfigure address after collision");
                        continue;
                    }
                    self.local.write().await.mesh_ipv4 = new_ip;
                }
                CollisionOutcome::ExpectRemote { loser, new_ip } => {
                    debug!(peer = %hex::encode(loser), %new_ip, "mesh IP collision: expecting remote self-correction");
                    expected_remote.insert(loser, new_ip);
                }
            }
        }

        *self.expected_remote.lock().expect("expected-remote lock poisoned") = expected_remote;
        collisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use wgmesh_netctl::{CommandOutput, Executor, KernelRouteDriver, KernelWireGuardControl, RecordingExecutor};

    fn local_node() -> LocalNode {
        LocalNode {
            pubkey: [9u8; 32],
            privkey: [1u8; 32],
            mesh_ipv4: Ipv4Addr::new(10, 66, 0, 1),
            mesh_ipv6: "fd00::1".parse().unwrap(),
            endpoint: Some("203.0.113.1:51820".parse().unwrap()),
            nat_type: NatType::Cone,
            routable_networks: Vec::new(),
            introducer: false,
            hostname: "local".into(),
        }
    }

    #[tokio::test]
    async fn direct_peer_is_applied_once_and_skipped_on_repeat() {
        let exec = Arc::new(RecordingExecutor::new());
        // get_latest_handshakes -> get_peers -> `wg show dump`
        exec.push_response(Ok(CommandOutput::default()));
        // get_peers for diff
        exec.push_response(Ok(CommandOutput::default()));
        // set_peer
        exec.push_response(Ok(CommandOutput::default()));
        // sync_routes: current routes
        exec.push_response(Ok(CommandOutput::default()));
        // ip_forward check
        exec.push_response(Ok(CommandOutput {
            stdout: "1".into(),
            stderr: String::new(),
        }));
        // forward rule check (ok => exists, no add)
        exec.push_response(Ok(CommandOutput::default()));

        let wg = Arc::new(KernelWireGuardControl::new(exec.clone() as Arc<dyn Executor>));
        let route = Arc::new(KernelRouteDriver::new(exec.clone() as Arc<dyn Executor>));
        let store = PeerStore::new();
        store
            .update(
                {
                    let mut p = PeerInfo::new([2u8; 32], Ipv4Addr::new(10, 66, 0, 2), unix_now());
                    p.endpoint = Some("198.51.100.2:51820".parse().unwrap());
                    p
                },
                DiscoveryMethod::Dht,
            )
            .unwrap();

        let reconciler = Reconciler::new(
            wg,
            route,
            store,
            Arc::new(RwLock::new(local_node())),
            "wgmesh-test-secret-long-enough".into(),
            [7u8; 32],
            "wg-mesh0".into(),
            ReconcileConfig::default(),
        );

        let summary = reconciler.reconcile_once(&HashSet::new()).await.unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.removed, 0);
    }

    #[test]
    fn summary_default_is_all_zero() {
        assert_eq!(ReconcileSummary::default(), ReconcileSummary { applied: 0, unchanged: 0, removed: 0, collisions: 0 });
    }
}
