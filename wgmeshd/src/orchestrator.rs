//! Startup, run, and shutdown sequence for one wgmesh node (section 4.O).
//!
//! Mirrors the order every module's own doc comments describe: derive
//! identity, stand up the kernel interface, restore cached state, start
//! discovery, then reconciliation, health and (optionally) Dandelion++ on
//! top, with the persistence scheduler running throughout.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use base64::Engine;
use tokio::sync::RwLock;
use tracing::{info, warn};

use wgmesh_core::{DiscoveryMethod, PeerStore};
use wgmesh_dandelion::DandelionConfig;
use wgmesh_discovery::config::DiscoveryConfig;
use wgmesh_discovery::service::{DiscoveryService, DiscoveryServiceConfig};
use wgmesh_health::{HealthConfig, HealthMonitor, OfflineRegistry, TcpPingProbe};
use wgmesh_netctl::{KernelRouteDriver, KernelWireGuardControl, RouteDriver, SystemExecutor, WireGuardControl};
use wgmesh_persist::PersistPaths;
use wgmesh_reconcile::{ReconcileConfigBuilder, Reconciler};

use crate::config::WgmeshConfig;
use crate::control::ControlPlane;
use crate::dandelion_transport::{run_stem_receiver, ExchangeDandelionTransport};
use crate::error::WgmeshdResult;
use crate::identity;

const DEFAULT_STUN_PRIMARY: &str = "stun.l.google.com:19302";
const DEFAULT_STUN_SECONDARY: &str = "stun1.l.google.com:19302";

/// Everything a running node owns, handed back to `main` so it can wait on
/// signals and drive a clean shutdown.
pub struct Daemon {
    pub control: ControlPlane,
    local: Arc<RwLock<wgmesh_core::LocalNode>>,
    reconcile_now: tokio::sync::mpsc::Sender<()>,
    discovery: DiscoveryService,
    persist: wgmesh_persist::PersistHandle,
    dandelion: Option<wgmesh_dandelion::DandelionHandle>,
    wg: Arc<dyn WireGuardControl>,
    iface: String,
    reconcile_task: tokio::task::JoinHandle<()>,
}

impl Daemon {
    /// Applies a SIGHUP-reloaded [`crate::config::HotConfig`]: pushes
    /// `advertise_routes` into the shared [`wgmesh_core::LocalNode`] and
    /// wakes the reconcile loop immediately rather than waiting for its
    /// next tick.
    pub async fn apply_hot_reload(&self, hot: &crate::config::HotConfig) {
        self.local.write().await.routable_networks = hot.advertise_routes.clone();
        let _ = self.reconcile_now.try_send(());
    }
}

/// Runs the full startup sequence and leaves every background task spawned.
pub async fn start(config: WgmeshConfig) -> WgmeshdResult<Daemon> {
    let fixed = config.fixed.clone();
    let keys = wgmesh_crypto::derive_keys(&fixed.secret)?;

    let paths = PersistPaths::new(fixed.base_dir.clone(), fixed.iface.clone(), hex::encode(&keys.network_id[..4]));
    let local_node = identity::load_or_create(&paths, &keys, &fixed.secret)?;
    let own_pubkey = local_node.pubkey;
    let local = Arc::new(RwLock::new(local_node.clone()));

    let executor = Arc::new(SystemExecutor);
    let wg: Arc<dyn WireGuardControl> = Arc::new(KernelWireGuardControl::new(executor.clone()));
    let route: Arc<dyn RouteDriver> = Arc::new(KernelRouteDriver::new(executor));

    let privkey_b64 = base64::engine::general_purpose::STANDARD.encode(local_node.privkey);
    let actual_port = wg.ensure_interface(&fixed.iface, &privkey_b64, fixed.listen_port).await?;
    if actual_port != fixed.listen_port {
        warn!(requested = fixed.listen_port, actual = actual_port, "listen port unavailable, substituted");
    }

    let ipv6_cidr = if fixed.ipv6_disabled {
        None
    } else {
        Some(format!("{}/64", local_node.mesh_ipv6))
    };
    wg.set_address(&fixed.iface, &format!("{}/16", local_node.mesh_ipv4), ipv6_cidr.as_deref()).await?;

    let store = PeerStore::new();
    restore_peer_cache(&paths, &store);

    let discovery_config = DiscoveryConfig {
        gossip_port: actual_port.saturating_add(1),
        dht_bootstrap_routers: fixed.dht_bootstrap_routers.clone(),
        introducer: fixed.introducer,
        no_punching: fixed.no_punching,
        force_relay: fixed.force_relay,
        ..Default::default()
    };

    let (dandelion_sink_tx, dandelion_sink_rx) = if fixed.dandelion_enabled {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let stun_servers = resolve_stun_servers().await;

    let discovery = DiscoveryService::start(DiscoveryServiceConfig {
        secret: fixed.secret.clone(),
        keys: keys.clone(),
        own_pubkey,
        local: local.clone(),
        store: store.clone(),
        config: discovery_config,
        wg: wg.clone(),
        iface: fixed.iface.clone(),
        stun_servers,
        standalone_gossip: fixed.standalone_gossip,
        dandelion_sink: dandelion_sink_tx,
    })
    .await?;

    let dandelion = if fixed.dandelion_enabled {
        let transport = Arc::new(ExchangeDandelionTransport::new(
            discovery.exchange_handle(),
            store.clone(),
            keys.gossip_key,
        ));
        let store_for_peers = store.clone();
        let handle = wgmesh_dandelion::spawn(
            own_pubkey,
            keys.epoch_seed,
            move || store_for_peers.get_active().into_iter().map(|p| p.pubkey).collect(),
            transport,
            DandelionConfig::default(),
        );
        if let Some(rx) = dandelion_sink_rx {
            let handle_for_receiver = Arc::new(handle.clone());
            tokio::spawn(run_stem_receiver(rx, handle_for_receiver));
        }
        Some(handle)
    } else {
        None
    };

    let reconcile_config = ReconcileConfigBuilder::new()
        .force_relay(fixed.force_relay)
        .ipv6_disabled(fixed.ipv6_disabled)
        .build();
    let reconciler = Arc::new(Reconciler::new(
        wg.clone(),
        route,
        store.clone(),
        local.clone(),
        fixed.secret.clone(),
        keys.psk,
        fixed.iface.clone(),
        reconcile_config.clone(),
    ));

    let offline = OfflineRegistry::new();
    let probe_dialer = Arc::new(TcpPingProbe::new(fixed.iface.clone()));
    let (health_monitor, mut health_events) = HealthMonitor::new(
        wg.clone(),
        store.clone(),
        offline.clone(),
        probe_dialer,
        HealthConfig::default(),
        fixed.iface.clone(),
    );
    let health_monitor = Arc::new(health_monitor);
    {
        let reconciler_for_relay_routes = reconciler.clone();
        health_monitor
            .clone()
            .spawn(move || reconciler_for_relay_routes.relay_routes());
    }

    let (reconcile_now_tx, mut reconcile_now_rx) = tokio::sync::mpsc::channel::<()>(1);
    let reconcile_task = {
        let reconciler = reconciler.clone();
        let offline = offline.clone();
        let interval = reconcile_config.reconcile_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = offline.snapshot();
                        if let Err(e) = reconciler.reconcile_once(&snapshot).await {
                            warn!(error = %e, "reconcile cycle failed");
                        }
                    }
                    _ = reconcile_now_rx.recv() => {
                        let snapshot = offline.snapshot();
                        if let Err(e) = reconciler.reconcile_once(&snapshot).await {
                            warn!(error = %e, "reconcile cycle failed after hot reload");
                        }
                    }
                    event = health_events.recv() => {
                        if event.is_none() {
                            break;
                        }
                        let snapshot = offline.snapshot();
                        if let Err(e) = reconciler.reconcile_once(&snapshot).await {
                            warn!(error = %e, "reconcile cycle failed after health event");
                        }
                    }
                }
            }
        })
    };

    let dht_snapshot_store = store.clone();
    let persist = wgmesh_persist::spawn_scheduler(paths, store.clone(), move || dht_hint_nodes(&dht_snapshot_store));

    info!(iface = %fixed.iface, mesh_ip = %local_node.mesh_ipv4, port = actual_port, "wgmeshd started");

    Ok(Daemon {
        control: ControlPlane::new(store, local.clone(), fixed.iface.clone()),
        local,
        reconcile_now: reconcile_now_tx,
        discovery,
        persist,
        dandelion,
        wg,
        iface: fixed.iface,
        reconcile_task,
    })
}

/// Tears everything down in roughly reverse startup order: stop accepting
/// new work, let in-flight tasks drain, write a final snapshot, then remove
/// the kernel interface.
pub async fn shutdown(daemon: Daemon) -> WgmeshdResult<()> {
    daemon.reconcile_task.abort();
    if let Some(dandelion) = daemon.dandelion {
        dandelion.shutdown().await;
    }
    daemon.discovery.shutdown().await?;
    daemon.persist.shutdown().await;
    daemon.wg.teardown_interface(&daemon.iface).await?;
    Ok(())
}

/// Re-adds every cached peer at the lowest discovery rank so a live source
/// immediately outranks it once the peer is reconfirmed (section 4.N).
fn restore_peer_cache(paths: &PersistPaths, store: &PeerStore) {
    let now = wgmesh_core::unix_now();
    match wgmesh_persist::load_peer_cache(&paths.peer_cache(), now) {
        Ok(peers) => {
            let count = peers.len();
            for peer in peers {
                if let Err(e) = store.update(peer, DiscoveryMethod::Cache) {
                    warn!(error = %e, "dropping cached peer, store full");
                }
            }
            info!(count, "restored peer cache");
        }
        Err(e) => warn!(error = %e, "failed to load peer cache, starting empty"),
    }
}

/// Peers last discovered through the DHT or DHT-mediated rendezvous, used as
/// the bootstrap hint list the next process start feeds back into the DHT
/// client. Not a live snapshot of `mainline::Dht`'s routing table, which
/// exposes no such accessor; this approximation is the best available
/// without reaching into the DHT crate's internals.
fn dht_hint_nodes(store: &PeerStore) -> Vec<SocketAddr> {
    store
        .get_all()
        .into_iter()
        .filter(|p| p.discovered_via.contains(&DiscoveryMethod::Dht) || p.discovered_via.contains(&DiscoveryMethod::DhtRendezvous))
        .filter_map(|p| p.endpoint)
        .collect()
}

async fn resolve_stun_servers() -> (SocketAddr, SocketAddr) {
    let primary = resolve_one(DEFAULT_STUN_PRIMARY, (74, 125, 250, 129)).await;
    let secondary = resolve_one(DEFAULT_STUN_SECONDARY, (74, 125, 204, 127)).await;
    (primary, secondary)
}

async fn resolve_one(host: &str, fallback: (u8, u8, u8, u8)) -> SocketAddr {
    match tokio::net::lookup_host(host).await {
        Ok(mut addrs) => addrs.next().unwrap_or_else(|| fallback_addr(fallback)),
        Err(e) => {
            warn!(host, error = %e, "stun server dns lookup failed, using fallback address");
            fallback_addr(fallback)
        }
    }
}

fn fallback_addr(octets: (u8, u8, u8, u8)) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::new(octets.0, octets.1, octets.2, octets.3)), 19302)
}
