//! In-mesh gossip (section 4.I): once a peer has a live WireGuard tunnel, it
//! periodically announces a random other active peer to it over that tunnel.
//! This is how topology knowledge spreads past a node's direct neighbours
//! without either the LAN or the DHT.
//!
//! Two sender modes share one wire format and one inbound handler:
//! standalone (this module owns a UDP socket bound for mesh traffic) and
//! exchange-integrated (sends are delegated to [`ExchangeHandle::send_raw`],
//! since the peer-exchange socket already decrypts and dispatches `ANNOUNCE`
//! the same way in [`crate::exchange::handle_announce`]).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use wgmesh_core::{unix_now, DiscoveryMethod, LocalNode, PeerInfo, PeerStore};
use wgmesh_crypto::envelope::{open_envelope_raw, seal_envelope};

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::exchange::ExchangeHandle;
use crate::messages::{message_type, AnnouncePayload, KnownPeerEntry, NodeDescription};

/// Abstraction over "how to put a sealed datagram on the wire", so the
/// gossip ticker doesn't need to know whether it owns a socket or is
/// borrowing the peer-exchange server's.
#[async_trait]
pub trait AnnounceSender: Send + Sync {
    async fn send_announce(&self, to: SocketAddr, bytes: Vec<u8>) -> DiscoveryResult<()>;
}

#[async_trait]
impl AnnounceSender for UdpSocket {
    async fn send_announce(&self, to: SocketAddr, bytes: Vec<u8>) -> DiscoveryResult<()> {
        self.send_to(&bytes, to).await?;
        Ok(())
    }
}

#[async_trait]
impl AnnounceSender for ExchangeHandle {
    async fn send_announce(&self, to: SocketAddr, bytes: Vec<u8>) -> DiscoveryResult<()> {
        self.send_raw(to, bytes).await
    }
}

pub enum GossipCommand {
    Shutdown,
}

#[derive(Clone)]
pub struct GossipHandle {
    command_tx: mpsc::Sender<GossipCommand>,
}

impl GossipHandle {
    pub async fn shutdown(&self) -> DiscoveryResult<()> {
        self.command_tx
            .send(GossipCommand::Shutdown)
            .await
            .map_err(|_| DiscoveryError::ChannelClosed)
    }
}

fn describe(local: &LocalNode, gossip_port: u16) -> NodeDescription {
    NodeDescription {
        pubkey_hex: hex::encode(local.pubkey),
        mesh_ipv4: local.mesh_ipv4,
        mesh_ipv6: local.mesh_ipv6,
        gossip_port,
        introducer: local.introducer,
        routable_networks: local.routable_networks.clone(),
        hostname: local.hostname.clone(),
        nat_type: local.nat_type.as_str().to_string(),
    }
}

fn known_peers_snapshot(store: &PeerStore, exclude: &[u8; 32]) -> Vec<KnownPeerEntry> {
    store
        .get_active()
        .into_iter()
        .filter(|p| &p.pubkey != exclude)
        .map(|p| KnownPeerEntry {
            pubkey_hex: p.pubkey_hex(),
            endpoint: p.endpoint,
            mesh_ipv4: p.mesh_ipv4,
            mesh_ipv6: p.mesh_ipv6,
        })
        .collect()
}

trait MeshGossipAddr {
    fn mesh_gossip_addr(&self, gossip_port: u16) -> Option<SocketAddr>;
}

impl MeshGossipAddr for PeerInfo {
    fn mesh_gossip_addr(&self, gossip_port: u16) -> Option<SocketAddr> {
        if self.mesh_ipv4.is_unspecified() {
            return None;
        }
        Some(SocketAddr::new(self.mesh_ipv4.into(), gossip_port))
    }
}

fn pick_random_active_peer(store: &PeerStore, own_pubkey: &[u8; 32]) -> Option<PeerInfo> {
    let mut candidates: Vec<PeerInfo> = store
        .get_active()
        .into_iter()
        .filter(|p| &p.pubkey != own_pubkey)
        .collect();
    candidates.shuffle(&mut rand::thread_rng());
    candidates.into_iter().next()
}

/// Runs the periodic announce loop against any [`AnnounceSender`].
async fn run_ticker(
    sender: Arc<dyn AnnounceSender>,
    gossip_key: [u8; 32],
    advertise_port: u16,
    target_port: u16,
    local: Arc<RwLock<LocalNode>>,
    store: PeerStore,
    own_pubkey: [u8; 32],
    interval: std::time::Duration,
    mut commands: mpsc::Receiver<GossipCommand>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(GossipCommand::Shutdown) | None => return,
                }
            }
            _ = ticker.tick() => {
                let Some(target) = pick_random_active_peer(&store, &own_pubkey) else { continue };
                let Some(target_endpoint) = target.mesh_gossip_addr(target_port) else { continue };

                let node = describe(&*local.read().await, advertise_port);
                let payload = AnnouncePayload {
                    node,
                    known_peers: known_peers_snapshot(&store, &own_pubkey),
                };
                match seal_envelope(message_type::ANNOUNCE, &payload, &gossip_key, unix_now()) {
                    Ok(bytes) => {
                        if let Err(e) = sender.send_announce(target_endpoint, bytes).await {
                            warn!(error = %e, peer = %target.pubkey_hex(), "gossip announce send failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to seal gossip announce"),
                }
            }
        }
    }
}

/// Receives `ANNOUNCE`s on a standalone gossip socket and feeds the peer
/// store under [`DiscoveryMethod::Gossip`]/[`DiscoveryMethod::GossipTransitive`].
/// Not used in exchange-integrated mode: there, [`crate::exchange::handle_announce`]
/// already does this for datagrams arriving on the shared socket.
async fn run_listener(socket: Arc<UdpSocket>, gossip_key: [u8; 32], own_pubkey: [u8; 32], store: PeerStore) {
    let mut buf = [0u8; 8192];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "gossip listener recv error");
                continue;
            }
        };
        let now = unix_now();
        let opened = match open_envelope_raw(&buf[..n], &gossip_key, now) {
            Ok(o) if o.message_type == message_type::ANNOUNCE => o,
            Ok(_) => continue,
            Err(_) => {
                debug!(%from, "dropped undecodable gossip datagram");
                continue;
            }
        };
        let Ok(announce) = serde_json::from_value::<AnnouncePayload>(opened.payload) else { continue };
        let Ok(pubkey_bytes) = hex::decode(&announce.node.pubkey_hex) else { continue };
        if pubkey_bytes.len() != 32 || pubkey_bytes == own_pubkey.to_vec() {
            continue;
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&pubkey_bytes);

        let mut peer = PeerInfo::new(pk, announce.node.mesh_ipv4, now);
        peer.mesh_ipv6 = Some(announce.node.mesh_ipv6);
        peer.endpoint = Some(from);
        peer.introducer = announce.node.introducer;
        peer.routable_networks = announce.node.routable_networks;
        peer.hostname = announce.node.hostname;
        peer.nat_type = announce.node.nat_type.parse().unwrap_or_default();
        if let Err(e) = store.update(peer, DiscoveryMethod::Gossip) {
            debug!(error = %e, "gossip peer-store update rejected");
        }

        store_known_peers(&store, &announce.known_peers, own_pubkey, now);
    }
}

fn store_known_peers(store: &PeerStore, entries: &[KnownPeerEntry], own_pubkey: [u8; 32], now: i64) {
    for entry in entries {
        let Ok(pubkey_bytes) = hex::decode(&entry.pubkey_hex) else { continue };
        if pubkey_bytes.len() != 32 || pubkey_bytes == own_pubkey.to_vec() {
            continue;
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&pubkey_bytes);
        let mut peer = PeerInfo::new(pk, entry.mesh_ipv4, now);
        peer.mesh_ipv6 = entry.mesh_ipv6;
        peer.endpoint = entry.endpoint;
        let _ = store.update(peer, DiscoveryMethod::GossipTransitive);
    }
}

/// Standalone mode: gossip owns its own UDP socket (bound for mesh-IP
/// traffic) and runs both the ticker and the inbound receive loop.
pub fn spawn_standalone(
    socket: UdpSocket,
    gossip_key: [u8; 32],
    own_pubkey: [u8; 32],
    advertise_port: u16,
    listen_port: u16,
    local: Arc<RwLock<LocalNode>>,
    store: PeerStore,
    config: &DiscoveryConfig,
) -> GossipHandle {
    let socket = Arc::new(socket);
    let (command_tx, command_rx) = mpsc::channel(8);

    tokio::spawn(run_ticker(
        socket.clone() as Arc<dyn AnnounceSender>,
        gossip_key,
        advertise_port,
        listen_port,
        local,
        store.clone(),
        own_pubkey,
        config.gossip_interval(),
        command_rx,
    ));
    tokio::spawn(run_listener(socket, gossip_key, own_pubkey, store));

    GossipHandle { command_tx }
}

/// Exchange-integrated mode: only the periodic send loop runs here; inbound
/// `ANNOUNCE`s are already handled by the peer-exchange server's own receive
/// loop ([`crate::exchange::handle_announce`]).
pub fn spawn_integrated(
    exchange: ExchangeHandle,
    gossip_key: [u8; 32],
    own_pubkey: [u8; 32],
    gossip_port: u16,
    local: Arc<RwLock<LocalNode>>,
    store: PeerStore,
    config: &DiscoveryConfig,
) -> GossipHandle {
    let (command_tx, command_rx) = mpsc::channel(8);
    tokio::spawn(run_ticker(
        Arc::new(exchange) as Arc<dyn AnnounceSender>,
        gossip_key,
        gossip_port,
        gossip_port,
        local,
        store,
        own_pubkey,
        config.gossip_interval(),
        command_rx,
    ));
    GossipHandle { command_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn mesh_gossip_addr_none_when_unspecified() {
        let peer = PeerInfo::new([1; 32], Ipv4Addr::UNSPECIFIED, unix_now());
        assert!(peer.mesh_gossip_addr(51821).is_none());
    }

    #[test]
    fn mesh_gossip_addr_uses_mesh_ipv4_and_gossip_port() {
        let peer = PeerInfo::new([1; 32], "10.66.0.2".parse().unwrap(), unix_now());
        assert_eq!(peer.mesh_gossip_addr(51821), Some("10.66.0.2:51821".parse().unwrap()));
    }

    #[test]
    fn pick_random_active_peer_excludes_self() {
        let store = PeerStore::new();
        let own = [9u8; 32];
        store
            .update(PeerInfo::new(own, "10.66.0.1".parse().unwrap(), unix_now()), DiscoveryMethod::Dht)
            .unwrap();
        store
            .update(PeerInfo::new([2; 32], "10.66.0.2".parse().unwrap(), unix_now()), DiscoveryMethod::Dht)
            .unwrap();
        let picked = pick_random_active_peer(&store, &own).unwrap();
        assert_eq!(picked.pubkey, [2u8; 32]);
    }
}
