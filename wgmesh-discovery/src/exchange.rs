//! UDP peer-exchange server (section 4.G): HELLO/REPLY direct exchange,
//! introducer-mediated rendezvous for symmetric-NAT pairs, and GOODBYE.
//!
//! One socket per node, bound to `GossipPort`. Every inbound datagram is
//! rate-limited by source IP *before* decryption, then handed to a
//! short-lived task so a slow handler can't stall the read loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use wgmesh_core::{unix_now, DiscoveryMethod, LocalNode, PeerInfo, PeerStore};
use wgmesh_crypto::envelope::{open_envelope_raw, seal_envelope};
use wgmesh_netctl::WireGuardControl;

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::messages::{
    message_type, pair_id, GoodbyePayload, HelloPayload, KnownPeerEntry, NodeDescription,
    ReplyPayload, RendezvousOfferPayload, RendezvousStartPayload,
};
use crate::rate_limit::{RateLimitResult, SourceRateLimiter};

const MAX_KNOWN_PEERS_SENT: usize = 64;
const MAX_RENDEZVOUS_INTRODUCERS: usize = 3;
const PORT_EXPANSION_RADIUS: u16 = 2;

/// Commands a caller can issue against the running exchange server.
pub enum ExchangeCommand {
    ExchangeWithPeer {
        addr: SocketAddr,
        respond: oneshot::Sender<DiscoveryResult<ReplyPayload>>,
    },
    OfferRendezvous {
        target_pubkey: [u8; 32],
        candidates: Vec<SocketAddr>,
        introducers: Vec<SocketAddr>,
    },
    SendGoodbye {
        to: Vec<SocketAddr>,
    },
    SendRaw {
        to: SocketAddr,
        bytes: Vec<u8>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct ExchangeHandle {
    command_tx: mpsc::Sender<ExchangeCommand>,
}

impl ExchangeHandle {
    pub async fn exchange_with_peer(&self, addr: SocketAddr) -> DiscoveryResult<ReplyPayload> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(ExchangeCommand::ExchangeWithPeer { addr, respond: tx })
            .await
            .map_err(|_| DiscoveryError::ChannelClosed)?;
        rx.await.map_err(|_| DiscoveryError::ChannelClosed)?
    }

    pub async fn offer_rendezvous(
        &self,
        target_pubkey: [u8; 32],
        candidates: Vec<SocketAddr>,
        introducers: Vec<SocketAddr>,
    ) -> DiscoveryResult<()> {
        self.command_tx
            .send(ExchangeCommand::OfferRendezvous {
                target_pubkey,
                candidates,
                introducers,
            })
            .await
            .map_err(|_| DiscoveryError::ChannelClosed)
    }

    pub async fn send_goodbye(&self, to: Vec<SocketAddr>) -> DiscoveryResult<()> {
        self.command_tx
            .send(ExchangeCommand::SendGoodbye { to })
            .await
            .map_err(|_| DiscoveryError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> DiscoveryResult<()> {
        self.command_tx
            .send(ExchangeCommand::Shutdown)
            .await
            .map_err(|_| DiscoveryError::ChannelClosed)
    }

    /// Sends a pre-sealed datagram through the peer-exchange socket. Used by
    /// the in-mesh gossip layer when it runs in exchange-integrated mode
    /// instead of owning its own socket.
    pub async fn send_raw(&self, to: SocketAddr, bytes: Vec<u8>) -> DiscoveryResult<()> {
        self.command_tx
            .send(ExchangeCommand::SendRaw { to, bytes })
            .await
            .map_err(|_| DiscoveryError::ChannelClosed)
    }
}

struct PendingOffer {
    initiator: Option<RendezvousOfferPayload>,
    target: Option<RendezvousOfferPayload>,
    first_seen: Instant,
}

struct Shared {
    socket: UdpSocket,
    gossip_key: [u8; 32],
    own_pubkey: [u8; 32],
    local: Arc<RwLock<LocalNode>>,
    store: PeerStore,
    config: DiscoveryConfig,
    wg: Arc<dyn WireGuardControl>,
    iface: String,
    rate_limiter: Mutex<SourceRateLimiter>,
    pending_hello: Mutex<HashMap<SocketAddr, oneshot::Sender<ReplyPayload>>>,
    introducer_offers: Mutex<HashMap<u64, PendingOffer>>,
    introducer_cooldowns: Mutex<HashMap<u64, Instant>>,
    participant_cooldowns: Mutex<HashMap<u64, Instant>>,
    /// Forwards opaque `DANDELION_STEM` payloads to whatever owns the local
    /// Dandelion router; `None` when privacy routing is disabled, in which
    /// case such datagrams are dropped like any other unknown type.
    dandelion_sink: Option<mpsc::Sender<Vec<u8>>>,
}

/// Spawns the peer-exchange server and returns a handle to it.
pub fn spawn(
    socket: UdpSocket,
    gossip_key: [u8; 32],
    own_pubkey: [u8; 32],
    local: Arc<RwLock<LocalNode>>,
    store: PeerStore,
    config: DiscoveryConfig,
    wg: Arc<dyn WireGuardControl>,
    iface: String,
    dandelion_sink: Option<mpsc::Sender<Vec<u8>>>,
) -> ExchangeHandle {
    let rate_limiter = Mutex::new(SourceRateLimiter::new(config.rate_limit.clone()));
    let shared = Arc::new(Shared {
        socket,
        gossip_key,
        own_pubkey,
        local,
        store,
        config,
        wg,
        iface,
        rate_limiter,
        pending_hello: Mutex::new(HashMap::new()),
        introducer_offers: Mutex::new(HashMap::new()),
        introducer_cooldowns: Mutex::new(HashMap::new()),
        participant_cooldowns: Mutex::new(HashMap::new()),
        dandelion_sink,
    });

    let (command_tx, command_rx) = mpsc::channel(64);
    tokio::spawn(run(shared, command_rx));
    ExchangeHandle { command_tx }
}

async fn run(shared: Arc<Shared>, mut commands: mpsc::Receiver<ExchangeCommand>) {
    let mut buf = [0u8; 8192];
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(ExchangeCommand::Shutdown) | None => {
                        broadcast_goodbye(&shared).await;
                        return;
                    }
                    Some(ExchangeCommand::ExchangeWithPeer { addr, respond }) => {
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            let _ = respond.send(exchange_with_peer(&shared, addr).await);
                        });
                    }
                    Some(ExchangeCommand::OfferRendezvous { target_pubkey, candidates, introducers }) => {
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            send_rendezvous_offer(&shared, target_pubkey, candidates, introducers).await;
                        });
                    }
                    Some(ExchangeCommand::SendGoodbye { to }) => {
                        let shared = shared.clone();
                        tokio::spawn(async move { send_goodbye_to(&shared, &to).await; });
                    }
                    Some(ExchangeCommand::SendRaw { to, bytes }) => {
                        if let Err(e) = shared.socket.send_to(&bytes, to).await {
                            warn!(error = %e, %to, "peer-exchange send_raw failed");
                        }
                    }
                }
            }
            res = shared.socket.recv_from(&mut buf) => {
                let (n, from) = match res {
                    Ok(v) => v,
                    Err(e) => { warn!(error = %e, "peer-exchange recv error"); continue; }
                };
                let allowed = {
                    let mut limiter = shared.rate_limiter.lock().expect("rate limiter lock poisoned");
                    limiter.record_message(&from.ip())
                };
                if !matches!(allowed, RateLimitResult::Allowed) {
                    debug!(source = %from.ip(), "dropping rate-limited datagram");
                    continue;
                }
                let datagram = buf[..n].to_vec();
                let shared = shared.clone();
                tokio::spawn(async move { handle_datagram(&shared, datagram, from).await; });
            }
        }
    }
}

async fn describe(shared: &Shared) -> NodeDescription {
    let local = shared.local.read().await;
    NodeDescription {
        pubkey_hex: hex::encode(shared.own_pubkey),
        mesh_ipv4: local.mesh_ipv4,
        mesh_ipv6: local.mesh_ipv6,
        gossip_port: shared.config.gossip_port,
        introducer: shared.config.introducer,
        routable_networks: local.routable_networks.clone(),
        hostname: local.hostname.clone(),
        nat_type: local.nat_type.as_str().to_string(),
    }
}

fn known_peers_snapshot(shared: &Shared) -> Vec<KnownPeerEntry> {
    shared
        .store
        .get_active()
        .into_iter()
        .take(MAX_KNOWN_PEERS_SENT)
        .map(|p| KnownPeerEntry {
            pubkey_hex: p.pubkey_hex(),
            endpoint: p.endpoint,
            mesh_ipv4: p.mesh_ipv4,
            mesh_ipv6: p.mesh_ipv6,
        })
        .collect()
}

async fn send_hello(shared: &Shared, addr: SocketAddr) -> DiscoveryResult<()> {
    let payload = HelloPayload {
        node: describe(shared).await,
        known_peers: known_peers_snapshot(shared),
    };
    let bytes = seal_envelope(message_type::HELLO, &payload, &shared.gossip_key, unix_now())?;
    shared.socket.send_to(&bytes, addr).await?;
    Ok(())
}

/// `ExchangeWithPeer(addr)`: section 4.G direct exchange.
async fn exchange_with_peer(shared: &Shared, addr: SocketAddr) -> DiscoveryResult<ReplyPayload> {
    let (tx, rx) = oneshot::channel();
    shared.pending_hello.lock().expect("pending_hello lock poisoned").insert(addr, tx);

    let deadline = tokio::time::Instant::now() + shared.config.exchange_timeout;
    send_hello(shared, addr).await?;

    if shared.config.no_punching {
        let result = tokio::time::timeout_at(deadline, rx).await;
        shared.pending_hello.lock().expect("pending_hello lock poisoned").remove(&addr);
        return result.map_err(|_| DiscoveryError::ExchangeTimeout(addr.to_string()))?
            .map_err(|_| DiscoveryError::ExchangeTimeout(addr.to_string()));
    }

    let mut retransmit = tokio::time::interval(shared.config.hole_punch_retransmit_interval);
    retransmit.tick().await; // consume the immediate first tick

    tokio::pin!(rx);
    loop {
        tokio::select! {
            biased;
            reply = &mut rx => {
                shared.pending_hello.lock().expect("pending_hello lock poisoned").remove(&addr);
                return reply.map_err(|_| DiscoveryError::ExchangeTimeout(addr.to_string()));
            }
            _ = retransmit.tick() => {
                if tokio::time::Instant::now() >= deadline {
                    shared.pending_hello.lock().expect("pending_hello lock poisoned").remove(&addr);
                    return Err(DiscoveryError::ExchangeTimeout(addr.to_string()));
                }
                let _ = send_hello(shared, addr).await;
            }
            _ = tokio::time::sleep_until(deadline) => {
                shared.pending_hello.lock().expect("pending_hello lock poisoned").remove(&addr);
                return Err(DiscoveryError::ExchangeTimeout(addr.to_string()));
            }
        }
    }
}

async fn handle_datagram(shared: &Shared, datagram: Vec<u8>, from: SocketAddr) {
    let now = unix_now();
    let opened = match open_envelope_raw(&datagram, &shared.gossip_key, now) {
        Ok(o) => o,
        Err(_) => {
            debug!(source = %from, "undecodable datagram on peer-exchange socket, dropping");
            return;
        }
    };

    let result = match opened.message_type.as_str() {
        message_type::HELLO => handle_hello(shared, opened.payload, from).await,
        message_type::REPLY => handle_reply(shared, opened.payload, from).await,
        message_type::ANNOUNCE => handle_announce(shared, opened.payload, from).await,
        message_type::RENDEZVOUS_OFFER => handle_rendezvous_offer(shared, opened.payload, from).await,
        message_type::RENDEZVOUS_START => handle_rendezvous_start(shared, opened.payload).await,
        message_type::GOODBYE => handle_goodbye(shared, opened.payload, now).await,
        message_type::DANDELION_STEM => {
            if let Some(sink) = &shared.dandelion_sink {
                if let Ok(bytes) = serde_json::to_vec(&opened.payload) {
                    let _ = sink.try_send(bytes);
                }
            }
            Ok(())
        }
        other => {
            debug!(message_type = other, "unknown peer-exchange message type");
            Ok(())
        }
    };
    if let Err(e) = result {
        debug!(error = %e, source = %from, "peer-exchange handler error");
    }
}

fn peer_info_from_description(node: &NodeDescription, endpoint: SocketAddr, now: i64) -> DiscoveryResult<PeerInfo> {
    let pubkey_bytes = hex::decode(&node.pubkey_hex).map_err(|_| DiscoveryError::Io("bad pubkey hex".into()))?;
    if pubkey_bytes.len() != 32 {
        return Err(DiscoveryError::Io("bad pubkey length".into()));
    }
    let mut pubkey = [0u8; 32];
    pubkey.copy_from_slice(&pubkey_bytes);
    let mut peer = PeerInfo::new(pubkey, node.mesh_ipv4, now);
    peer.mesh_ipv6 = Some(node.mesh_ipv6);
    peer.endpoint = Some(endpoint);
    peer.introducer = node.introducer;
    peer.routable_networks = node.routable_networks.clone();
    peer.hostname = node.hostname.clone();
    peer.nat_type = node.nat_type.parse().unwrap_or_default();
    Ok(peer)
}

fn store_known_peers(shared: &Shared, entries: &[KnownPeerEntry], method: DiscoveryMethod, now: i64) {
    for entry in entries {
        let Ok(pubkey_bytes) = hex::decode(&entry.pubkey_hex) else { continue };
        if pubkey_bytes.len() != 32 || pubkey_bytes == shared.own_pubkey.to_vec() {
            continue;
        }
        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(&pubkey_bytes);
        let mut peer = PeerInfo::new(pubkey, entry.mesh_ipv4, now);
        peer.mesh_ipv6 = entry.mesh_ipv6;
        peer.endpoint = entry.endpoint;
        let _ = shared.store.update(peer, method);
    }
}

async fn handle_hello(shared: &Shared, payload: serde_json::Value, from: SocketAddr) -> DiscoveryResult<()> {
    let hello: HelloPayload = serde_json::from_value(payload).map_err(|e| DiscoveryError::Io(e.to_string()))?;
    let now = unix_now();

    let sender = peer_info_from_description(&hello.node, from, now)?;
    shared.store.update(sender, DiscoveryMethod::Dht)?;
    store_known_peers(shared, &hello.known_peers, DiscoveryMethod::DhtTransitive, now);

    let reply = ReplyPayload {
        node: describe(shared).await,
        known_peers: known_peers_snapshot(shared),
        observed_endpoint: from,
    };
    let bytes = seal_envelope(message_type::REPLY, &reply, &shared.gossip_key, now)?;
    shared.socket.send_to(&bytes, from).await?;
    Ok(())
}

async fn handle_reply(shared: &Shared, payload: serde_json::Value, from: SocketAddr) -> DiscoveryResult<()> {
    let reply: ReplyPayload = serde_json::from_value(payload).map_err(|e| DiscoveryError::Io(e.to_string()))?;
    let now = unix_now();

    apply_observed_endpoint(shared, reply.observed_endpoint).await;

    let sender = peer_info_from_description(&reply.node, from, now)?;
    shared.store.update(sender, DiscoveryMethod::Dht)?;
    store_known_peers(shared, &reply.known_peers, DiscoveryMethod::DhtTransitive, now);

    if let Some(waiter) = shared.pending_hello.lock().expect("pending_hello lock poisoned").remove(&from) {
        let _ = waiter.send(reply);
    }
    Ok(())
}

/// Applies a peer-observed endpoint to our local node: IP only, combined with
/// our own WireGuard listen port, and never overwriting a global IPv6
/// endpoint with an IPv4 reflection (section 4.G step 1 under inbound REPLY).
async fn apply_observed_endpoint(shared: &Shared, observed: SocketAddr) {
    if wgmesh_core::ip_is_private_or_loopback(&observed.ip()) {
        return;
    }
    let mut local = shared.local.write().await;
    if let Some(existing) = local.endpoint {
        if existing.is_ipv6() && observed.is_ipv4() {
            return;
        }
    }
    let wg_port = local.endpoint.map(|e| e.port()).unwrap_or(shared.config.gossip_port);
    local.endpoint = Some(SocketAddr::new(observed.ip(), wg_port));
}

async fn handle_announce(shared: &Shared, payload: serde_json::Value, from: SocketAddr) -> DiscoveryResult<()> {
    let announce: crate::messages::AnnouncePayload =
        serde_json::from_value(payload).map_err(|e| DiscoveryError::Io(e.to_string()))?;
    let now = unix_now();
    let sender = peer_info_from_description(&announce.node, from, now)?;
    shared.store.update(sender, DiscoveryMethod::Gossip)?;
    store_known_peers(shared, &announce.known_peers, DiscoveryMethod::GossipTransitive, now);
    Ok(())
}

async fn handle_goodbye(shared: &Shared, payload: serde_json::Value, now: i64) -> DiscoveryResult<()> {
    let goodbye: GoodbyePayload = serde_json::from_value(payload).map_err(|e| DiscoveryError::Io(e.to_string()))?;
    if (now - goodbye.timestamp).abs() > 60 {
        return Err(DiscoveryError::Io("GOODBYE outside acceptance window".into()));
    }
    let pubkey_bytes = hex::decode(&goodbye.pubkey_hex).map_err(|_| DiscoveryError::Io("bad pubkey hex".into()))?;
    if pubkey_bytes.len() == 32 {
        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(&pubkey_bytes);
        shared.store.remove(&pubkey);
        info!(peer = %goodbye.pubkey_hex, "removed peer on GOODBYE");
    }
    Ok(())
}

async fn send_goodbye_to(shared: &Shared, addrs: &[SocketAddr]) {
    let payload = GoodbyePayload {
        pubkey_hex: hex::encode(shared.own_pubkey),
        timestamp: unix_now(),
    };
    let Ok(bytes) = seal_envelope(message_type::GOODBYE, &payload, &shared.gossip_key, unix_now()) else { return };
    for addr in addrs {
        let _ = shared.socket.send_to(&bytes, addr).await;
    }
}

async fn broadcast_goodbye(shared: &Shared) {
    let endpoints: Vec<SocketAddr> = shared
        .store
        .get_all()
        .into_iter()
        .filter_map(|p| p.endpoint)
        .collect();
    send_goodbye_to(shared, &endpoints).await;
}

/// Initiator side of introducer rendezvous: send `RENDEZVOUS_OFFER` to up to
/// three selected introducers.
async fn send_rendezvous_offer(
    shared: &Shared,
    target_pubkey: [u8; 32],
    candidates: Vec<SocketAddr>,
    introducers: Vec<SocketAddr>,
) {
    let pid = pair_id(&shared.own_pubkey, &target_pubkey);
    let payload = RendezvousOfferPayload {
        pair_id: pid,
        initiator_pubkey_hex: hex::encode(shared.own_pubkey),
        target_pubkey_hex: hex::encode(target_pubkey),
        candidates,
    };
    let Ok(bytes) = seal_envelope(message_type::RENDEZVOUS_OFFER, &payload, &shared.gossip_key, unix_now()) else {
        return;
    };
    for introducer in introducers.into_iter().take(MAX_RENDEZVOUS_INTRODUCERS) {
        let _ = shared.socket.send_to(&bytes, introducer).await;
    }
}

/// Introducer side: accumulate both offers for a pair, synthesising the
/// counterparty's offer from the peer store if it hasn't arrived yet.
async fn handle_rendezvous_offer(shared: &Shared, payload: serde_json::Value, from: SocketAddr) -> DiscoveryResult<()> {
    if !shared.config.introducer {
        return Ok(());
    }
    let offer: RendezvousOfferPayload =
        serde_json::from_value(payload).map_err(|e| DiscoveryError::Io(e.to_string()))?;
    let pid = offer.pair_id;
    let _ = from;

    {
        let mut offers = shared.introducer_offers.lock().expect("introducer_offers lock poisoned");
        evict_stale_offers(&mut offers, shared.config.rendezvous_offer_window);
        let entry = offers.entry(pid).or_insert_with(|| PendingOffer {
            initiator: None,
            target: None,
            first_seen: Instant::now(),
        });
        entry.initiator = Some(offer.clone());

        if entry.target.is_none() {
            if let Some(synth) = synthesize_counterpart_offer(shared, &offer) {
                entry.target = Some(synth);
            }
        }
    }

    try_complete_rendezvous(shared, pid).await;
    Ok(())
}

/// Drops pending offers older than `window` (section 4.G: "accumulate both
/// offers for 20 s"), so a synthesized counterpart offer built from a since-
/// moved peer-store endpoint can't sit around to be matched against an
/// unrelated later retry for the same pair.
fn evict_stale_offers(offers: &mut HashMap<u64, PendingOffer>, window: Duration) {
    let now = Instant::now();
    offers.retain(|_, offer| now.duration_since(offer.first_seen) <= window);
}

/// Builds a synthetic offer for the counterparty from the peer store, when
/// the counterparty's own `RENDEZVOUS_OFFER` has not yet reached us but we
/// already know its endpoint.
fn synthesize_counterpart_offer(shared: &Shared, offer: &RendezvousOfferPayload) -> Option<RendezvousOfferPayload> {
    let target_pubkey = hex::decode(&offer.target_pubkey_hex).ok()?;
    if target_pubkey.len() != 32 {
        return None;
    }
    let mut pk = [0u8; 32];
    pk.copy_from_slice(&target_pubkey);
    let peer = shared.store.get(&pk)?;
    let endpoint = peer.endpoint?;
    Some(RendezvousOfferPayload {
        pair_id: offer.pair_id,
        initiator_pubkey_hex: offer.target_pubkey_hex.clone(),
        target_pubkey_hex: offer.initiator_pubkey_hex.clone(),
        candidates: vec![endpoint],
    })
}

async fn try_complete_rendezvous(shared: &Shared, pid: u64) {
    let (initiator, target) = {
        let offers = shared.introducer_offers.lock().expect("introducer_offers lock poisoned");
        match offers.get(&pid) {
            Some(p) if p.initiator.is_some() && p.target.is_some() => {
                (p.initiator.clone().unwrap(), p.target.clone().unwrap())
            }
            _ => return,
        }
    };

    {
        let mut cooldowns = shared.introducer_cooldowns.lock().expect("introducer_cooldowns lock poisoned");
        if let Some(last) = cooldowns.get(&pid) {
            if last.elapsed() < shared.config.rendezvous_introducer_cooldown {
                return;
            }
        }
        cooldowns.insert(pid, Instant::now());
    }

    let start_at = unix_now() as u64 * 1000 + shared.config.rendezvous_start_offset.as_millis() as u64;

    let initiator_candidates = expand_candidates(&initiator.candidates);
    let target_candidates = expand_candidates(&target.candidates);

    let to_target = RendezvousStartPayload {
        pair_id: pid,
        start_at_unix_ms: start_at,
        candidates: initiator_candidates,
    };
    let to_initiator = RendezvousStartPayload {
        pair_id: pid,
        start_at_unix_ms: start_at,
        candidates: target_candidates,
    };

    if let (Ok(target_bytes), Ok(initiator_bytes)) = (
        seal_envelope(message_type::RENDEZVOUS_START, &to_target, &shared.gossip_key, unix_now()),
        seal_envelope(message_type::RENDEZVOUS_START, &to_initiator, &shared.gossip_key, unix_now()),
    ) {
        if let Some(addr) = target.candidates.first() {
            let _ = shared.socket.send_to(&target_bytes, addr).await;
        }
        if let Some(addr) = initiator.candidates.first() {
            let _ = shared.socket.send_to(&initiator_bytes, addr).await;
        }
    }
}

/// Expands each candidate address ±2 ports (5 per base) to cover
/// port-sequencing NATs, per section 4.G.
fn expand_candidates(candidates: &[SocketAddr]) -> Vec<SocketAddr> {
    let mut expanded = Vec::with_capacity(candidates.len() * (2 * PORT_EXPANSION_RADIUS as usize + 1));
    for addr in candidates {
        let base_port = addr.port();
        for delta in -(PORT_EXPANSION_RADIUS as i32)..=(PORT_EXPANSION_RADIUS as i32) {
            let Some(port) = base_port.checked_add_signed(delta as i16) else { continue };
            expanded.push(SocketAddr::new(addr.ip(), port));
        }
    }
    expanded
}

/// Participant side: on `RENDEZVOUS_START`, sleep until `startAt`, punch all
/// candidates, then wait for WG handshake growth.
async fn handle_rendezvous_start(shared: &Shared, payload: serde_json::Value) -> DiscoveryResult<()> {
    let start: RendezvousStartPayload =
        serde_json::from_value(payload).map_err(|e| DiscoveryError::Io(e.to_string()))?;
    let pid = start.pair_id;

    {
        let mut cooldowns = shared.participant_cooldowns.lock().expect("participant_cooldowns lock poisoned");
        if let Some(last) = cooldowns.get(&pid) {
            if last.elapsed() < shared.config.rendezvous_participant_cooldown {
                return Ok(());
            }
        }
        cooldowns.insert(pid, Instant::now());
    }

    let now_ms = unix_now() as u64 * 1000;
    if start.start_at_unix_ms > now_ms {
        tokio::time::sleep(Duration::from_millis(start.start_at_unix_ms - now_ms)).await;
    }

    let baseline = shared.wg.get_latest_handshakes(&shared.iface).await.unwrap_or_default();

    for candidate in &start.candidates {
        let _ = exchange_with_peer(shared, *candidate).await;
    }

    let deadline = tokio::time::Instant::now() + shared.config.rendezvous_punch_window;
    while tokio::time::Instant::now() < deadline {
        if let Ok(current) = shared.wg.get_latest_handshakes(&shared.iface).await {
            let improved = current.iter().any(|(pubkey, ts)| baseline.get(pubkey).map(|b| ts > b).unwrap_or(true));
            if improved {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_candidates_covers_radius() {
        let base: SocketAddr = "203.0.113.5:51820".parse().unwrap();
        let expanded = expand_candidates(&[base]);
        assert_eq!(expanded.len(), 5);
        assert!(expanded.contains(&"203.0.113.5:51818".parse().unwrap()));
        assert!(expanded.contains(&"203.0.113.5:51822".parse().unwrap()));
    }
}
