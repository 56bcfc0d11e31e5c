//! LAN multicast discovery (section 4.E).
//!
//! Separate sender and listener sockets, since several platforms will not
//! deliver a multicast datagram to the socket that sent it even with
//! `IP_MULTICAST_LOOP` enabled and we would rather not rely on it.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use wgmesh_core::{DiscoveryMethod, LocalNode, PeerInfo, PeerStore};
use wgmesh_crypto::envelope::{open_envelope_raw, seal_envelope};

use crate::error::DiscoveryResult;
use crate::messages::{message_type, AnnouncePayload, NodeDescription};

pub const LAN_MULTICAST_PORT: u16 = 51830;

pub fn multicast_group(multicast_id: [u8; 4]) -> Ipv4Addr {
    Ipv4Addr::new(239, 192, multicast_id[0], multicast_id[1])
}

pub async fn bind_sender() -> DiscoveryResult<UdpSocket> {
    Ok(UdpSocket::bind("0.0.0.0:0").await?)
}

pub async fn bind_listener(multicast_id: [u8; 4]) -> DiscoveryResult<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], LAN_MULTICAST_PORT))).await?;
    socket.join_multicast_v4(multicast_group(multicast_id), Ipv4Addr::UNSPECIFIED)?;
    Ok(socket)
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

/// Sends an `ANNOUNCE` to the mesh multicast group every `interval`, until
/// `shutdown` fires. `KnownPeers` is always empty here (section 4.E).
pub async fn run_announcer(
    socket: UdpSocket,
    multicast_id: [u8; 4],
    gossip_key: [u8; 32],
    gossip_port: u16,
    local: Arc<RwLock<LocalNode>>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let group = SocketAddrV4::new(multicast_group(multicast_id), LAN_MULTICAST_PORT);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
                continue;
            }
        }

        let node = describe(&*local.read().await, gossip_port);
        let payload = AnnouncePayload {
            node,
            known_peers: Vec::new(),
        };
        let now = wgmesh_core::unix_now();
        match seal_envelope(message_type::ANNOUNCE, &payload, &gossip_key, now) {
            Ok(bytes) => {
                if let Err(e) = socket.send_to(&bytes, group).await {
                    warn!(error = %e, "LAN announce send failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to seal LAN announce"),
        }
    }
}

/// Receives `ANNOUNCE`s from the multicast group and feeds the peer store
/// under [`DiscoveryMethod::Lan`].
pub async fn run_listener(
    socket: UdpSocket,
    gossip_key: [u8; 32],
    own_pubkey_hex: String,
    store: PeerStore,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; 4096];
    loop {
        let (n, from) = tokio::select! {
            res = socket.recv_from(&mut buf) => match res {
                Ok(v) => v,
                Err(e) => { warn!(error = %e, "LAN listener recv error"); continue; }
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
                continue;
            }
        };

        let now = wgmesh_core::unix_now();
        let opened = match open_envelope_raw(&buf[..n], &gossip_key, now) {
            Ok(o) if o.message_type == message_type::ANNOUNCE => o,
            Ok(_) => continue,
            Err(_) => {
                debug!("dropped undecodable LAN datagram");
                continue;
            }
        };
        let Ok(announce) = serde_json::from_value::<AnnouncePayload>(opened.payload) else {
            continue;
        };
        if announce.node.pubkey_hex == own_pubkey_hex {
            continue;
        }
        let Ok(pubkey) = hex::decode(&announce.node.pubkey_hex) else {
            continue;
        };
        if pubkey.len() != 32 {
            continue;
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&pubkey);

        let endpoint = resolve_endpoint(from, announce.node.gossip_port);

        let mut peer = PeerInfo::new(pk, announce.node.mesh_ipv4, now);
        peer.mesh_ipv6 = Some(announce.node.mesh_ipv6);
        peer.endpoint = Some(endpoint);
        peer.introducer = announce.node.introducer;
        peer.routable_networks = announce.node.routable_networks;
        peer.hostname = announce.node.hostname;
        peer.nat_type = announce.node.nat_type.parse().unwrap_or_default();
        peer.last_seen = now;

        if let Err(e) = store.update(peer, DiscoveryMethod::Lan) {
            debug!(error = %e, "LAN peer-store update rejected");
        }
    }
}

/// If the advertised endpoint port is present but the host part is the
/// unspecified address, substitute the datagram's actual source IP
/// (section 4.E: senders behind a non-reflective multicast setup cannot
/// know their own LAN-visible address).
fn resolve_endpoint(from: SocketAddr, gossip_port: u16) -> SocketAddr {
    SocketAddr::new(from.ip(), gossip_port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multicast_group_uses_239_192_prefix() {
        let group = multicast_group([7, 9, 0, 0]);
        assert_eq!(group, Ipv4Addr::new(239, 192, 7, 9));
    }

    #[test]
    fn resolve_endpoint_uses_source_ip_and_advertised_port() {
        let from: SocketAddr = "198.51.100.5:40000".parse().unwrap();
        let resolved = resolve_endpoint(from, 51821);
        assert_eq!(resolved, "198.51.100.5:51821".parse().unwrap());
    }
}
