//! Wires LAN discovery, STUN, peer exchange, the DHT and in-mesh gossip into
//! a single service with one shutdown handle.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::info;

use wgmesh_core::{LocalNode, PeerStore};
use wgmesh_crypto::DerivedKeys;
use wgmesh_netctl::WireGuardControl;

use crate::config::DiscoveryConfig;
use crate::dht::{self, DhtHandle};
use crate::error::DiscoveryResult;
use crate::exchange::{self, ExchangeHandle};
use crate::gossip::{self, GossipHandle};
use crate::lan;

/// Everything needed to stand up the discovery stack for one running node.
pub struct DiscoveryServiceConfig {
    pub secret: String,
    pub keys: DerivedKeys,
    pub own_pubkey: [u8; 32],
    pub local: Arc<RwLock<LocalNode>>,
    pub store: PeerStore,
    pub config: DiscoveryConfig,
    pub wg: Arc<dyn WireGuardControl>,
    pub iface: String,
    pub stun_servers: (SocketAddr, SocketAddr),
    /// `true` runs in-mesh gossip on its own socket; `false` delegates sends
    /// through the peer-exchange server (section 4.I's two sender modes).
    pub standalone_gossip: bool,
    /// When `Some`, inbound `DANDELION_STEM` datagrams are forwarded here
    /// instead of being dropped as an unknown message type (section 4.L).
    pub dandelion_sink: Option<tokio::sync::mpsc::Sender<Vec<u8>>>,
}

/// Handle to every running discovery subsystem. Dropping this without
/// calling [`DiscoveryService::shutdown`] leaves the background tasks
/// running; they are only torn down on an explicit shutdown.
pub struct DiscoveryService {
    lan_shutdown: watch::Sender<bool>,
    exchange: ExchangeHandle,
    dht: DhtHandle,
    gossip: GossipHandle,
}

impl DiscoveryService {
    /// Binds every socket the discovery stack needs and spawns its
    /// background tasks.
    pub async fn start(cfg: DiscoveryServiceConfig) -> DiscoveryResult<Self> {
        let (lan_shutdown_tx, lan_shutdown_rx) = watch::channel(false);

        let lan_sender_socket = lan::bind_sender().await?;
        let lan_listener_socket = lan::bind_listener(cfg.keys.multicast_id).await?;
        tokio::spawn(lan::run_announcer(
            lan_sender_socket,
            cfg.keys.multicast_id,
            cfg.keys.gossip_key,
            cfg.config.gossip_port,
            cfg.local.clone(),
            cfg.config.lan_announce_interval(),
            lan_shutdown_rx.clone(),
        ));
        tokio::spawn(lan::run_listener(
            lan_listener_socket,
            cfg.keys.gossip_key,
            hex::encode(cfg.own_pubkey),
            cfg.store.clone(),
            lan_shutdown_rx,
        ));
        info!(port = lan::LAN_MULTICAST_PORT, "LAN discovery started");

        let exchange_socket = tokio::net::UdpSocket::bind(("0.0.0.0", cfg.config.gossip_port)).await?;
        let exchange = exchange::spawn(
            exchange_socket,
            cfg.keys.gossip_key,
            cfg.own_pubkey,
            cfg.local.clone(),
            cfg.store.clone(),
            cfg.config.clone(),
            cfg.wg.clone(),
            cfg.iface.clone(),
            cfg.dandelion_sink.clone(),
        );
        info!(port = cfg.config.gossip_port, "peer-exchange server started");

        let stun_socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        let dht = dht::spawn(
            cfg.secret.clone(),
            cfg.own_pubkey,
            cfg.local.clone(),
            cfg.store.clone(),
            cfg.config.clone(),
            exchange.clone(),
            stun_socket,
            cfg.stun_servers,
        )?;
        info!(port = cfg.config.dht_port(), "DHT discovery started");

        let gossip = if cfg.standalone_gossip {
            // Distinct from both the exchange socket (`gossip_port`) and the
            // DHT (`gossip_port + 1`): ANNOUNCE here still advertises
            // `gossip_port` as the contact port for exchange/DHT purposes.
            let standalone_port = cfg.config.gossip_port + 2;
            let gossip_socket = tokio::net::UdpSocket::bind(("0.0.0.0", standalone_port)).await?;
            gossip::spawn_standalone(
                gossip_socket,
                cfg.keys.gossip_key,
                cfg.own_pubkey,
                standalone_port,
                standalone_port,
                cfg.local.clone(),
                cfg.store.clone(),
                &cfg.config,
            )
        } else {
            gossip::spawn_integrated(
                exchange.clone(),
                cfg.keys.gossip_key,
                cfg.own_pubkey,
                cfg.config.gossip_port,
                cfg.local.clone(),
                cfg.store.clone(),
                &cfg.config,
            )
        };
        info!("in-mesh gossip started");

        Ok(DiscoveryService {
            lan_shutdown: lan_shutdown_tx,
            exchange,
            dht,
            gossip,
        })
    }

    pub fn exchange_handle(&self) -> ExchangeHandle {
        self.exchange.clone()
    }

    pub async fn shutdown(&self) -> DiscoveryResult<()> {
        let _ = self.lan_shutdown.send(true);
        self.gossip.shutdown().await?;
        self.dht.shutdown().await?;
        self.exchange.shutdown().await?;
        Ok(())
    }
}
