//! [`wgmesh_dandelion::DandelionTransport`] backed by the peer-exchange
//! socket (section 4.L). Stem hops are sealed as `DANDELION_STEM` datagrams
//! addressed directly at the relay; fluffed payloads are already full
//! `ANNOUNCE` datagrams and go out unicast to every currently active peer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use wgmesh_core::PeerStore;
use wgmesh_dandelion::{DandelionEnvelope, DandelionError, DandelionResult, DandelionTransport};
use wgmesh_discovery::exchange::ExchangeHandle;
use wgmesh_discovery::messages::message_type;

/// Wraps the running peer-exchange server as a Dandelion++ transport.
pub struct ExchangeDandelionTransport {
    exchange: ExchangeHandle,
    store: PeerStore,
    gossip_key: [u8; 32],
}

impl ExchangeDandelionTransport {
    pub fn new(exchange: ExchangeHandle, store: PeerStore, gossip_key: [u8; 32]) -> Self {
        ExchangeDandelionTransport {
            exchange,
            store,
            gossip_key,
        }
    }
}

#[async_trait]
impl DandelionTransport for ExchangeDandelionTransport {
    async fn stem(&self, relay: [u8; 32], envelope: DandelionEnvelope) -> DandelionResult<()> {
        let Some(relay_peer) = self.store.get(&relay) else {
            return Err(DandelionError::Transport("relay has no known peer entry".into()));
        };
        let Some(relay_endpoint) = relay_peer.endpoint else {
            return Err(DandelionError::Transport("relay has no reachable endpoint".into()));
        };

        let now = wgmesh_core::unix_now();
        let sealed = wgmesh_crypto::envelope::seal_envelope(
            message_type::DANDELION_STEM,
            &envelope,
            &self.gossip_key,
            now,
        )
        .map_err(|e| DandelionError::Transport(e.to_string()))?;

        self.exchange
            .send_raw(relay_endpoint, sealed)
            .await
            .map_err(|e| DandelionError::Transport(e.to_string()))
    }

    async fn fluff(&self, payload: Vec<u8>) -> DandelionResult<()> {
        let mut last_err = None;
        let mut sent = 0;
        for peer in self.store.get_active() {
            let Some(endpoint) = peer.endpoint else { continue };
            if let Err(e) = self.exchange.send_raw(endpoint, payload.clone()).await {
                warn!(pubkey = %hex::encode(peer.pubkey), error = %e, "fluff send failed");
                last_err = Some(e);
            } else {
                sent += 1;
            }
        }
        if sent == 0 {
            if let Some(e) = last_err {
                return Err(DandelionError::Transport(e.to_string()));
            }
        }
        Ok(())
    }
}

/// Drains inbound `DANDELION_STEM` forwards from the exchange server into
/// the router. Runs until the channel closes (exchange server shutdown).
pub async fn run_stem_receiver(
    mut sink_rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
    dandelion: Arc<wgmesh_dandelion::DandelionHandle>,
) {
    while let Some(bytes) = sink_rx.recv().await {
        let envelope: DandelionEnvelope = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to decode forwarded dandelion stem");
                continue;
            }
        };
        if let Err(e) = dandelion.receive(envelope).await {
            warn!(error = %e, "dandelion router rejected forwarded stem");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use wgmesh_core::{LocalNode, NatType};
    use wgmesh_discovery::config::DiscoveryConfig;
    use wgmesh_netctl::executor::RecordingExecutor;
    use wgmesh_netctl::wgctl::KernelWireGuardControl;

    fn local_node() -> LocalNode {
        LocalNode {
            pubkey: [1u8; 32],
            privkey: [2u8; 32],
            mesh_ipv4: "10.0.0.1".parse().unwrap(),
            mesh_ipv6: "fd00::1".parse().unwrap(),
            endpoint: None,
            nat_type: NatType::Unknown,
            routable_networks: Vec::new(),
            introducer: false,
            hostname: "test".into(),
        }
    }

    async fn transport() -> ExchangeDandelionTransport {
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let store = PeerStore::new();
        let wg = Arc::new(KernelWireGuardControl::new(Arc::new(RecordingExecutor::new())));
        let exchange = wgmesh_discovery::exchange::spawn(
            socket,
            [0u8; 32],
            [9u8; 32],
            Arc::new(RwLock::new(local_node())),
            store.clone(),
            DiscoveryConfig::default(),
            wg,
            "wgmesh-test".into(),
            None,
        );
        ExchangeDandelionTransport::new(exchange, store, [0u8; 32])
    }

    #[tokio::test]
    async fn fluff_with_no_active_peers_succeeds_trivially() {
        let t = transport().await;
        assert!(t.fluff(vec![1, 2, 3]).await.is_ok());
    }

    #[tokio::test]
    async fn stem_to_unknown_relay_fails() {
        let t = transport().await;
        let envelope = DandelionEnvelope::originate(vec![4, 5, 6]);
        let result = t.stem([7u8; 32], envelope).await;
        assert!(result.is_err());
    }
}
