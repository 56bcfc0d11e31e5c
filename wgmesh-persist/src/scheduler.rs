//! Background snapshot cadence for the peer cache and DHT bootstrap file
//! (section 4.N): peer cache every 5 minutes, DHT nodes every 2 minutes,
//! both plus a final write on shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use wgmesh_core::PeerStore;

use crate::dht_cache::save_dht_nodes;
use crate::paths::PersistPaths;
use crate::peer_cache::save_peer_cache;

const PEER_CACHE_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DHT_NODES_INTERVAL: Duration = Duration::from_secs(2 * 60);

enum PersistCommand {
    Shutdown(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct PersistHandle {
    command_tx: mpsc::Sender<PersistCommand>,
}

impl PersistHandle {
    /// Requests a final snapshot write and waits for it to complete.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(PersistCommand::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// Spawns the periodic snapshot task. `dht_nodes` is polled fresh on every
/// DHT-nodes tick since the routing table changes continuously.
pub fn spawn(paths: PersistPaths, store: PeerStore, dht_nodes: impl Fn() -> Vec<SocketAddr> + Send + Sync + 'static) -> PersistHandle {
    let (command_tx, command_rx) = mpsc::channel(4);
    tokio::spawn(run(paths, store, dht_nodes, command_rx));
    PersistHandle { command_tx }
}

async fn run(
    paths: PersistPaths,
    store: PeerStore,
    dht_nodes: impl Fn() -> Vec<SocketAddr> + Send + Sync + 'static,
    mut commands: mpsc::Receiver<PersistCommand>,
) {
    let mut peer_ticker = tokio::time::interval(PEER_CACHE_INTERVAL);
    let mut dht_ticker = tokio::time::interval(DHT_NODES_INTERVAL);

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(PersistCommand::Shutdown(ack)) => {
                        snapshot_peer_cache(&paths, &store);
                        snapshot_dht_nodes(&paths, &dht_nodes);
                        let _ = ack.send(());
                        return;
                    }
                    None => {
                        snapshot_peer_cache(&paths, &store);
                        snapshot_dht_nodes(&paths, &dht_nodes);
                        return;
                    }
                }
            }
            _ = peer_ticker.tick() => snapshot_peer_cache(&paths, &store),
            _ = dht_ticker.tick() => snapshot_dht_nodes(&paths, &dht_nodes),
        }
    }
}

fn snapshot_peer_cache(paths: &PersistPaths, store: &PeerStore) {
    let peers = store.get_all();
    if let Err(e) = save_peer_cache(&paths.peer_cache(), &peers) {
        warn!(error = %e, "failed to write peer cache snapshot");
    } else {
        debug!(count = peers.len(), "wrote peer cache snapshot");
    }
}

fn snapshot_dht_nodes(paths: &PersistPaths, dht_nodes: &impl Fn() -> Vec<SocketAddr>) {
    let nodes = dht_nodes();
    if let Err(e) = save_dht_nodes(&paths.dht_nodes(), &nodes) {
        warn!(error = %e, "failed to write DHT node snapshot");
    } else {
        debug!(count = nodes.len(), "wrote DHT node snapshot");
    }
}
