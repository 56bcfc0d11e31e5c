//! Stem/fluff routing for mesh announcements (section 4.L).
//!
//! The router is transport-agnostic: stem delivery and fluff delivery are
//! injected as a [`DandelionTransport`], so this module knows nothing about
//! UDP sockets, tunnels, or the DHT. That mirrors how [`crate::gossip`]'s
//! [`wgmesh_discovery::gossip::AnnounceSender`] keeps the announce ticker
//! ignorant of which socket it's writing to.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::config::DandelionConfig;
use crate::epoch::{epoch_id_for, select_relays, Epoch};
use crate::error::DandelionResult;
use crate::message::DandelionEnvelope;

/// Where a routed announcement ends up: forwarded one more stem hop to a
/// single relay, or handed to the normal broadcast path.
#[async_trait]
pub trait DandelionTransport: Send + Sync {
    /// Forward `envelope` one more hop to `relay` over the existing tunnel.
    async fn stem(&self, relay: [u8; 32], envelope: DandelionEnvelope) -> DandelionResult<()>;
    /// Hand the payload to the normal broadcast path (DHT announce + gossip).
    async fn fluff(&self, payload: Vec<u8>) -> DandelionResult<()>;
}

pub enum DandelionCommand {
    Originate(Vec<u8>),
    Receive(DandelionEnvelope),
    Shutdown,
}

#[derive(Clone)]
pub struct DandelionHandle {
    command_tx: mpsc::Sender<DandelionCommand>,
}

impl DandelionHandle {
    /// Wraps a payload as a fresh hop-0 announcement and routes it.
    pub async fn originate(&self, payload: Vec<u8>) -> DandelionResult<()> {
        self.command_tx
            .send(DandelionCommand::Originate(payload))
            .await
            .map_err(|_| crate::error::DandelionError::Transport("router task gone".into()))
    }

    /// Routes an envelope received from a stem neighbour.
    pub async fn receive(&self, envelope: DandelionEnvelope) -> DandelionResult<()> {
        self.command_tx
            .send(DandelionCommand::Receive(envelope))
            .await
            .map_err(|_| crate::error::DandelionError::Transport("router task gone".into()))
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(DandelionCommand::Shutdown).await;
    }
}

/// `true` if `hop ≥ hop_cap`, else true with `fluff_probability` chance.
/// Fails safe: any hop at or past the cap always fluffs.
pub fn should_fluff(hop: u8, hop_cap: u8, fluff_probability: f64, rng: &mut impl Rng) -> bool {
    if hop >= hop_cap {
        return true;
    }
    rng.gen_bool(fluff_probability.clamp(0.0, 1.0))
}

/// Spawns the router task: owns the current epoch's relay set, rotates it on
/// a ticker, and processes originate/receive commands as they arrive.
pub fn spawn(
    local_pubkey: [u8; 32],
    epoch_seed: [u8; 32],
    peers_fn: impl Fn() -> Vec<[u8; 32]> + Send + Sync + 'static,
    transport: Arc<dyn DandelionTransport>,
    config: DandelionConfig,
) -> DandelionHandle {
    let (command_tx, command_rx) = mpsc::channel(32);
    tokio::spawn(run(local_pubkey, epoch_seed, peers_fn, transport, config, command_rx));
    DandelionHandle { command_tx }
}

async fn run(
    local_pubkey: [u8; 32],
    epoch_seed: [u8; 32],
    peers_fn: impl Fn() -> Vec<[u8; 32]> + Send + Sync + 'static,
    transport: Arc<dyn DandelionTransport>,
    config: DandelionConfig,
    mut commands: mpsc::Receiver<DandelionCommand>,
) {
    let now = wgmesh_core::unix_now();
    let epoch_id = epoch_id_for(now, config.epoch_secs);
    let epoch = Arc::new(RwLock::new(select_relays(&epoch_seed, epoch_id, &peers_fn())));

    let mut ticker = tokio::time::interval(epoch_rotation_tick(&config));
    ticker.tick().await; // first tick fires immediately; consume it

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(DandelionCommand::Originate(payload)) => {
                        let envelope = DandelionEnvelope::originate(payload);
                        route(&epoch, &transport, &config, local_pubkey, envelope).await;
                    }
                    Some(DandelionCommand::Receive(envelope)) => {
                        let bumped = envelope.with_incremented_hop();
                        route(&epoch, &transport, &config, local_pubkey, bumped).await;
                    }
                    Some(DandelionCommand::Shutdown) | None => return,
                }
            }
            _ = ticker.tick() => {
                let now = wgmesh_core::unix_now();
                let epoch_id = epoch_id_for(now, config.epoch_secs);
                let next = select_relays(&epoch_seed, epoch_id, &peers_fn());
                debug!(epoch_id, relays = next.relays.len(), "dandelion epoch rotated");
                *epoch.write().await = next;
            }
        }
    }
}

fn epoch_rotation_tick(config: &DandelionConfig) -> Duration {
    // Check for rotation well inside the epoch window so a late-starting
    // node doesn't wait a full epoch before picking up its first relay set.
    Duration::from_secs((config.epoch_secs / 10).max(1))
}

async fn route(
    epoch: &Arc<RwLock<Epoch>>,
    transport: &Arc<dyn DandelionTransport>,
    config: &DandelionConfig,
    local_pubkey: [u8; 32],
    envelope: DandelionEnvelope,
) {
    let hop = envelope.hop_count.min(config.hop_cap);
    let fluff = should_fluff(hop, config.hop_cap, config.fluff_probability, &mut rand::thread_rng());

    if fluff {
        if let Err(e) = transport.fluff(envelope.payload).await {
            warn!(error = %e, "dandelion fluff delivery failed");
        }
        return;
    }

    let relays = epoch.read().await.relays.clone();
    if relays.is_empty() {
        // No relays known yet; fail safe to fluff rather than drop the
        // announcement on the floor.
        if let Err(e) = transport.fluff(envelope.payload).await {
            warn!(error = %e, "dandelion fallback fluff delivery failed");
        }
        return;
    }

    let relay = relays[(hop as usize) % relays.len()];
    if relay == local_pubkey {
        // Stemming to ourselves would loop forever; fluff instead.
        if let Err(e) = transport.fluff(envelope.payload).await {
            warn!(error = %e, "dandelion self-relay fluff delivery failed");
        }
        return;
    }

    if let Err(e) = transport.stem(relay, envelope).await {
        warn!(error = %e, peer = %hex::encode(relay), "dandelion stem forward failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use std::sync::Mutex;

    #[test]
    fn hop_at_or_past_cap_always_fluffs() {
        let mut rng = StepRng::new(u64::MAX, 0);
        assert!(should_fluff(4, 4, 0.10, &mut rng));
        assert!(should_fluff(10, 4, 0.10, &mut rng));
    }

    #[test]
    fn below_cap_is_probabilistic() {
        let mut always_low = StepRng::new(0, 0);
        assert!(should_fluff(0, 4, 1.0, &mut always_low));
        let mut always_high = StepRng::new(u64::MAX, 0);
        assert!(!should_fluff(0, 4, 0.0, &mut always_high));
    }

    struct RecordingTransport {
        stems: Mutex<Vec<([u8; 32], u8)>>,
        fluffs: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            RecordingTransport {
                stems: Mutex::new(Vec::new()),
                fluffs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DandelionTransport for RecordingTransport {
        async fn stem(&self, relay: [u8; 32], envelope: DandelionEnvelope) -> DandelionResult<()> {
            self.stems.lock().unwrap().push((relay, envelope.hop_count));
            Ok(())
        }

        async fn fluff(&self, payload: Vec<u8>) -> DandelionResult<()> {
            self.fluffs.lock().unwrap().push(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn hop_cap_forces_fluff_regardless_of_relay_set() {
        let epoch = Arc::new(RwLock::new(Epoch {
            epoch_id: 0,
            relays: vec![[9u8; 32]],
        }));
        let transport = Arc::new(RecordingTransport::new());
        let config = DandelionConfig::default();
        let envelope = DandelionEnvelope {
            nonce: [0; 16],
            hop_count: 4,
            payload: b"payload".to_vec(),
        };
        route(&epoch, &(transport.clone() as Arc<dyn DandelionTransport>), &config, [1; 32], envelope).await;
        assert_eq!(transport.fluffs.lock().unwrap().len(), 1);
        assert!(transport.stems.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_relay_set_falls_back_to_fluff() {
        let epoch = Arc::new(RwLock::new(Epoch {
            epoch_id: 0,
            relays: vec![],
        }));
        let transport = Arc::new(RecordingTransport::new());
        let mut config = DandelionConfig::default();
        config.fluff_probability = 0.0;
        let envelope = DandelionEnvelope::originate(b"payload".to_vec());
        route(&epoch, &(transport.clone() as Arc<dyn DandelionTransport>), &config, [1; 32], envelope).await;
        assert_eq!(transport.fluffs.lock().unwrap().len(), 1);
    }
}
