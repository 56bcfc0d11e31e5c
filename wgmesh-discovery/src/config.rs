//! Tunables for the discovery stack: LAN multicast, STUN, peer exchange,
//! DHT and gossip intervals, plus the `--force-relay`/`--no-punching` flags
//! that section 4.J's relay decision and section 4.G's hole-punching both
//! read.

use std::time::Duration;

use crate::rate_limit::SourceRateLimitConfig;

/// Configuration for the discovery stack.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port shared by peer exchange and (at `gossip_port + 1`) the DHT.
    pub gossip_port: u16,

    /// LAN multicast announce interval (section 4.E).
    pub lan_announce_interval_secs: u64,

    /// How often to re-run STUN/IPv6 endpoint discovery (section 4.F/4.H).
    pub stun_refresh_interval_secs: u64,

    /// STUN query timeout before a query is considered failed.
    pub stun_timeout: Duration,

    /// HELLO retransmission interval while hole-punching (section 4.G).
    pub hole_punch_retransmit_interval: Duration,

    /// Total time to wait for a REPLY before `ExchangeWithPeer` gives up.
    pub exchange_timeout: Duration,

    /// How long an introducer accumulates both sides of a rendezvous offer.
    pub rendezvous_offer_window: Duration,

    /// Minimum spacing between rendezvous attempts for the same pair, as seen
    /// by an introducer.
    pub rendezvous_introducer_cooldown: Duration,

    /// Minimum spacing between rendezvous attempts for the same pair, as seen
    /// by a participant.
    pub rendezvous_participant_cooldown: Duration,

    /// Offset added to `now` when an introducer computes `startAt`.
    pub rendezvous_start_offset: Duration,

    /// How long a participant waits for a WG handshake after a synchronised
    /// punch before declaring the rendezvous a failure.
    pub rendezvous_punch_window: Duration,

    /// GOODBYE timestamp acceptance window.
    pub goodbye_window: Duration,

    /// DHT announce loop interval (section 4.H).
    pub dht_announce_interval_secs: u64,

    /// DHT query loop interval while fewer than `dht_query_slowdown_threshold`
    /// peers are known.
    pub dht_query_interval_secs: u64,

    /// DHT query loop interval once at least this many peers are known.
    pub dht_query_slowdown_interval_secs: u64,

    /// Peer count at which the DHT query loop slows down.
    pub dht_query_slowdown_threshold: usize,

    /// DHT routing table persistence interval.
    pub dht_persist_interval_secs: u64,

    /// Recency window for deduplicating DHT-returned addresses before
    /// attempting an exchange with them.
    pub dht_contact_recency_window: Duration,

    /// Transitive-connect reactor polling sweep interval.
    pub transitive_reactor_poll_interval_secs: u64,

    /// Width of the synchronised per-pair attempt slot, in seconds.
    pub transitive_reactor_slot_width_secs: i64,

    /// Period of the per-pair timing window, in seconds.
    pub transitive_reactor_slot_period_secs: i64,

    /// Initial transitive-connect backoff after a failed rendezvous.
    pub transitive_reactor_backoff_initial: Duration,

    /// Cap on transitive-connect exponential backoff.
    pub transitive_reactor_backoff_max: Duration,

    /// In-mesh gossip interval (section 4.I).
    pub gossip_interval_secs: u64,

    /// Bootstrap DHT router addresses (`host:port`), used in addition to the
    /// `mainline` crate's built-in defaults.
    pub dht_bootstrap_routers: Vec<String>,

    /// Whether this node advertises itself as willing to introduce
    /// rendezvous pairs.
    pub introducer: bool,

    /// `--no-punching`: disables HELLO retransmission during exchange
    /// regardless of `force_relay`.
    pub no_punching: bool,

    /// `--force-relay`: the reconciler always picks a relay route when a
    /// relay candidate exists, per section 4.J.
    pub force_relay: bool,

    /// Rate limiting applied to the shared peer-exchange/DHT socket.
    pub rate_limit: SourceRateLimitConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            gossip_port: 51821,
            lan_announce_interval_secs: 5,
            stun_refresh_interval_secs: 60,
            stun_timeout: Duration::from_secs(2),
            hole_punch_retransmit_interval: Duration::from_millis(100),
            exchange_timeout: Duration::from_secs(4),
            rendezvous_offer_window: Duration::from_secs(20),
            rendezvous_introducer_cooldown: Duration::from_secs(8),
            rendezvous_participant_cooldown: Duration::from_secs(6),
            rendezvous_start_offset: Duration::from_millis(1800),
            rendezvous_punch_window: Duration::from_secs(10),
            goodbye_window: Duration::from_secs(60),
            dht_announce_interval_secs: 15 * 60,
            dht_query_interval_secs: 30,
            dht_query_slowdown_interval_secs: 60,
            dht_query_slowdown_threshold: 3,
            dht_persist_interval_secs: 2 * 60,
            dht_contact_recency_window: Duration::from_secs(60),
            transitive_reactor_poll_interval_secs: 10,
            transitive_reactor_slot_width_secs: 4,
            transitive_reactor_slot_period_secs: 20,
            transitive_reactor_backoff_initial: Duration::from_secs(3),
            transitive_reactor_backoff_max: Duration::from_secs(30),
            gossip_interval_secs: 10,
            dht_bootstrap_routers: Vec::new(),
            introducer: false,
            no_punching: false,
            force_relay: false,
            rate_limit: SourceRateLimitConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn with_gossip_port(port: u16) -> Self {
        Self {
            gossip_port: port,
            ..Default::default()
        }
    }

    pub fn dht_port(&self) -> u16 {
        self.gossip_port + 1
    }

    pub fn tcp_probe_port(&self) -> u16 {
        self.gossip_port + 2000
    }

    pub fn lan_announce_interval(&self) -> Duration {
        Duration::from_secs(self.lan_announce_interval_secs)
    }

    pub fn stun_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.stun_refresh_interval_secs)
    }

    pub fn dht_announce_interval(&self) -> Duration {
        Duration::from_secs(self.dht_announce_interval_secs)
    }

    /// Current DHT query interval, accounting for the slowdown once enough
    /// peers are known.
    pub fn dht_query_interval(&self, known_peer_count: usize) -> Duration {
        if known_peer_count >= self.dht_query_slowdown_threshold {
            Duration::from_secs(self.dht_query_slowdown_interval_secs)
        } else {
            Duration::from_secs(self.dht_query_interval_secs)
        }
    }

    pub fn dht_persist_interval(&self) -> Duration {
        Duration::from_secs(self.dht_persist_interval_secs)
    }

    pub fn transitive_reactor_poll_interval(&self) -> Duration {
        Duration::from_secs(self.transitive_reactor_poll_interval_secs)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_secs(self.gossip_interval_secs)
    }

    /// Whether a pair should attempt a transitive-connect rendezvous in the
    /// current time slot, per section 4.H's pair-based timing window.
    pub fn in_transitive_reactor_slot(&self, now_unix: i64, pair_fnv_mod_period: i64) -> bool {
        let period = self.transitive_reactor_slot_period_secs;
        let phase = now_unix.rem_euclid(period) - pair_fnv_mod_period;
        phase >= 0 && phase < self.transitive_reactor_slot_width_secs
    }
}

/// Builder for [`DiscoveryConfig`].
#[derive(Debug, Default)]
pub struct DiscoveryConfigBuilder {
    config: DiscoveryConfig,
}

impl DiscoveryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gossip_port(mut self, port: u16) -> Self {
        self.config.gossip_port = port;
        self
    }

    pub fn introducer(mut self, introducer: bool) -> Self {
        self.config.introducer = introducer;
        self
    }

    pub fn no_punching(mut self, no_punching: bool) -> Self {
        self.config.no_punching = no_punching;
        self
    }

    pub fn force_relay(mut self, force_relay: bool) -> Self {
        self.config.force_relay = force_relay;
        self
    }

    pub fn dht_bootstrap_routers(mut self, routers: Vec<String>) -> Self {
        self.config.dht_bootstrap_routers = routers;
        self
    }

    pub fn rate_limit(mut self, rate_limit: SourceRateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn build(self) -> DiscoveryConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.gossip_port, 51821);
        assert_eq!(config.dht_port(), 51822);
        assert_eq!(config.tcp_probe_port(), 53821);
        assert_eq!(config.lan_announce_interval(), Duration::from_secs(5));
        assert_eq!(config.dht_announce_interval(), Duration::from_secs(900));
        assert!(!config.introducer);
        assert!(!config.no_punching);
        assert!(!config.force_relay);
    }

    #[test]
    fn dht_query_interval_slows_down_once_peers_known() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.dht_query_interval(0), Duration::from_secs(30));
        assert_eq!(config.dht_query_interval(2), Duration::from_secs(30));
        assert_eq!(config.dht_query_interval(3), Duration::from_secs(60));
        assert_eq!(config.dht_query_interval(10), Duration::from_secs(60));
    }

    #[test]
    fn builder_overrides_flags() {
        let config = DiscoveryConfigBuilder::new()
            .introducer(true)
            .no_punching(true)
            .force_relay(true)
            .gossip_port(52000)
            .build();
        assert!(config.introducer);
        assert!(config.no_punching);
        assert!(config.force_relay);
        assert_eq!(config.gossip_port, 52000);
    }

    #[test]
    fn transitive_reactor_slot_matches_pair_window() {
        let config = DiscoveryConfig::default();
        // pair_fnv_mod_period = 5: slot is [5, 9) within each 20s period.
        assert!(!config.in_transitive_reactor_slot(104, 5));
        assert!(config.in_transitive_reactor_slot(105, 5));
        assert!(config.in_transitive_reactor_slot(108, 5));
        assert!(!config.in_transitive_reactor_slot(109, 5));
    }
}
