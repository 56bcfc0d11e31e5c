//! Tunables for the reconciler's relay decision and cycle cadence.

use std::time::Duration;

/// Configuration for the reconciler (section 4.J).
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Reconcile cycle interval.
    pub reconcile_interval_secs: u64,

    /// Window within which an introducer must have been seen with a known
    /// endpoint to count as a relay candidate.
    pub relay_candidate_window_secs: i64,

    /// A handshake older than this, combined with a NAT/transitive
    /// condition, makes the relay decision prefer relaying.
    pub handshake_stale_secs: i64,

    /// `--force-relay`: always relay when a candidate exists.
    pub force_relay: bool,

    /// Disables preferring a peer's IPv6 endpoint over relaying.
    pub ipv6_disabled: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 5,
            relay_candidate_window_secs: 90,
            handshake_stale_secs: 150,
            force_relay: false,
            ipv6_disabled: false,
        }
    }
}

impl ReconcileConfig {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

/// Builder for [`ReconcileConfig`].
#[derive(Debug, Default)]
pub struct ReconcileConfigBuilder {
    config: ReconcileConfig,
}

impl ReconcileConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_relay(mut self, force_relay: bool) -> Self {
        self.config.force_relay = force_relay;
        self
    }

    pub fn ipv6_disabled(mut self, ipv6_disabled: bool) -> Self {
        self.config.ipv6_disabled = ipv6_disabled;
        self
    }

    pub fn reconcile_interval_secs(mut self, secs: u64) -> Self {
        self.config.reconcile_interval_secs = secs;
        self
    }

    pub fn build(self) -> ReconcileConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let config = ReconcileConfig::default();
        assert_eq!(config.reconcile_interval_secs, 5);
        assert_eq!(config.relay_candidate_window_secs, 90);
        assert_eq!(config.handshake_stale_secs, 150);
        assert!(!config.force_relay);
    }

    #[test]
    fn builder_overrides_force_relay() {
        let config = ReconcileConfigBuilder::new().force_relay(true).build();
        assert!(config.force_relay);
    }
}
