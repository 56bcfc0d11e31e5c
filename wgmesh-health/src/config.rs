//! Tunables for both health signals (section 4.K).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Handshake/transfer check cadence (signal 1).
    pub handshake_check_interval_secs: u64,

    /// A handshake older than this, with no counter growth since last check,
    /// is stale.
    pub handshake_stale_secs: i64,

    /// TCP mesh probe cadence (signal 2).
    pub probe_interval_secs: u64,

    /// How long a probe waits for `pong\n` before counting as a failure.
    pub probe_timeout: Duration,

    /// Peers younger than this are exempt from probing unless relay-routed
    /// or already handshaken.
    pub probe_grace_secs: i64,

    /// Consecutive probe failures before eviction.
    pub probe_fail_threshold: u8,

    /// How long an evicted peer is excluded from reconcile/routes/probes.
    pub eviction_cooldown_secs: i64,

    /// Mesh-probe destination port (`GossipPort + 2000`).
    pub probe_port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            handshake_check_interval_secs: 20,
            handshake_stale_secs: 150,
            probe_interval_secs: 1,
            probe_timeout: Duration::from_millis(1200),
            probe_grace_secs: 45,
            probe_fail_threshold: 8,
            eviction_cooldown_secs: 30,
            probe_port: 53821,
        }
    }
}

impl HealthConfig {
    pub fn handshake_check_interval(&self) -> Duration {
        Duration::from_secs(self.handshake_check_interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn with_probe_port(probe_port: u16) -> Self {
        Self {
            probe_port,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_constants() {
        let config = HealthConfig::default();
        assert_eq!(config.handshake_check_interval_secs, 20);
        assert_eq!(config.handshake_stale_secs, 150);
        assert_eq!(config.probe_interval_secs, 1);
        assert_eq!(config.probe_timeout, Duration::from_millis(1200));
        assert_eq!(config.probe_grace_secs, 45);
        assert_eq!(config.probe_fail_threshold, 8);
        assert_eq!(config.eviction_cooldown_secs, 30);
    }
}
