//! Per-source-IP rate limiting for the peer-exchange UDP socket.
//!
//! Section 4.G requires inbound datagrams to be rate-limited *before*
//! decryption, so a CPU-flood attempt can't burn AES-GCM cycles on an
//! attacker's behalf. There is no connection here to drop: UDP has no
//! session state, so a source that keeps tripping the limiter earns a
//! temporary ban window during which every datagram from its IP is
//! dropped unopened, rather than anything resembling a "disconnect".
//! Tracking is keyed by source IP only (not full socket address) so a
//! NAT'd attacker can't evade the limiter by varying the source port.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Configuration for per-source-IP rate limiting on the peer-exchange socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRateLimitConfig {
    /// Maximum messages per second per source IP before throttling.
    pub max_messages_per_second: u32,

    /// Maximum messages in the burst window before throttling.
    pub burst_limit: u32,

    /// Burst window duration in milliseconds.
    pub burst_window_ms: u64,

    /// Number of rate limit violations within `burst_window_ms` before the
    /// source IP is banned outright.
    pub ban_threshold: u32,

    /// How long a banned source IP is dropped unopened before it can send
    /// again.
    pub ban_duration_secs: u64,

    /// Whether rate limiting is enabled.
    pub enabled: bool,
}

impl Default for SourceRateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages_per_second: 20,
            burst_limit: 60,
            burst_window_ms: 5000,
            ban_threshold: 5,
            ban_duration_secs: 60,
            enabled: true,
        }
    }
}

/// Sliding-window state for a single source IP.
#[derive(Debug, Clone)]
pub struct SourceRateState {
    /// Timestamps of recent messages within the burst window.
    message_times: Vec<Instant>,
    /// Number of rate limit violations since the last reset.
    violations: u32,
    /// If set, datagrams from this source are dropped unopened until this
    /// instant.
    banned_until: Option<Instant>,
}

impl Default for SourceRateState {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRateState {
    /// Creates fresh tracking state for a source IP seen for the first time.
    pub fn new() -> Self {
        Self {
            message_times: Vec::with_capacity(32),
            violations: 0,
            banned_until: None,
        }
    }

    /// Number of violations recorded since the last ban expired.
    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Whether this source is currently within its ban window.
    pub fn is_banned(&self, now: Instant) -> bool {
        self.banned_until.is_some_and(|until| now < until)
    }

    /// Records a datagram and decides whether it may proceed to decryption.
    /// A banned source is rejected without touching the sliding window so
    /// the ban window doesn't get quietly extended by the flood that
    /// triggered it.
    pub fn record_message(&mut self, config: &SourceRateLimitConfig) -> RateLimitResult {
        let now = Instant::now();

        if self.is_banned(now) {
            return RateLimitResult::Banned {
                remaining: self.banned_until.unwrap() - now,
            };
        }
        self.banned_until = None;

        let window = Duration::from_millis(config.burst_window_ms);
        self.message_times.retain(|t| now.duration_since(*t) < window);

        let one_second_ago = now - Duration::from_secs(1);
        let recent_count = self.message_times.iter().filter(|t| **t > one_second_ago).count();

        if self.message_times.len() >= config.burst_limit as usize || recent_count >= config.max_messages_per_second as usize {
            self.violations = self.violations.saturating_add(1);
            if self.violations >= config.ban_threshold {
                let remaining = Duration::from_secs(config.ban_duration_secs);
                self.banned_until = Some(now + remaining);
                return RateLimitResult::Banned { remaining };
            }
            return RateLimitResult::RateLimited {
                violations: self.violations,
                remaining: config.ban_threshold - self.violations,
            };
        }

        self.message_times.push(now);
        RateLimitResult::Allowed
    }

    /// Messages recorded within `window` of now.
    pub fn current_message_count(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.message_times.iter().filter(|t| now.duration_since(**t) < window).count()
    }
}

/// Per-source-IP rate limiter for the peer-exchange socket.
#[derive(Debug)]
pub struct SourceRateLimiter {
    config: SourceRateLimitConfig,
    sources: HashMap<IpAddr, SourceRateState>,
}

impl SourceRateLimiter {
    /// Creates a new rate limiter with the given configuration.
    pub fn new(config: SourceRateLimitConfig) -> Self {
        Self {
            config,
            sources: HashMap::new(),
        }
    }

    /// Whether rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Records a datagram from `source` and returns whether it should be
    /// passed on to decryption.
    pub fn record_message(&mut self, source: &IpAddr) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed;
        }
        self.sources.entry(*source).or_default().record_message(&self.config)
    }

    /// Statistics for a source IP, if any datagram has been seen from it.
    pub fn get_source_stats(&self, source: &IpAddr) -> Option<SourceRateStats> {
        self.sources.get(source).map(|state| {
            let window = Duration::from_millis(self.config.burst_window_ms);
            SourceRateStats {
                violations: state.violations(),
                messages_in_window: state.current_message_count(window),
                banned: state.is_banned(Instant::now()),
            }
        })
    }

    /// Drops tracking state for sources that have been both quiet and
    /// well-behaved for a while, so the map doesn't grow unbounded over the
    /// life of the process.
    pub fn cleanup_stale_sources(&mut self) {
        let window = Duration::from_millis(self.config.burst_window_ms * 10);
        let now = Instant::now();
        self.sources
            .retain(|_, state| state.is_banned(now) || state.current_message_count(window) > 0 || state.violations > 0);
    }

    /// Total number of source IPs currently tracked.
    pub fn tracked_source_count(&self) -> usize {
        self.sources.len()
    }
}

/// Result of a rate limit check for one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Datagram is allowed through to decryption.
    Allowed,
    /// Datagram is dropped; the source has not yet crossed the ban
    /// threshold.
    RateLimited {
        /// Current number of violations.
        violations: u32,
        /// Remaining violations before a ban.
        remaining: u32,
    },
    /// Datagram is dropped unopened; the source is within its ban window.
    Banned {
        /// Time left before this source may send again.
        remaining: Duration,
    },
}

impl RateLimitResult {
    /// Whether the datagram is allowed through.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed)
    }

    /// Whether the source is currently banned.
    pub fn is_banned(&self) -> bool {
        matches!(self, RateLimitResult::Banned { .. })
    }
}

/// Snapshot of a source IP's rate limiting state.
#[derive(Debug, Clone)]
pub struct SourceRateStats {
    /// Number of rate limit violations since the last ban expired.
    pub violations: u32,
    /// Messages seen in the current burst window.
    pub messages_in_window: usize,
    /// Whether this source is currently banned.
    pub banned: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SourceRateLimitConfig {
        SourceRateLimitConfig {
            max_messages_per_second: 5,
            burst_limit: 20,
            burst_window_ms: 1000,
            ban_threshold: 3,
            ban_duration_secs: 60,
            enabled: true,
        }
    }

    #[test]
    fn allows_normal_traffic_then_rate_limits() {
        let config = test_config();
        let mut state = SourceRateState::new();

        for _ in 0..5 {
            assert_eq!(state.record_message(&config), RateLimitResult::Allowed);
        }

        let result = state.record_message(&config);
        assert!(matches!(result, RateLimitResult::RateLimited { violations: 1, .. }));
    }

    #[test]
    fn burst_limit_triggers_before_per_second_limit() {
        let mut config = test_config();
        config.max_messages_per_second = 100;
        config.burst_limit = 10;

        let mut state = SourceRateState::new();
        for _ in 0..10 {
            assert_eq!(state.record_message(&config), RateLimitResult::Allowed);
        }

        let result = state.record_message(&config);
        assert!(matches!(result, RateLimitResult::RateLimited { violations: 1, .. }));
    }

    #[test]
    fn repeated_violations_escalate_to_a_ban() {
        let config = test_config();
        let mut state = SourceRateState::new();

        for round in 0..config.ban_threshold {
            for _ in 0..config.max_messages_per_second {
                state.record_message(&config);
            }
            let result = state.record_message(&config);
            if round + 1 < config.ban_threshold {
                assert!(matches!(result, RateLimitResult::RateLimited { .. }));
            } else {
                assert!(result.is_banned());
            }
        }

        assert!(state.is_banned(Instant::now()));
    }

    #[test]
    fn banned_source_is_rejected_without_touching_the_window() {
        let config = test_config();
        let mut state = SourceRateState::new();
        state.violations = config.ban_threshold;
        state.banned_until = Some(Instant::now() + Duration::from_secs(60));

        let before = state.message_times.len();
        let result = state.record_message(&config);
        assert!(result.is_banned());
        assert_eq!(state.message_times.len(), before);
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let mut config = test_config();
        config.enabled = false;

        let mut limiter = SourceRateLimiter::new(config);
        let source = IpAddr::from([127, 0, 0, 1]);

        for _ in 0..100 {
            assert!(limiter.record_message(&source).is_allowed());
        }
    }

    #[test]
    fn stats_report_current_violations_and_ban_state() {
        let config = test_config();
        let mut limiter = SourceRateLimiter::new(config);
        let source = IpAddr::from([127, 0, 0, 1]);

        limiter.record_message(&source);
        let stats = limiter.get_source_stats(&source).unwrap();
        assert_eq!(stats.violations, 0);
        assert!(!stats.banned);
    }

    #[test]
    fn cleanup_drops_quiet_well_behaved_sources_only() {
        let config = test_config();
        let mut limiter = SourceRateLimiter::new(config);
        let quiet = IpAddr::from([10, 0, 0, 1]);
        limiter.record_message(&quiet);

        limiter.sources.get_mut(&quiet).unwrap().message_times.clear();
        limiter.cleanup_stale_sources();
        assert_eq!(limiter.tracked_source_count(), 0);
    }
}
