//! Per-peer liveness bookkeeping and the two pure decision functions that
//! turn a raw reading into an action (section 4.K).

/// What the caller should do in response to one signal reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Nothing to do; the peer looks alive.
    None,
    /// First consecutive stale reading: re-issue `SetPeer` and clear the
    /// reconciler's signature cache so the endpoint is retried.
    ForceReconnect,
    /// Second consecutive stale reading, or probe-failure threshold reached:
    /// remove the peer.
    Evict,
}

/// Tracks one peer's consecutive-failure counters across both signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerHealthState {
    pub consecutive_stale_handshake: u8,
    pub probe_failures: u8,
    pub last_handshake_seen: Option<i64>,
    pub first_seen: i64,
}

impl PeerHealthState {
    pub fn new(now: i64) -> Self {
        PeerHealthState {
            first_seen: now,
            ..Default::default()
        }
    }
}

/// `true` iff `now - last_handshake > stale_secs` and the transfer counters
/// have not grown since the previous reading — counter growth means the
/// tunnel is carrying traffic regardless of how old the last handshake is.
pub fn handshake_is_stale(
    now: i64,
    last_handshake: Option<i64>,
    current_transfer: (u64, u64),
    previous_transfer: (u64, u64),
    stale_secs: i64,
) -> bool {
    let age_stale = match last_handshake {
        Some(ts) => now - ts > stale_secs,
        None => true,
    };
    let counters_grew = current_transfer.0 + current_transfer.1 > previous_transfer.0 + previous_transfer.1;
    age_stale && !counters_grew
}

/// Signal 1: folds one handshake/transfer reading into `state`.
pub fn decide_handshake_signal(state: &mut PeerHealthState, now: i64, is_stale: bool, handshake_ts: Option<i64>) -> HealthAction {
    let fresh_handshake = match (handshake_ts, state.last_handshake_seen) {
        (Some(new_ts), Some(old_ts)) => new_ts > old_ts,
        (Some(_), None) => true,
        _ => false,
    };
    if handshake_ts.is_some() {
        state.last_handshake_seen = handshake_ts;
    }
    if fresh_handshake {
        state.probe_failures = 0;
    }

    if !is_stale {
        state.consecutive_stale_handshake = 0;
        return HealthAction::None;
    }

    state.consecutive_stale_handshake = state.consecutive_stale_handshake.saturating_add(1);
    let _ = now;
    match state.consecutive_stale_handshake {
        1 => HealthAction::ForceReconnect,
        _ => HealthAction::Evict,
    }
}

/// Signal 2: folds one TCP probe outcome into `state`.
pub fn decide_probe_signal(state: &mut PeerHealthState, success: bool, fail_threshold: u8) -> HealthAction {
    if success {
        state.probe_failures = 0;
        return HealthAction::None;
    }
    state.probe_failures = state.probe_failures.saturating_add(1);
    if state.probe_failures >= fail_threshold {
        HealthAction::Evict
    } else {
        HealthAction::None
    }
}

/// Whether signal 2 should run at all for this peer yet: peers younger than
/// the grace period are exempt unless relay-routed or already handshaken.
pub fn probe_is_due(now: i64, first_seen: i64, grace_secs: i64, relay_routed: bool, has_handshaken: bool) -> bool {
    relay_routed || has_handshaken || now - first_seen >= grace_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_requires_both_age_and_no_counter_growth() {
        assert!(handshake_is_stale(1000, Some(0), (10, 10), (10, 10), 150));
        assert!(!handshake_is_stale(1000, Some(0), (50, 50), (10, 10), 150));
        assert!(!handshake_is_stale(100, Some(90), (10, 10), (10, 10), 150));
    }

    #[test]
    fn no_handshake_ever_is_stale() {
        assert!(handshake_is_stale(1000, None, (0, 0), (0, 0), 150));
    }

    #[test]
    fn first_stale_reading_forces_reconnect_second_evicts() {
        let mut state = PeerHealthState::new(0);
        assert_eq!(decide_handshake_signal(&mut state, 100, true, None), HealthAction::ForceReconnect);
        assert_eq!(decide_handshake_signal(&mut state, 120, true, None), HealthAction::Evict);
    }

    #[test]
    fn non_stale_reading_resets_counter() {
        let mut state = PeerHealthState::new(0);
        decide_handshake_signal(&mut state, 100, true, None);
        assert_eq!(decide_handshake_signal(&mut state, 120, false, Some(119)), HealthAction::None);
        assert_eq!(state.consecutive_stale_handshake, 0);
    }

    #[test]
    fn fresh_handshake_clears_probe_failures() {
        let mut state = PeerHealthState::new(0);
        state.probe_failures = 5;
        state.last_handshake_seen = Some(10);
        decide_handshake_signal(&mut state, 20, false, Some(20));
        assert_eq!(state.probe_failures, 0);
    }

    #[test]
    fn probe_threshold_evicts_after_eight_failures() {
        let mut state = PeerHealthState::new(0);
        for _ in 0..7 {
            assert_eq!(decide_probe_signal(&mut state, false, 8), HealthAction::None);
        }
        assert_eq!(decide_probe_signal(&mut state, false, 8), HealthAction::Evict);
    }

    #[test]
    fn probe_success_resets_failures() {
        let mut state = PeerHealthState::new(0);
        state.probe_failures = 7;
        assert_eq!(decide_probe_signal(&mut state, true, 8), HealthAction::None);
        assert_eq!(state.probe_failures, 0);
    }

    #[test]
    fn young_peer_is_exempt_unless_relay_routed_or_handshaken() {
        assert!(!probe_is_due(10, 0, 45, false, false));
        assert!(probe_is_due(10, 0, 45, true, false));
        assert!(probe_is_due(10, 0, 45, false, true));
        assert!(probe_is_due(50, 0, 45, false, false));
    }
}
