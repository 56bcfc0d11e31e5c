//! The relay decision and relay-selection rules from section 4.J.

use std::hash::Hasher;

use fnv::FnvHasher;

/// Everything the relay decision needs about one candidate peer, already
/// resolved by the caller from the peer store and WireGuard state — kept a
/// plain data struct so the decision itself stays a pure function.
#[derive(Debug, Clone, Copy)]
pub struct RelayDecisionInput {
    pub local_is_introducer: bool,
    pub target_is_introducer: bool,
    pub target_discovered_via_lan: bool,
    pub target_endpoint_on_local_subnet: bool,
    pub target_endpoint_is_ipv6: bool,
    pub relay_candidate_exists: bool,
    pub force_relay: bool,
    pub both_sides_symmetric: bool,
    pub peer_only_transitive: bool,
    pub seconds_since_handshake: Option<i64>,
    pub handshake_stale_secs: i64,
    pub ipv6_disabled: bool,
}

/// `true` when the reconciler should route this peer through a relay
/// instead of attempting a direct WireGuard endpoint.
pub fn should_relay(input: &RelayDecisionInput) -> bool {
    if input.target_endpoint_is_ipv6 && !input.ipv6_disabled {
        return false;
    }

    let eligible = !input.local_is_introducer
        && !input.target_is_introducer
        && !input.target_discovered_via_lan
        && !input.target_endpoint_on_local_subnet
        && input.relay_candidate_exists;
    if !eligible {
        return false;
    }

    if input.force_relay || input.both_sides_symmetric {
        return true;
    }

    let handshake_stale = match input.seconds_since_handshake {
        Some(age) => age > input.handshake_stale_secs,
        None => false,
    };
    if handshake_stale && (input.both_sides_symmetric || input.peer_only_transitive) {
        return true;
    }

    input.seconds_since_handshake.is_none() && input.peer_only_transitive
}

/// Deterministically picks one relay from a set of candidates: both ends of
/// a pair sort the same candidate list and index into it with
/// `FNV(local_pub ‖ 0 ‖ peer_pub) mod len`, so the choice is stable across
/// reconcile cycles without any coordination.
pub fn pick_relay(candidates: &[[u8; 32]], local_pub: &[u8; 32], peer_pub: &[u8; 32]) -> Option<[u8; 32]> {
    if candidates.is_empty() {
        return None;
    }
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable();

    let mut hasher = FnvHasher::default();
    hasher.write(local_pub);
    hasher.write(&[0u8]);
    hasher.write(peer_pub);
    let index = (hasher.finish() % sorted.len() as u64) as usize;
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> RelayDecisionInput {
        RelayDecisionInput {
            local_is_introducer: false,
            target_is_introducer: false,
            target_discovered_via_lan: false,
            target_endpoint_on_local_subnet: false,
            target_endpoint_is_ipv6: false,
            relay_candidate_exists: true,
            force_relay: false,
            both_sides_symmetric: false,
            peer_only_transitive: false,
            seconds_since_handshake: Some(10),
            handshake_stale_secs: 150,
            ipv6_disabled: false,
        }
    }

    #[test]
    fn direct_by_default_with_fresh_handshake() {
        assert!(!should_relay(&base_input()));
    }

    #[test]
    fn force_relay_overrides() {
        let input = RelayDecisionInput {
            force_relay: true,
            ..base_input()
        };
        assert!(should_relay(&input));
    }

    #[test]
    fn ipv6_endpoint_is_never_relayed_unless_disabled() {
        let input = RelayDecisionInput {
            target_endpoint_is_ipv6: true,
            force_relay: true,
            ..base_input()
        };
        assert!(!should_relay(&input));

        let input_disabled = RelayDecisionInput {
            ipv6_disabled: true,
            ..input
        };
        assert!(should_relay(&input_disabled));
    }

    #[test]
    fn introducer_is_never_relayed() {
        let input = RelayDecisionInput {
            local_is_introducer: true,
            force_relay: true,
            ..base_input()
        };
        assert!(!should_relay(&input));
    }

    #[test]
    fn no_candidate_means_no_relay() {
        let input = RelayDecisionInput {
            relay_candidate_exists: false,
            force_relay: true,
            ..base_input()
        };
        assert!(!should_relay(&input));
    }

    #[test]
    fn stale_handshake_with_symmetric_nat_relays() {
        let input = RelayDecisionInput {
            seconds_since_handshake: Some(200),
            both_sides_symmetric: true,
            ..base_input()
        };
        assert!(should_relay(&input));
    }

    #[test]
    fn stale_handshake_with_only_transitive_peer_relays() {
        let input = RelayDecisionInput {
            seconds_since_handshake: Some(200),
            peer_only_transitive: true,
            ..base_input()
        };
        assert!(should_relay(&input));
    }

    #[test]
    fn no_handshake_yet_and_transitive_only_relays() {
        let input = RelayDecisionInput {
            seconds_since_handshake: None,
            peer_only_transitive: true,
            ..base_input()
        };
        assert!(should_relay(&input));
    }

    #[test]
    fn no_handshake_yet_but_direct_peer_does_not_relay() {
        let input = RelayDecisionInput {
            seconds_since_handshake: None,
            peer_only_transitive: false,
            ..base_input()
        };
        assert!(!should_relay(&input));
    }

    #[test]
    fn pick_relay_is_deterministic_and_order_independent_on_input_order() {
        let local = [1u8; 32];
        let peer = [2u8; 32];
        let mut candidates = vec![[3u8; 32], [5u8; 32], [4u8; 32]];
        let a = pick_relay(&candidates, &local, &peer);
        candidates.reverse();
        let b = pick_relay(&candidates, &local, &peer);
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn pick_relay_empty_candidates_is_none() {
        assert_eq!(pick_relay(&[], &[1; 32], &[2; 32]), None);
    }
}
