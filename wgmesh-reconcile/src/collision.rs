//! Mesh-IP collision detection and resolution (section 4.M).
//!
//! Two peers can independently derive the same mesh IPv4 address (a
//! birthday-bound hash collision, or a restored cache entry racing a fresh
//! derivation). Resolution is symmetric: every node computes the same
//! winner/loser assignment from the same inputs, so no coordination is
//! needed.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use wgmesh_core::PeerInfo;

/// One detected (meshIP, two differing pubkeys) collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub mesh_ip: Ipv4Addr,
    /// Lexicographically-lower pubkey: keeps the address.
    pub winner: [u8; 32],
    /// Lexicographically-higher pubkey: must re-derive.
    pub loser: [u8; 32],
}

/// Scans the peer set (including the local node's own address, passed in as
/// a synthetic [`PeerInfo`] by the caller) for shared-address collisions.
pub fn detect_collisions(peers: &[PeerInfo]) -> Vec<Collision> {
    let mut by_ip: HashMap<Ipv4Addr, Vec<[u8; 32]>> = HashMap::new();
    for peer in peers {
        if peer.mesh_ipv4.is_unspecified() {
            continue;
        }
        by_ip.entry(peer.mesh_ipv4).or_default().push(peer.pubkey);
    }

    let mut collisions = Vec::new();
    for (mesh_ip, mut pubkeys) in by_ip {
        if pubkeys.len() < 2 {
            continue;
        }
        pubkeys.sort_unstable();
        pubkeys.dedup();
        if pubkeys.len() < 2 {
            continue;
        }
        let winner = pubkeys[0];
        for loser in pubkeys.into_iter().skip(1) {
            collisions.push(Collision { mesh_ip, winner, loser });
        }
    }
    collisions
}

/// Resolution outcome for one collision, from the perspective of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionOutcome {
    /// This node lost and must reconfigure its own interface address to `new_ip`.
    ReconfigureLocal { new_ip: Ipv4Addr },
    /// A remote peer lost; it is expected to self-correct to `new_ip` on its
    /// own next reconcile tick.
    ExpectRemote { loser: [u8; 32], new_ip: Ipv4Addr },
}

/// Resolves one collision from `local_pubkey`'s point of view, re-deriving
/// the loser's address with an incrementing nonce via
/// [`wgmesh_crypto::derive_mesh_ipv4_with_nonce`] until it no longer
/// collides with `taken`.
///
/// Every node in the mesh that observes a given collision computes the same
/// `new_ip` for the loser from the same inputs: only whether *this* node
/// happens to be the loser changes what it does about it.
pub fn resolve(
    collision: &Collision,
    local_pubkey: &[u8; 32],
    secret: &str,
    taken: &[Ipv4Addr],
    derive: impl Fn(&str, &[u8], u32) -> Ipv4Addr,
) -> CollisionOutcome {
    let mut nonce = 1u32;
    let new_ip = loop {
        let candidate = derive(secret, loser_pubkey(collision), nonce);
        if !taken.contains(&candidate) {
            break candidate;
        }
        nonce += 1;
    };

    if &collision.loser == local_pubkey {
        CollisionOutcome::ReconfigureLocal { new_ip }
    } else {
        CollisionOutcome::ExpectRemote {
            loser: collision.loser,
            new_ip,
        }
    }
}

fn loser_pubkey(collision: &Collision) -> &[u8] {
    &collision.loser
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_core::unix_now;

    fn peer(pubkey: [u8; 32], ip: &str) -> PeerInfo {
        PeerInfo::new(pubkey, ip.parse().unwrap(), unix_now())
    }

    #[test]
    fn detects_shared_ip_with_lower_pubkey_as_winner() {
        let peers = vec![peer([2; 32], "10.66.0.5"), peer([1; 32], "10.66.0.5")];
        let collisions = detect_collisions(&peers);
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].winner, [1; 32]);
        assert_eq!(collisions[0].loser, [2; 32]);
    }

    #[test]
    fn no_collision_when_addresses_differ() {
        let peers = vec![peer([1; 32], "10.66.0.5"), peer([2; 32], "10.66.0.6")];
        assert!(detect_collisions(&peers).is_empty());
    }

    #[test]
    fn local_loser_reconfigures_with_a_fresh_address() {
        let collision = Collision {
            mesh_ip: "10.66.0.5".parse().unwrap(),
            winner: [1; 32],
            loser: [2; 32],
        };
        let outcome = resolve(&collision, &[2; 32], "secret", &[], |_secret, _pub, nonce| {
            Ipv4Addr::new(10, 66, 0, 10 + nonce as u8)
        });
        assert_eq!(outcome, CollisionOutcome::ReconfigureLocal { new_ip: "10.66.0.11".parse().unwrap() });
    }

    #[test]
    fn remote_loser_is_only_recorded_as_expected() {
        let collision = Collision {
            mesh_ip: "10.66.0.5".parse().unwrap(),
            winner: [1; 32],
            loser: [2; 32],
        };
        let outcome = resolve(&collision, &[1; 32], "secret", &[], |_secret, _pub, nonce| {
            Ipv4Addr::new(10, 66, 0, 10 + nonce as u8)
        });
        assert_eq!(
            outcome,
            CollisionOutcome::ExpectRemote {
                loser: [2; 32],
                new_ip: "10.66.0.11".parse().unwrap()
            }
        );
    }

    #[test]
    fn skips_already_taken_candidate_addresses() {
        let collision = Collision {
            mesh_ip: "10.66.0.5".parse().unwrap(),
            winner: [1; 32],
            loser: [2; 32],
        };
        let taken = vec!["10.66.0.11".parse().unwrap()];
        let outcome = resolve(&collision, &[2; 32], "secret", &taken, |_secret, _pub, nonce| {
            Ipv4Addr::new(10, 66, 0, 10 + nonce as u8)
        });
        assert_eq!(outcome, CollisionOutcome::ReconfigureLocal { new_ip: "10.66.0.12".parse().unwrap() });
    }
}
