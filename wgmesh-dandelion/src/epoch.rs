//! Epoch-based relay set rotation (section 4.L).
//!
//! Every epoch, `HMAC(EpochSeed, epochID)` seeds a deterministic shuffle over
//! all known peers sorted by public key; the first two become this node's
//! stem relays for the epoch. Any two nodes with the same epoch seed and the
//! same peer set pick the same relays without exchanging anything.

use hmac::{Hmac, Mac};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// One rotation of the relay set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epoch {
    pub epoch_id: u64,
    pub relays: Vec<[u8; 32]>,
}

fn epoch_rng_seed(epoch_seed: &[u8; 32], epoch_id: u64) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(epoch_seed).expect("HMAC accepts any key length");
    mac.update(&epoch_id.to_be_bytes());
    mac.finalize().into_bytes().into()
}

/// Selects this epoch's stem relays: the first two entries of a
/// deterministic Fisher-Yates shuffle over `peers` sorted by public key.
/// Returns fewer than two relays if there aren't enough peers yet.
pub fn select_relays(epoch_seed: &[u8; 32], epoch_id: u64, peers: &[[u8; 32]]) -> Epoch {
    let mut sorted: Vec<[u8; 32]> = peers.to_vec();
    sorted.sort_unstable();

    let seed = epoch_rng_seed(epoch_seed, epoch_id);
    let mut rng = ChaCha8Rng::from_seed(seed);
    sorted.shuffle(&mut rng);
    sorted.truncate(2);

    Epoch {
        epoch_id,
        relays: sorted,
    }
}

/// Maps a unix timestamp to its 10-minute epoch id.
pub fn epoch_id_for(unix_seconds: i64, epoch_secs: u64) -> u64 {
    (unix_seconds.max(0) as u64) / epoch_secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peers(n: u8) -> Vec<[u8; 32]> {
        (0..n).map(|i| [i; 32]).collect()
    }

    #[test]
    fn deterministic_for_same_seed_and_epoch() {
        let seed = [7u8; 32];
        let a = select_relays(&seed, 42, &peers(6));
        let b = select_relays(&seed, 42, &peers(6));
        assert_eq!(a, b);
    }

    #[test]
    fn order_of_input_peers_does_not_matter() {
        let seed = [7u8; 32];
        let mut reversed = peers(6);
        reversed.reverse();
        let a = select_relays(&seed, 42, &peers(6));
        let b = select_relays(&seed, 42, &reversed);
        assert_eq!(a, b);
    }

    #[test]
    fn different_epoch_ids_usually_differ() {
        let seed = [7u8; 32];
        let a = select_relays(&seed, 1, &peers(10));
        let b = select_relays(&seed, 2, &peers(10));
        assert_ne!(a.relays, b.relays);
    }

    #[test]
    fn picks_at_most_two_relays() {
        let seed = [1u8; 32];
        let epoch = select_relays(&seed, 1, &peers(10));
        assert_eq!(epoch.relays.len(), 2);
        let epoch = select_relays(&seed, 1, &peers(1));
        assert_eq!(epoch.relays.len(), 1);
        let epoch = select_relays(&seed, 1, &[]);
        assert!(epoch.relays.is_empty());
    }

    #[test]
    fn epoch_id_buckets_by_interval() {
        assert_eq!(epoch_id_for(0, 600), 0);
        assert_eq!(epoch_id_for(599, 600), 0);
        assert_eq!(epoch_id_for(600, 600), 1);
    }
}
