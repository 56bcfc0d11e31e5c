//! Deterministic key schedule derived from the single shared secret.

use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

const MIN_SECRET_LEN: usize = 16;
const PROTOCOL_INFO_GOSSIP: &[u8] = b"wgmesh-gossip-v1";
const PROTOCOL_INFO_SUBNET: &[u8] = b"wgmesh-subnet-v1";
const PROTOCOL_INFO_IPV6_PREFIX: &[u8] = b"wgmesh-ipv6-prefix-v1";
const PROTOCOL_INFO_MCAST: &[u8] = b"wgmesh-mcast-v1";
const PROTOCOL_INFO_WG_PSK: &[u8] = b"wgmesh-wg-psk-v1";
const PROTOCOL_INFO_GOSSIP_PORT: &[u8] = b"wgmesh-gossip-port-v1";
const PROTOCOL_INFO_MEMBERSHIP: &[u8] = b"wgmesh-membership-v1";
const PROTOCOL_INFO_EPOCH: &[u8] = b"wgmesh-epoch-v1";

const GOSSIP_PORT_BASE: u16 = 51821;
const GOSSIP_PORT_SPAN: u16 = 1000;

/// All cryptographic parameters deterministically derived from the shared secret.
///
/// Every field is a pure function of the secret; two nodes that share the same
/// secret always compute byte-identical values, which is the entire basis of
/// zero-configuration membership.
#[derive(Clone, ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub network_id: [u8; 20],
    pub gossip_key: [u8; 32],
    pub mesh_subnet: [u8; 2],
    pub mesh_prefix_v6: [u8; 8],
    pub multicast_id: [u8; 4],
    pub psk: [u8; 32],
    pub gossip_port: u16,
    pub rendezvous_id: [u8; 8],
    pub membership_key: [u8; 32],
    pub epoch_seed: [u8; 32],
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("network_id", &hex::encode(self.network_id))
            .field("mesh_subnet", &self.mesh_subnet)
            .field("gossip_port", &self.gossip_port)
            .field("rendezvous_id", &hex::encode(self.rendezvous_id))
            .finish_non_exhaustive()
    }
}

fn hkdf_expand(secret: &[u8], info: &[u8], out: &mut [u8]) -> CryptoResult<()> {
    let hk = Hkdf::<Sha256>::new(None, secret);
    hk.expand(info, out)
        .map_err(|_| CryptoError::Serialization("hkdf expand length invalid".into()))
}

/// Derive the full key schedule from a shared secret.
///
/// Pure and deterministic: calling this twice with the same secret yields
/// byte-identical [`DerivedKeys`] (testable property #1).
pub fn derive_keys(secret: &str) -> CryptoResult<DerivedKeys> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(CryptoError::SecretTooShort {
            min: MIN_SECRET_LEN,
            actual: secret.len(),
        });
    }
    let secret_bytes = secret.as_bytes();

    let network_id: [u8; 20] = {
        let digest = Sha256::digest(secret_bytes);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[0..20]);
        out
    };

    let mut gossip_key = [0u8; 32];
    hkdf_expand(secret_bytes, PROTOCOL_INFO_GOSSIP, &mut gossip_key)?;

    let mut mesh_subnet = [0u8; 2];
    hkdf_expand(secret_bytes, PROTOCOL_INFO_SUBNET, &mut mesh_subnet)?;

    let mut ipv6_tail = [0u8; 7];
    hkdf_expand(secret_bytes, PROTOCOL_INFO_IPV6_PREFIX, &mut ipv6_tail)?;
    let mut mesh_prefix_v6 = [0u8; 8];
    mesh_prefix_v6[0] = 0xfd;
    mesh_prefix_v6[1..8].copy_from_slice(&ipv6_tail);

    let mut multicast_id = [0u8; 4];
    hkdf_expand(secret_bytes, PROTOCOL_INFO_MCAST, &mut multicast_id)?;

    let mut psk = [0u8; 32];
    hkdf_expand(secret_bytes, PROTOCOL_INFO_WG_PSK, &mut psk)?;

    let mut port_bytes = [0u8; 2];
    hkdf_expand(secret_bytes, PROTOCOL_INFO_GOSSIP_PORT, &mut port_bytes)?;
    let port_seed = u16::from_be_bytes(port_bytes);
    let gossip_port = GOSSIP_PORT_BASE + (port_seed % GOSSIP_PORT_SPAN);

    let rendezvous_id: [u8; 8] = {
        let mut hasher = Sha256::new();
        hasher.update(secret_bytes);
        hasher.update(b"rv");
        let digest = hasher.finalize();
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[0..8]);
        out
    };

    let mut membership_key = [0u8; 32];
    hkdf_expand(secret_bytes, PROTOCOL_INFO_MEMBERSHIP, &mut membership_key)?;

    let mut epoch_seed = [0u8; 32];
    hkdf_expand(secret_bytes, PROTOCOL_INFO_EPOCH, &mut epoch_seed)?;

    Ok(DerivedKeys {
        network_id,
        gossip_key,
        mesh_subnet,
        mesh_prefix_v6,
        multicast_id,
        psk,
        gossip_port,
        rendezvous_id,
        membership_key,
        epoch_seed,
    })
}

/// Compute the hourly-rotating DHT infohash for a given unix timestamp.
///
/// `NetworkID_t = SHA256(secret || be64(floor(unix/3600)))[0:20]`. Nodes announce
/// under the current hour and query under the current and previous hour during
/// the rollover minute so in-flight peers are never stranded mid-transition.
pub fn rotating_network_id(secret: &str, unix_seconds: i64) -> [u8; 20] {
    let hour = (unix_seconds.max(0) as u64) / 3600;
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(hour.to_be_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[0..20]);
    out
}

/// The current and, during the edge minutes of an hour, previous rotating network IDs.
pub fn active_network_ids(secret: &str, unix_seconds: i64) -> Vec<[u8; 20]> {
    let current = rotating_network_id(secret, unix_seconds);
    let seconds_into_hour = unix_seconds.max(0) as u64 % 3600;
    if seconds_into_hour < 60 || seconds_into_hour >= 3540 {
        let previous = rotating_network_id(secret, unix_seconds - 3600);
        vec![current, previous]
    } else {
        vec![current]
    }
}

/// Derive this node's mesh IPv4 address from its WireGuard public key.
///
/// `10.meshSubnet[0].(hash[0] xor meshSubnet[1]).clamp(hash[1], 1, 254)`
pub fn derive_mesh_ipv4(keys: &DerivedKeys, secret: &str, pubkey: &[u8]) -> std::net::Ipv4Addr {
    let mut hasher = Sha256::new();
    hasher.update(pubkey);
    hasher.update(secret.as_bytes());
    let hash = hasher.finalize();

    let octet2 = hash[0] ^ keys.mesh_subnet[1];
    let mut octet3 = hash[1];
    if octet3 == 0 {
        octet3 = 1;
    } else if octet3 == 255 {
        octet3 = 254;
    }
    std::net::Ipv4Addr::new(10, keys.mesh_subnet[0], octet2, octet3)
}

/// Derive this node's mesh IPv6 address (a ULA /64 suffix keyed on pubkey+secret).
pub fn derive_mesh_ipv6(keys: &DerivedKeys, secret: &str, pubkey: &[u8]) -> std::net::Ipv6Addr {
    let mut hasher = Sha256::new();
    hasher.update(pubkey);
    hasher.update(b"|");
    hasher.update(secret.as_bytes());
    hasher.update(b"|ipv6");
    let digest = hasher.finalize();

    let mut suffix = [0u8; 8];
    suffix.copy_from_slice(&digest[0..8]);
    // Flip the universal/local bit (RFC 4291 modified EUI-64 convention) so the
    // interface identifier looks like a locally administered one.
    suffix[0] ^= 0x02;

    let mut segments = [0u16; 8];
    for i in 0..4 {
        segments[i] = u16::from_be_bytes([keys.mesh_prefix_v6[i * 2], keys.mesh_prefix_v6[i * 2 + 1]]);
    }
    for i in 0..4 {
        segments[4 + i] = u16::from_be_bytes([suffix[i * 2], suffix[i * 2 + 1]]);
    }
    std::net::Ipv6Addr::new(
        segments[0], segments[1], segments[2], segments[3], segments[4], segments[5], segments[6],
        segments[7],
    )
}

/// Re-derive a mesh IPv4 address with a disambiguating nonce appended, used by
/// the collision resolver when two peers land on the same address.
pub fn derive_mesh_ipv4_with_nonce(
    keys: &DerivedKeys,
    secret: &str,
    pubkey: &[u8],
    nonce: u32,
) -> std::net::Ipv4Addr {
    let mut salted_secret = secret.to_string();
    salted_secret.push_str(&format!("|collision-{nonce}"));
    let result = derive_mesh_ipv4(keys, &salted_secret, pubkey);
    salted_secret.zeroize();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "wgmesh-test-secret-long-enough-for-key-derivation";

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_keys(SECRET).unwrap();
        let b = derive_keys(SECRET).unwrap();
        assert_eq!(a.network_id, b.network_id);
        assert_eq!(a.gossip_key, b.gossip_key);
        assert_eq!(a.mesh_subnet, b.mesh_subnet);
        assert_eq!(a.gossip_port, b.gossip_port);
    }

    #[test]
    fn secret_too_short_is_rejected() {
        let err = derive_keys("short").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Permanent);
    }

    #[test]
    fn gossip_port_in_range() {
        let keys = derive_keys(SECRET).unwrap();
        assert!((51821..=52820).contains(&keys.gossip_port));
    }

    #[test]
    fn mesh_subnet_first_octet_is_ten_by_construction() {
        let keys = derive_keys(SECRET).unwrap();
        let ip = derive_mesh_ipv4(&keys, SECRET, &[1u8; 32]);
        assert_eq!(ip.octets()[0], 10);
        assert_eq!(ip.octets()[1], keys.mesh_subnet[0]);
    }

    #[test]
    fn mesh_ipv4_stable_under_repeated_calls() {
        let keys = derive_keys(SECRET).unwrap();
        let a = derive_mesh_ipv4(&keys, SECRET, &[7u8; 32]);
        let b = derive_mesh_ipv4(&keys, SECRET, &[7u8; 32]);
        assert_eq!(a, b);
    }

    #[test]
    fn collision_nonce_changes_the_address() {
        let keys = derive_keys(SECRET).unwrap();
        let base = derive_mesh_ipv4(&keys, SECRET, &[9u8; 32]);
        let bumped = derive_mesh_ipv4_with_nonce(&keys, SECRET, &[9u8; 32], 1);
        assert_ne!(base, bumped);
    }

    #[test]
    fn active_network_ids_includes_previous_hour_near_boundary() {
        let just_after_hour = 3600 * 5 + 10;
        let ids = active_network_ids(SECRET, just_after_hour);
        assert_eq!(ids.len(), 2);

        let mid_hour = 3600 * 5 + 1800;
        let ids = active_network_ids(SECRET, mid_hour);
        assert_eq!(ids.len(), 1);
    }
}
