//! Resolves this node's [`LocalNode`] identity on startup: load a persisted
//! one, or mint a fresh Curve25519 keypair and derive its mesh addresses
//! (section 4.O, "derive identity").

use std::net::Ipv4Addr;

use tracing::info;
use wgmesh_core::{LocalNode, NatType};
use wgmesh_crypto::DerivedKeys;
use wgmesh_persist::PersistPaths;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::WgmeshdResult;

/// Loads the persisted identity at `paths.identity()`, or generates a new
/// keypair and mesh addresses and persists it immediately so a crash right
/// after doesn't mint a second, different identity on the next start.
pub fn load_or_create(paths: &PersistPaths, keys: &DerivedKeys, secret: &str) -> WgmeshdResult<LocalNode> {
    if let Some(existing) = wgmesh_persist::load_identity(&paths.identity())? {
        info!(pubkey = %hex::encode(existing.pubkey), "restored persisted identity");
        return Ok(existing);
    }

    let privkey = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let pubkey = PublicKey::from(&privkey);
    let pubkey_bytes = pubkey.to_bytes();

    let mesh_ipv4: Ipv4Addr = wgmesh_crypto::derive_mesh_ipv4(keys, secret, &pubkey_bytes);
    let mesh_ipv6 = wgmesh_crypto::derive_mesh_ipv6(keys, secret, &pubkey_bytes);

    let node = LocalNode {
        pubkey: pubkey_bytes,
        privkey: privkey.to_bytes(),
        mesh_ipv4,
        mesh_ipv6,
        endpoint: None,
        nat_type: NatType::Unknown,
        routable_networks: Vec::new(),
        introducer: false,
        hostname: hostname_or_default(),
    };

    wgmesh_persist::save_identity(&paths.identity(), &node)?;
    info!(pubkey = %hex::encode(node.pubkey), mesh_ip = %node.mesh_ipv4, "generated new identity");
    Ok(node)
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname")
                .output()
                .ok()
                .and_then(|o| String::from_utf8(o.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "wgmesh-node".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("wgmeshd-identity-{name}-{suffix}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const SECRET: &str = "wgmesh-test-secret-long-enough-for-key-derivation";

    #[test]
    fn generates_and_then_restores_same_identity() {
        let dir = scratch_dir("roundtrip");
        let paths = PersistPaths::new(dir.clone(), "wg0", "deadbeef");
        let keys = wgmesh_crypto::derive_keys(SECRET).unwrap();

        let first = load_or_create(&paths, &keys, SECRET).unwrap();
        let second = load_or_create(&paths, &keys, SECRET).unwrap();

        assert_eq!(first.pubkey, second.pubkey);
        assert_eq!(first.privkey, second.privkey);
        assert_eq!(first.mesh_ipv4, second.mesh_ipv4);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn fresh_identity_mesh_ipv4_starts_with_ten() {
        let dir = scratch_dir("fresh");
        let paths = PersistPaths::new(dir.clone(), "wg0", "deadbeef");
        let keys = wgmesh_crypto::derive_keys(SECRET).unwrap();

        let node = load_or_create(&paths, &keys, SECRET).unwrap();
        assert_eq!(node.mesh_ipv4.octets()[0], 10);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
