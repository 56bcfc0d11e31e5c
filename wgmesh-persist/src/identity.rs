//! Local node identity persistence: `<iface>.json`, mode 0600 (it holds the
//! WireGuard private key).

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use wgmesh_core::{LocalNode, NatType};

use crate::error::{PersistError, PersistResult};
use crate::io_util::write_atomic_0600;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityRecord {
    pubkey_b64: String,
    privkey_b64: String,
    mesh_ipv4: Ipv4Addr,
    mesh_ipv6: Ipv6Addr,
    endpoint: Option<SocketAddr>,
    nat_type: NatType,
    routable_networks: Vec<String>,
    introducer: bool,
    hostname: String,
}

fn to_record(node: &LocalNode) -> IdentityRecord {
    IdentityRecord {
        pubkey_b64: base64::engine::general_purpose::STANDARD.encode(node.pubkey),
        privkey_b64: base64::engine::general_purpose::STANDARD.encode(node.privkey),
        mesh_ipv4: node.mesh_ipv4,
        mesh_ipv6: node.mesh_ipv6,
        endpoint: node.endpoint,
        nat_type: node.nat_type,
        routable_networks: node.routable_networks.clone(),
        introducer: node.introducer,
        hostname: node.hostname.clone(),
    }
}

fn decode_key(b64: &str) -> PersistResult<[u8; 32]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| PersistError::Io {
            path: "<identity key>".into(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
    bytes
        .try_into()
        .map_err(|_| PersistError::Io {
            path: "<identity key>".into(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "key is not 32 bytes"),
        })
}

fn from_record(record: IdentityRecord) -> PersistResult<LocalNode> {
    Ok(LocalNode {
        pubkey: decode_key(&record.pubkey_b64)?,
        privkey: decode_key(&record.privkey_b64)?,
        mesh_ipv4: record.mesh_ipv4,
        mesh_ipv6: record.mesh_ipv6,
        endpoint: record.endpoint,
        nat_type: record.nat_type,
        routable_networks: record.routable_networks,
        introducer: record.introducer,
        hostname: record.hostname,
    })
}

/// Writes the node's identity to `path` with mode 0600.
pub fn save_identity(path: &Path, node: &LocalNode) -> PersistResult<()> {
    let record = to_record(node);
    let bytes = serde_json::to_vec_pretty(&record)?;
    write_atomic_0600(path, &bytes)
}

/// Loads a previously persisted identity, if the file exists.
pub fn load_identity(path: &Path) -> PersistResult<Option<LocalNode>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).map_err(|e| PersistError::io(path.display().to_string(), e))?;
    let record: IdentityRecord = serde_json::from_slice(&bytes)?;
    Ok(Some(from_record(record)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("wgmesh-persist-test-{name}-{suffix}"))
    }

    fn sample_node() -> LocalNode {
        LocalNode {
            pubkey: [1u8; 32],
            privkey: [2u8; 32],
            mesh_ipv4: Ipv4Addr::new(10, 88, 1, 1),
            mesh_ipv6: "fd00::1".parse().unwrap(),
            endpoint: None,
            nat_type: NatType::Cone,
            routable_networks: vec!["10.0.0.0/8".into()],
            introducer: true,
            hostname: "node-a".into(),
        }
    }

    #[test]
    fn roundtrips_identity() {
        let path = scratch_path("identity");
        let node = sample_node();
        save_identity(&path, &node).unwrap();
        let loaded = load_identity(&path).unwrap().unwrap();
        assert_eq!(loaded.pubkey, node.pubkey);
        assert_eq!(loaded.privkey, node.privkey);
        assert_eq!(loaded.mesh_ipv4, node.mesh_ipv4);
        assert_eq!(loaded.hostname, node.hostname);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_returns_none() {
        let path = scratch_path("missing");
        assert!(load_identity(&path).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn identity_file_is_mode_0600() {
        use std::os::unix::fs::PermissionsExt;
        let path = scratch_path("perms");
        save_identity(&path, &sample_node()).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        std::fs::remove_file(&path).unwrap();
    }
}
