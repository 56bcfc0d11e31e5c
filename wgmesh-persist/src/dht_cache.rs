//! DHT bootstrap node persistence: `<iface>-<netid8>-dht.nodes`.
//!
//! Format is one `ip:port` per line, the same shape the `mainline` crate's
//! own routing table entries reduce to; the daemon feeds these back in as
//! extra bootstrap routers on restart so it doesn't have to re-discover the
//! wider DHT from the public router list alone.

use std::net::SocketAddr;
use std::path::Path;

use crate::error::PersistError;
use crate::error::PersistResult;
use crate::io_util::write_atomic;

/// Writes the current routing-table snapshot, one address per line.
pub fn save_dht_nodes(path: &Path, nodes: &[SocketAddr]) -> PersistResult<()> {
    let mut buf = String::new();
    for node in nodes {
        buf.push_str(&node.to_string());
        buf.push('\n');
    }
    write_atomic(path, buf.as_bytes())
}

/// Loads a previously persisted node list. Malformed lines are skipped
/// rather than failing the whole load; a stale bootstrap hint is harmless.
pub fn load_dht_nodes(path: &Path) -> PersistResult<Vec<SocketAddr>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path).map_err(|e| PersistError::io(path.display().to_string(), e))?;
    Ok(text.lines().filter_map(|line| line.trim().parse().ok()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("wgmesh-persist-dht-{name}-{suffix}"))
    }

    #[test]
    fn roundtrips_node_list() {
        let path = scratch_path("roundtrip");
        let nodes: Vec<SocketAddr> = vec!["1.2.3.4:6881".parse().unwrap(), "[::1]:6881".parse().unwrap()];
        save_dht_nodes(&path, &nodes).unwrap();
        let loaded = load_dht_nodes(&path).unwrap();
        assert_eq!(loaded, nodes);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn skips_malformed_lines() {
        let path = scratch_path("malformed");
        std::fs::write(&path, "not-an-address\n1.2.3.4:6881\n").unwrap();
        let loaded = load_dht_nodes(&path).unwrap();
        assert_eq!(loaded, vec!["1.2.3.4:6881".parse::<SocketAddr>().unwrap()]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_returns_empty() {
        let path = scratch_path("missing");
        assert!(load_dht_nodes(&path).unwrap().is_empty());
    }
}
