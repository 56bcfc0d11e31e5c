//! File layout under the persistence base directory (section 4.N).

use std::path::PathBuf;

/// Default persistence root; overridable for tests and non-standard installs.
pub const DEFAULT_BASE_DIR: &str = "/var/lib/wgmesh";

#[derive(Debug, Clone)]
pub struct PersistPaths {
    base_dir: PathBuf,
    iface: String,
    network_id_hex8: String,
}

impl PersistPaths {
    pub fn new(base_dir: impl Into<PathBuf>, iface: impl Into<String>, network_id_hex8: impl Into<String>) -> Self {
        PersistPaths {
            base_dir: base_dir.into(),
            iface: iface.into(),
            network_id_hex8: network_id_hex8.into(),
        }
    }

    pub fn identity(&self) -> PathBuf {
        self.base_dir.join(format!("{}.json", self.iface))
    }

    pub fn dht_nodes(&self) -> PathBuf {
        self.base_dir.join(format!("{}-{}-dht.nodes", self.iface, self.network_id_hex8))
    }

    pub fn peer_cache(&self) -> PathBuf {
        self.base_dir.join(format!("{}-peers.json", self.iface))
    }

    pub fn reload_file(&self) -> PathBuf {
        self.base_dir.join(format!("{}.reload", self.iface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_file_names() {
        let paths = PersistPaths::new("/var/lib/wgmesh", "wg0", "a1b2c3d4");
        assert_eq!(paths.identity(), PathBuf::from("/var/lib/wgmesh/wg0.json"));
        assert_eq!(paths.dht_nodes(), PathBuf::from("/var/lib/wgmesh/wg0-a1b2c3d4-dht.nodes"));
        assert_eq!(paths.peer_cache(), PathBuf::from("/var/lib/wgmesh/wg0-peers.json"));
        assert_eq!(paths.reload_file(), PathBuf::from("/var/lib/wgmesh/wg0.reload"));
    }
}
