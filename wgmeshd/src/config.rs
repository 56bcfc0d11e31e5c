//! Assembled daemon configuration (section 10.C): defaults, then an
//! optional TOML file, then `WGMESH_*` environment variables, then CLI
//! flags, each layer overriding the last.
//!
//! Fields split into two groups. [`FixedConfig`] is read once at startup;
//! changing any of it requires a restart. [`HotConfig`] sits behind a
//! [`tokio::sync::RwLock`] and is refreshed in place by the SIGHUP reload
//! handler in [`crate::reload`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{WgmeshdError, WgmeshdResult};

/// Settings fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct FixedConfig {
    pub secret: String,
    pub iface: String,
    pub listen_port: u16,
    pub introducer: bool,
    pub no_punching: bool,
    pub force_relay: bool,
    pub ipv6_disabled: bool,
    pub dandelion_enabled: bool,
    pub standalone_gossip: bool,
    pub dht_bootstrap_routers: Vec<String>,
    pub base_dir: PathBuf,
}

/// Settings the SIGHUP reload file can change without a restart.
#[derive(Debug, Clone)]
pub struct HotConfig {
    pub advertise_routes: Vec<String>,
    pub log_level: String,
}

impl Default for HotConfig {
    fn default() -> Self {
        HotConfig {
            advertise_routes: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WgmeshConfig {
    pub fixed: FixedConfig,
    pub hot: Arc<RwLock<HotConfig>>,
}

impl WgmeshConfig {
    /// Validates layout constraints that cannot be expressed in the type
    /// system: secret length, interface name shape, port range. Failure here
    /// is fatal at startup (section 7's "Secret too short" row).
    pub fn validate(&self) -> WgmeshdResult<()> {
        if self.fixed.secret.len() < 16 {
            return Err(WgmeshdError::InvalidConfig(format!(
                "shared secret must be at least 16 characters, got {}",
                self.fixed.secret.len()
            )));
        }
        if self.fixed.iface.is_empty() || self.fixed.iface.len() > 15 {
            return Err(WgmeshdError::InvalidConfig(format!(
                "interface name must be 1-15 characters, got {:?}",
                self.fixed.iface
            )));
        }
        if !self
            .fixed
            .iface
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(WgmeshdError::InvalidConfig(format!(
                "interface name {:?} contains characters the kernel will reject",
                self.fixed.iface
            )));
        }
        if self.fixed.listen_port == 0 {
            return Err(WgmeshdError::InvalidConfig("listen port must be nonzero".into()));
        }
        Ok(())
    }
}

/// TOML file shape: every field optional, since the file is one of several
/// layers and most deployments only need to set a handful of keys.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    secret: Option<String>,
    interface: Option<String>,
    listen_port: Option<u16>,
    introducer: Option<bool>,
    no_punching: Option<bool>,
    force_relay: Option<bool>,
    ipv6_disabled: Option<bool>,
    dandelion: Option<bool>,
    standalone_gossip: Option<bool>,
    dht_bootstrap_routers: Option<Vec<String>>,
    base_dir: Option<PathBuf>,
    advertise_routes: Option<Vec<String>>,
    log_level: Option<String>,
}

/// Builds [`WgmeshConfig`] by layering defaults, an optional TOML file,
/// `WGMESH_*` environment variables and CLI flags, each overriding the
/// previous in that order.
#[derive(Debug, Default)]
pub struct WgmeshConfigBuilder {
    secret: Option<String>,
    iface: Option<String>,
    listen_port: Option<u16>,
    introducer: Option<bool>,
    no_punching: Option<bool>,
    force_relay: Option<bool>,
    ipv6_disabled: Option<bool>,
    dandelion_enabled: Option<bool>,
    standalone_gossip: Option<bool>,
    dht_bootstrap_routers: Option<Vec<String>>,
    base_dir: Option<PathBuf>,
    advertise_routes: Option<Vec<String>>,
    log_level: Option<String>,
}

impl WgmeshConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer 1 (after built-in defaults): an optional TOML file. Absence of
    /// the file is not an error; a corrupt file is.
    pub fn with_file(mut self, path: Option<&std::path::Path>) -> WgmeshdResult<Self> {
        let Some(path) = path else {
            return Ok(self);
        };
        if !path.exists() {
            return Ok(self);
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| WgmeshdError::InvalidConfig(format!("reading {}: {e}", path.display())))?;
        let file: FileConfig = toml::from_str(&text)
            .map_err(|e| WgmeshdError::InvalidConfig(format!("parsing {}: {e}", path.display())))?;

        self.secret = self.secret.or(file.secret);
        self.iface = self.iface.or(file.interface);
        self.listen_port = self.listen_port.or(file.listen_port);
        self.introducer = self.introducer.or(file.introducer);
        self.no_punching = self.no_punching.or(file.no_punching);
        self.force_relay = self.force_relay.or(file.force_relay);
        self.ipv6_disabled = self.ipv6_disabled.or(file.ipv6_disabled);
        self.dandelion_enabled = self.dandelion_enabled.or(file.dandelion);
        self.standalone_gossip = self.standalone_gossip.or(file.standalone_gossip);
        self.dht_bootstrap_routers = self.dht_bootstrap_routers.or(file.dht_bootstrap_routers);
        self.base_dir = self.base_dir.or(file.base_dir);
        self.advertise_routes = self.advertise_routes.or(file.advertise_routes);
        self.log_level = self.log_level.or(file.log_level);
        Ok(self)
    }

    /// Layer 2: `WGMESH_*` environment variables.
    pub fn with_env(mut self) -> Self {
        if let Ok(v) = std::env::var("WGMESH_SECRET") {
            self.secret = Some(v);
        }
        if let Ok(v) = std::env::var("WGMESH_INTERFACE") {
            self.iface = Some(v);
        }
        if let Ok(v) = std::env::var("WGMESH_LISTEN_PORT") {
            if let Ok(port) = v.parse() {
                self.listen_port = Some(port);
            }
        }
        if let Ok(v) = std::env::var("WGMESH_INTRODUCER") {
            self.introducer = Some(parse_bool_env(&v));
        }
        if let Ok(v) = std::env::var("WGMESH_NO_PUNCHING") {
            self.no_punching = Some(parse_bool_env(&v));
        }
        if let Ok(v) = std::env::var("WGMESH_FORCE_RELAY") {
            self.force_relay = Some(parse_bool_env(&v));
        }
        if let Ok(v) = std::env::var("WGMESH_IPV6_DISABLED") {
            self.ipv6_disabled = Some(parse_bool_env(&v));
        }
        if let Ok(v) = std::env::var("WGMESH_DANDELION") {
            self.dandelion_enabled = Some(parse_bool_env(&v));
        }
        if let Ok(v) = std::env::var("WGMESH_BASE_DIR") {
            self.base_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("WGMESH_ADVERTISE_ROUTES") {
            self.advertise_routes = Some(split_csv(&v));
        }
        if let Ok(v) = std::env::var("WGMESH_LOG_LEVEL") {
            self.log_level = Some(v);
        }
        self
    }

    pub fn secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.or(self.secret);
        self
    }

    pub fn iface(mut self, iface: Option<String>) -> Self {
        self.iface = iface.or(self.iface);
        self
    }

    pub fn listen_port(mut self, port: Option<u16>) -> Self {
        self.listen_port = port.or(self.listen_port);
        self
    }

    pub fn introducer(mut self, introducer: Option<bool>) -> Self {
        self.introducer = introducer.or(self.introducer);
        self
    }

    pub fn no_punching(mut self, no_punching: Option<bool>) -> Self {
        self.no_punching = no_punching.or(self.no_punching);
        self
    }

    pub fn force_relay(mut self, force_relay: Option<bool>) -> Self {
        self.force_relay = force_relay.or(self.force_relay);
        self
    }

    pub fn ipv6_disabled(mut self, disabled: Option<bool>) -> Self {
        self.ipv6_disabled = disabled.or(self.ipv6_disabled);
        self
    }

    pub fn dandelion_enabled(mut self, enabled: Option<bool>) -> Self {
        self.dandelion_enabled = enabled.or(self.dandelion_enabled);
        self
    }

    pub fn standalone_gossip(mut self, enabled: Option<bool>) -> Self {
        self.standalone_gossip = enabled.or(self.standalone_gossip);
        self
    }

    pub fn dht_bootstrap_routers(mut self, routers: Option<Vec<String>>) -> Self {
        self.dht_bootstrap_routers = routers.or(self.dht_bootstrap_routers);
        self
    }

    pub fn base_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.base_dir = dir.or(self.base_dir);
        self
    }

    pub fn advertise_routes(mut self, routes: Option<Vec<String>>) -> Self {
        self.advertise_routes = routes.or(self.advertise_routes);
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        self.log_level = level.or(self.log_level);
        self
    }

    pub fn build(self) -> WgmeshdResult<WgmeshConfig> {
        let secret = self
            .secret
            .ok_or_else(|| WgmeshdError::InvalidConfig("no shared secret provided".into()))?;

        let fixed = FixedConfig {
            secret,
            iface: self.iface.unwrap_or_else(|| "wgmesh0".to_string()),
            listen_port: self.listen_port.unwrap_or(51820),
            introducer: self.introducer.unwrap_or(false),
            no_punching: self.no_punching.unwrap_or(false),
            force_relay: self.force_relay.unwrap_or(false),
            ipv6_disabled: self.ipv6_disabled.unwrap_or(false),
            dandelion_enabled: self.dandelion_enabled.unwrap_or(false),
            standalone_gossip: self.standalone_gossip.unwrap_or(false),
            dht_bootstrap_routers: self.dht_bootstrap_routers.unwrap_or_default(),
            base_dir: self.base_dir.unwrap_or_else(|| PathBuf::from(wgmesh_persist::DEFAULT_BASE_DIR)),
        };

        let hot = HotConfig {
            advertise_routes: self.advertise_routes.unwrap_or_default(),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
        };

        let config = WgmeshConfig {
            fixed,
            hot: Arc::new(RwLock::new(hot)),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_bool_env(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn split_csv(v: &str) -> Vec<String> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_secret() -> String {
        "wgmesh-test-secret-long-enough".to_string()
    }

    #[test]
    fn rejects_short_secret() {
        let err = WgmeshConfigBuilder::new().secret(Some("short".into())).build().unwrap_err();
        assert!(matches!(err, WgmeshdError::InvalidConfig(_)));
    }

    #[test]
    fn defaults_fill_in_when_unset() {
        let config = WgmeshConfigBuilder::new().secret(Some(long_secret())).build().unwrap();
        assert_eq!(config.fixed.iface, "wgmesh0");
        assert_eq!(config.fixed.listen_port, 51820);
        assert!(!config.fixed.introducer);
    }

    #[test]
    fn rejects_interface_name_too_long() {
        let err = WgmeshConfigBuilder::new()
            .secret(Some(long_secret()))
            .iface(Some("this-name-is-definitely-too-long".into()))
            .build()
            .unwrap_err();
        assert!(matches!(err, WgmeshdError::InvalidConfig(_)));
    }

    #[test]
    fn later_setter_call_overrides_earlier_one() {
        let config = WgmeshConfigBuilder::new()
            .secret(Some(long_secret()))
            .iface(Some("from-file".into()))
            .iface(Some("from-cli".into()))
            .build()
            .unwrap();
        assert_eq!(config.fixed.iface, "from-cli");
    }
}
