//! Command-line flags, layered on top of the TOML file and `WGMESH_*`
//! environment variables (section 10.C).

use std::path::PathBuf;

use clap::Parser;

/// Zero-configuration WireGuard mesh overlay daemon.
#[derive(Debug, Parser)]
#[command(name = "wgmeshd", about = "Joins a WireGuard mesh from a shared secret alone", version)]
pub struct Cli {
    /// Shared secret identifying the mesh. Overridden by `WGMESH_SECRET`.
    #[arg(long, env = "WGMESH_SECRET")]
    pub secret: Option<String>,

    /// WireGuard interface name to create and manage.
    #[arg(long, env = "WGMESH_INTERFACE")]
    pub interface: Option<String>,

    /// Preferred WireGuard listen port; substituted if already in use.
    #[arg(long, env = "WGMESH_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Optional TOML config file, lowest-priority layer after defaults.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Advertise willingness to broker rendezvous for other peers.
    #[arg(long)]
    pub introducer: bool,

    /// Disable HELLO retransmission during hole punching.
    #[arg(long)]
    pub no_punching: bool,

    /// Always relay through an introducer when one is available.
    #[arg(long)]
    pub force_relay: bool,

    /// Disable IPv6 mesh addressing and preference.
    #[arg(long)]
    pub ipv6_disabled: bool,

    /// Route peer announcements through the Dandelion++ stem/fluff relay.
    #[arg(long)]
    pub dandelion: bool,

    /// Run in-mesh gossip on its own socket instead of riding the
    /// peer-exchange socket.
    #[arg(long)]
    pub standalone_gossip: bool,

    /// Extra DHT bootstrap routers (`host:port`), comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub dht_bootstrap_router: Vec<String>,

    /// Persistence directory for identity, peer cache and DHT hints.
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Additional routable networks (CIDRs) this node advertises.
    #[arg(long, value_delimiter = ',')]
    pub advertise_route: Vec<String>,

    /// Log verbosity: error, warn, info, debug, or trace.
    #[arg(long, env = "WGMESH_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn advertise_routes(&self) -> Option<Vec<String>> {
        if self.advertise_route.is_empty() {
            None
        } else {
            Some(self.advertise_route.clone())
        }
    }

    pub fn dht_bootstrap_routers(&self) -> Option<Vec<String>> {
        if self.dht_bootstrap_router.is_empty() {
            None
        } else {
            Some(self.dht_bootstrap_router.clone())
        }
    }
}
