//! Abstract WireGuard control surface (section 4.C).
//!
//! `WireGuardControl` is the contract the reconciler and health monitor
//! program against; [`KernelWireGuardControl`] is the real implementation
//! that shells out to `ip`/`wg` through an [`Executor`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{NetCtlError, NetCtlResult};
use crate::executor::Executor;

const MAX_PORT_SUBSTITUTION_ATTEMPTS: u16 = 100;

#[derive(Debug, Clone, Default)]
pub struct KernelPeerState {
    pub pubkey: String,
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<String>,
    pub last_handshake_unix: Option<i64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerTransfer {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[async_trait]
pub trait WireGuardControl: Send + Sync {
    async fn ensure_interface(&self, name: &str, privkey_b64: &str, port: u16) -> NetCtlResult<u16>;
    async fn set_address(&self, name: &str, ipv4_cidr: &str, ipv6_cidr: Option<&str>) -> NetCtlResult<()>;
    async fn set_peer(
        &self,
        iface: &str,
        pubkey_b64: &str,
        psk_b64: &str,
        endpoint: Option<SocketAddr>,
        allowed_ips_csv: &str,
    ) -> NetCtlResult<()>;
    async fn remove_peer(&self, iface: &str, pubkey_b64: &str) -> NetCtlResult<()>;
    async fn get_peers(&self, iface: &str) -> NetCtlResult<Vec<KernelPeerState>>;
    async fn get_latest_handshakes(&self, iface: &str) -> NetCtlResult<HashMap<String, i64>>;
    async fn get_peer_transfers(&self, iface: &str) -> NetCtlResult<HashMap<String, PeerTransfer>>;
    async fn teardown_interface(&self, name: &str) -> NetCtlResult<()>;
}

/// Drives the kernel WireGuard implementation via `ip link`/`wg`.
pub struct KernelWireGuardControl {
    executor: Arc<dyn Executor>,
}

impl KernelWireGuardControl {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        KernelWireGuardControl { executor }
    }

    /// Write `value` to a mode-0600 temp file and return its path, so secrets
    /// never appear in argv or process listings.
    fn write_secret_file(value: &str) -> NetCtlResult<tempfile_like::SecretFile> {
        tempfile_like::SecretFile::new(value).map_err(|e| NetCtlError::Spawn(e.to_string()))
    }

    async fn find_available_port(&self, preferred: u16) -> NetCtlResult<u16> {
        if portpicker::is_free(preferred) {
            return Ok(preferred);
        }
        warn!(port = preferred, "preferred gossip port in use, scanning upward");
        for offset in 1..=MAX_PORT_SUBSTITUTION_ATTEMPTS {
            let candidate = preferred.wrapping_add(offset);
            if candidate != 0 && portpicker::is_free(candidate) {
                return Ok(candidate);
            }
        }
        Err(NetCtlError::NoPortAvailable)
    }
}

#[async_trait]
impl WireGuardControl for KernelWireGuardControl {
    async fn ensure_interface(&self, name: &str, privkey_b64: &str, port: u16) -> NetCtlResult<u16> {
        let port = self.find_available_port(port).await?;

        let exists = self.executor.run("ip", &["link", "show", name]).await.is_ok();
        if exists {
            info!(iface = name, "interface exists, resetting rather than recreating");
            self.executor
                .run("ip", &["address", "flush", "dev", name])
                .await?;
            // Dropping all peers via `wg syncconf` with an empty config section is
            // the usual way to reset peer state without tearing the port binding.
        } else {
            self.executor.run("ip", &["link", "add", "dev", name, "type", "wireguard"]).await?;
        }

        let keyfile = Self::write_secret_file(privkey_b64)?;
        self.executor
            .run(
                "wg",
                &["set", name, "listen-port", &port.to_string(), "private-key", keyfile.path()],
            )
            .await?;
        self.executor.run("ip", &["link", "set", name, "up"]).await?;
        Ok(port)
    }

    async fn set_address(&self, name: &str, ipv4_cidr: &str, ipv6_cidr: Option<&str>) -> NetCtlResult<()> {
        self.executor
            .run("ip", &["address", "add", ipv4_cidr, "dev", name])
            .await?;
        if let Some(v6) = ipv6_cidr {
            self.executor.run("ip", &["-6", "address", "add", v6, "dev", name]).await?;
        }
        Ok(())
    }

    async fn set_peer(
        &self,
        iface: &str,
        pubkey_b64: &str,
        psk_b64: &str,
        endpoint: Option<SocketAddr>,
        allowed_ips_csv: &str,
    ) -> NetCtlResult<()> {
        let pskfile = Self::write_secret_file(psk_b64)?;
        let mut args: Vec<String> = vec![
            "set".into(),
            iface.into(),
            "peer".into(),
            pubkey_b64.into(),
            "preshared-key".into(),
            pskfile.path().into(),
            "allowed-ips".into(),
            allowed_ips_csv.into(),
        ];
        if let Some(ep) = endpoint {
            args.push("endpoint".into());
            args.push(ep.to_string());
        }
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        self.executor.run("wg", &args_ref).await?;
        Ok(())
    }

    async fn remove_peer(&self, iface: &str, pubkey_b64: &str) -> NetCtlResult<()> {
        self.executor
            .run("wg", &["set", iface, "peer", pubkey_b64, "remove"])
            .await?;
        Ok(())
    }

    async fn get_peers(&self, iface: &str) -> NetCtlResult<Vec<KernelPeerState>> {
        let output = self.executor.run("wg", &["show", iface, "dump"]).await?;
        parse_dump(&output.stdout)
    }

    async fn get_latest_handshakes(&self, iface: &str) -> NetCtlResult<HashMap<String, i64>> {
        Ok(self
            .get_peers(iface)
            .await?
            .into_iter()
            .filter_map(|p| p.last_handshake_unix.map(|ts| (p.pubkey, ts)))
            .collect())
    }

    async fn get_peer_transfers(&self, iface: &str) -> NetCtlResult<HashMap<String, PeerTransfer>> {
        Ok(self
            .get_peers(iface)
            .await?
            .into_iter()
            .map(|p| {
                (
                    p.pubkey,
                    PeerTransfer {
                        rx_bytes: p.rx_bytes,
                        tx_bytes: p.tx_bytes,
                    },
                )
            })
            .collect())
    }

    async fn teardown_interface(&self, name: &str) -> NetCtlResult<()> {
        self.executor.run("ip", &["link", "del", name]).await?;
        Ok(())
    }
}

/// Parses `wg show <iface> dump` output. The first line (interface summary)
/// has 4 fields; peer lines have 8: pubkey, psk, endpoint, allowed-ips,
/// latest-handshake, rx, tx, keepalive.
fn parse_dump(stdout: &str) -> NetCtlResult<Vec<KernelPeerState>> {
    let mut peers = Vec::new();
    for (i, line) in stdout.lines().enumerate() {
        if i == 0 {
            continue; // interface summary line
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 8 {
            return Err(NetCtlError::MalformedOutput(line.to_string()));
        }
        let endpoint = if fields[2] == "(none)" {
            None
        } else {
            fields[2].parse().ok()
        };
        let last_handshake: i64 = fields[4].parse().unwrap_or(0);
        peers.push(KernelPeerState {
            pubkey: fields[0].to_string(),
            endpoint,
            allowed_ips: fields[3].split(',').map(str::to_string).collect(),
            last_handshake_unix: if last_handshake == 0 { None } else { Some(last_handshake) },
            rx_bytes: fields[5].parse().unwrap_or(0),
            tx_bytes: fields[6].parse().unwrap_or(0),
        });
    }
    Ok(peers)
}

/// Minimal mode-0600 secret scratch file, local to this module so the
/// dependency stays obvious at the call site. WireGuard keys are handed to
/// `wg` by file path, never by argv value, so they never show up in a
/// process listing.
mod tempfile_like {
    use std::io;
    use std::path::PathBuf;

    pub struct SecretFile {
        path: PathBuf,
    }

    impl SecretFile {
        pub fn new(contents: &str) -> io::Result<Self> {
            let suffix = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos();
            let path = std::env::temp_dir().join(format!("wgmesh-secret-{suffix}"));

            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                let mut file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(&path)?;
                std::io::Write::write_all(&mut file, contents.as_bytes())?;
            }
            #[cfg(not(unix))]
            {
                std::fs::write(&path, contents.as_bytes())?;
            }

            Ok(SecretFile { path })
        }

        pub fn path(&self) -> &str {
            self.path.to_str().unwrap_or_default()
        }
    }

    impl Drop for SecretFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingExecutor;

    #[tokio::test]
    async fn ensure_interface_brings_up_link_and_sets_key() {
        let exec = Arc::new(RecordingExecutor::new());
        exec.push_response(Err(NetCtlError::CommandFailed {
            program: "ip".into(),
            status: 1,
            stderr: "no such device".into(),
        }));
        let ctl = KernelWireGuardControl::new(exec.clone());
        let port = ctl.ensure_interface("wg-mesh0", "cGxhY2Vob2xkZXJrZXk=", 51820).await.unwrap();
        assert_eq!(port, 51820);

        let invocations = exec.invocations();
        assert!(invocations.iter().any(|c| c.program == "wg" && c.args.contains(&"listen-port".to_string())));
        assert!(invocations.iter().any(|c| c.program == "ip" && c.args.contains(&"up".to_string())));
    }

    #[test]
    fn parse_dump_handles_no_endpoint() {
        let stdout = "privkeyhash\tpubkeyhash\t51820\tfwmark\npeerpub\tpsk\t(none)\t10.0.0.2/32\t0\t100\t200\t0\n";
        let peers = parse_dump(stdout).unwrap();
        assert_eq!(peers.len(), 1);
        assert!(peers[0].endpoint.is_none());
        assert!(peers[0].last_handshake_unix.is_none());
        assert_eq!(peers[0].rx_bytes, 100);
    }
}
