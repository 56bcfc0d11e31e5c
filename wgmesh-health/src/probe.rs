//! TCP mesh probe (section 4.K, signal 2): a short-lived connection through
//! the tunnel itself, so a live probe round-trip proves the mesh path works
//! end to end, not just that WireGuard last saw a handshake.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpSocket;
use tracing::debug;

const PING: &[u8] = b"ping\n";
const PONG: &[u8] = b"pong\n";

/// Abstraction over "can I reach this peer over TCP", so the probe loop is
/// testable without a real socket or WireGuard interface.
#[async_trait]
pub trait ProbeDialer: Send + Sync {
    async fn probe(&self, addr: SocketAddr, timeout: Duration) -> bool;
}

/// Dials out bound to a specific interface (Linux `SO_BINDTODEVICE`) so the
/// probe is forced through the tunnel rather than the default route.
pub struct TcpPingProbe {
    iface: String,
}

impl TcpPingProbe {
    pub fn new(iface: String) -> Self {
        TcpPingProbe { iface }
    }

    fn new_socket(&self, addr: SocketAddr) -> std::io::Result<TcpSocket> {
        let socket = if addr.is_ipv6() { TcpSocket::new_v6()? } else { TcpSocket::new_v4()? };
        #[cfg(any(target_os = "linux", target_os = "fuchsia"))]
        socket.bind_device(Some(self.iface.as_bytes()))?;
        #[cfg(not(any(target_os = "linux", target_os = "fuchsia")))]
        let _ = &self.iface;
        Ok(socket)
    }
}

#[async_trait]
impl ProbeDialer for TcpPingProbe {
    async fn probe(&self, addr: SocketAddr, timeout: Duration) -> bool {
        let attempt = async {
            let socket = self.new_socket(addr).map_err(|_| ())?;
            let mut stream = socket.connect(addr).await.map_err(|_| ())?;

            stream.write_all(PING).await.map_err(|_| ())?;

            let mut buf = [0u8; PONG.len()];
            stream.read_exact(&mut buf).await.map_err(|_| ())?;
            if buf == PONG {
                Ok(())
            } else {
                Err(())
            }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(())) => false,
            Err(_) => {
                debug!(%addr, "TCP mesh probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;

    #[async_trait]
    impl ProbeDialer for AlwaysFails {
        async fn probe(&self, _addr: SocketAddr, _timeout: Duration) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn stub_dialer_reports_failure() {
        let dialer = AlwaysFails;
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(!dialer.probe(addr, Duration::from_millis(10)).await);
    }
}
