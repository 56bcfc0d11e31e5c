//! Bounds checking applied to any decoded peer announcement before it is trusted.

use base64::Engine;

use crate::error::CryptoError;

pub const MAX_ROUTABLE_NETWORKS: usize = 100;
pub const MAX_KNOWN_PEERS: usize = 1000;
pub const MAX_HOSTNAME_LEN: usize = 253;

pub fn validate_routable_networks(networks: &[String]) -> Result<(), CryptoError> {
    if networks.len() > MAX_ROUTABLE_NETWORKS {
        return Err(CryptoError::ValidationLimit {
            field: "routable_networks",
        });
    }
    Ok(())
}

pub fn validate_known_peers_len(count: usize) -> Result<(), CryptoError> {
    if count > MAX_KNOWN_PEERS {
        return Err(CryptoError::ValidationLimit { field: "known_peers" });
    }
    Ok(())
}

pub fn validate_hostname(hostname: &str) -> Result<(), CryptoError> {
    if hostname.len() > MAX_HOSTNAME_LEN || !hostname.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        return Err(CryptoError::ValidationLimit { field: "hostname" });
    }
    Ok(())
}

pub fn validate_pubkey_b64(pubkey: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(pubkey)
        .map_err(|_| CryptoError::ValidationLimit { field: "pubkey" })?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::ValidationLimit { field: "pubkey" })
}

pub fn validate_host_port(endpoint: &str) -> Result<std::net::SocketAddr, CryptoError> {
    let addr: std::net::SocketAddr = endpoint
        .parse()
        .map_err(|_| CryptoError::ValidationLimit { field: "endpoint" })?;
    if addr.port() == 0 {
        return Err(CryptoError::ValidationLimit { field: "endpoint" });
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_many_routable_networks() {
        let networks: Vec<String> = (0..101).map(|i| format!("10.0.{i}.0/24")).collect();
        assert!(validate_routable_networks(&networks).is_err());
    }

    #[test]
    fn accepts_boundary_count() {
        let networks: Vec<String> = (0..100).map(|i| format!("10.0.{i}.0/24")).collect();
        assert!(validate_routable_networks(&networks).is_ok());
    }

    #[test]
    fn rejects_long_hostname() {
        let hostname = "a".repeat(254);
        assert!(validate_hostname(&hostname).is_err());
    }

    #[test]
    fn rejects_invalid_pubkey_length() {
        let short = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(validate_pubkey_b64(&short).is_err());
    }

    #[test]
    fn rejects_zero_port() {
        assert!(validate_host_port("203.0.113.5:0").is_err());
    }

    #[test]
    fn accepts_valid_endpoint() {
        assert!(validate_host_port("203.0.113.5:51820").is_ok());
    }
}
