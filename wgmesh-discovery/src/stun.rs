//! Minimal RFC 5389 STUN client and NAT classifier (section 4.F).
//!
//! Only the binding request/response exchange is implemented: enough to
//! learn a server-reflexive address and, by issuing two queries over the
//! same socket, to distinguish cone from symmetric NAT.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use wgmesh_core::NatType;

use crate::error::{DiscoveryError, DiscoveryResult};

const MAGIC_COOKIE: u32 = 0x2112_A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;

fn build_binding_request(txid: &[u8; 12]) -> [u8; 20] {
    let mut packet = [0u8; 20];
    packet[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    packet[2..4].copy_from_slice(&0u16.to_be_bytes());
    packet[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    packet[8..20].copy_from_slice(txid);
    packet
}

fn parse_binding_response(buf: &[u8], expected_txid: &[u8; 12]) -> DiscoveryResult<SocketAddr> {
    if buf.len() < 20 {
        return Err(DiscoveryError::StunMalformedReply);
    }
    let msg_type = u16::from_be_bytes([buf[0], buf[1]]);
    let msg_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if msg_type != BINDING_RESPONSE || cookie != MAGIC_COOKIE {
        return Err(DiscoveryError::StunMalformedReply);
    }
    if &buf[8..20] != expected_txid {
        return Err(DiscoveryError::StunMalformedReply);
    }

    let mut offset = 20;
    let mut mapped: Option<SocketAddr> = None;
    let mut xor_mapped: Option<SocketAddr> = None;
    let end = (20 + msg_len).min(buf.len());

    while offset + 4 <= end {
        let attr_type = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        let attr_len = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > end {
            break;
        }
        let value = &buf[value_start..value_end];

        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => {
                if let Some(addr) = parse_xor_mapped_address(value) {
                    xor_mapped = Some(addr);
                }
            }
            ATTR_MAPPED_ADDRESS => {
                if let Some(addr) = parse_mapped_address(value) {
                    mapped = Some(addr);
                }
            }
            _ => {}
        }

        let padded = (attr_len + 3) & !3;
        offset = value_start + padded;
    }

    xor_mapped.or(mapped).ok_or(DiscoveryError::StunMalformedReply)
}

fn parse_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]);
    match family {
        0x01 => {
            let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
            Some(SocketAddr::new(IpAddr::V4(ip), port))
        }
        0x02 if value.len() >= 20 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&value[4..20]);
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}

fn parse_xor_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let family = value[1];
    let xport = u16::from_be_bytes([value[2], value[3]]);
    let port = xport ^ (MAGIC_COOKIE >> 16) as u16;
    match family {
        0x01 => {
            let xaddr = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
            let addr = xaddr ^ MAGIC_COOKIE;
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(addr)), port))
        }
        0x02 if value.len() >= 20 => {
            let mut xbytes = [0u8; 16];
            xbytes.copy_from_slice(&value[4..20]);
            let cookie_and_txid: [u8; 16] = {
                let mut buf = [0u8; 16];
                buf[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                buf[4..16].copy_from_slice(&value[8..20.min(value.len())]);
                buf
            };
            let mut addr = [0u8; 16];
            for i in 0..16 {
                addr[i] = xbytes[i] ^ cookie_and_txid[i];
            }
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(addr)), port))
        }
        _ => None,
    }
}

/// Issues a single STUN binding request to `server` over `socket` and
/// returns the reflexive address, or an error on timeout/malformed reply.
pub async fn stun_query(
    socket: &UdpSocket,
    server: SocketAddr,
    query_timeout: Duration,
) -> DiscoveryResult<SocketAddr> {
    let mut txid = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut txid);
    let request = build_binding_request(&txid);

    socket.send_to(&request, server).await?;

    let mut buf = [0u8; 512];
    let (n, _from) = timeout(query_timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| DiscoveryError::StunTimeout)??;

    parse_binding_response(&buf[..n], &txid)
}

/// Classifies NAT type by issuing two STUN queries over one shared socket
/// (section 4.F): same socket is load-bearing, since a cone NAT queried
/// from two different sockets looks symmetric.
pub async fn detect_nat_type(
    socket: &UdpSocket,
    server_a: SocketAddr,
    server_b: SocketAddr,
    query_timeout: Duration,
) -> DiscoveryResult<(NatType, Option<SocketAddr>)> {
    let result_a = stun_query(socket, server_a, query_timeout).await;
    let result_b = stun_query(socket, server_b, query_timeout).await;

    match (result_a, result_b) {
        (Ok(a), Ok(b)) if a == b => Ok((NatType::Cone, Some(a))),
        (Ok(a), Ok(_)) => Ok((NatType::Symmetric, Some(a))),
        (Ok(a), Err(_)) => Ok((NatType::Unknown, Some(a))),
        (Err(_), Ok(b)) => Ok((NatType::Unknown, Some(b))),
        (Err(_), Err(_)) => Err(DiscoveryError::StunBothFailed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_mapped_address_round_trips_ipv4() {
        let txid = [7u8; 12];
        let target: SocketAddr = "203.0.113.7:51821".parse().unwrap();
        let IpAddr::V4(ip) = target.ip() else { unreachable!() };
        let xaddr = u32::from_be_bytes(ip.octets()) ^ MAGIC_COOKIE;
        let xport = target.port() ^ (MAGIC_COOKIE >> 16) as u16;

        let mut value = Vec::new();
        value.push(0);
        value.push(0x01);
        value.extend_from_slice(&xport.to_be_bytes());
        value.extend_from_slice(&xaddr.to_be_bytes());

        let mut packet = Vec::new();
        packet.extend_from_slice(&BINDING_RESPONSE.to_be_bytes());
        let attr_len = value.len() as u16;
        packet.extend_from_slice(&(4 + attr_len).to_be_bytes());
        packet.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet.extend_from_slice(&txid);
        packet.extend_from_slice(&ATTR_XOR_MAPPED_ADDRESS.to_be_bytes());
        packet.extend_from_slice(&attr_len.to_be_bytes());
        packet.extend_from_slice(&value);

        let parsed = parse_binding_response(&packet, &txid).unwrap();
        assert_eq!(parsed, target);
    }

    #[test]
    fn rejects_wrong_transaction_id() {
        let txid = [1u8; 12];
        let other_txid = [2u8; 12];
        let mut packet = vec![0u8; 20];
        packet[0..2].copy_from_slice(&BINDING_RESPONSE.to_be_bytes());
        packet[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        packet[8..20].copy_from_slice(&other_txid);
        assert!(parse_binding_response(&packet, &txid).is_err());
    }
}
