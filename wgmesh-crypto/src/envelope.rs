//! AES-256-GCM envelope format shared by LAN, peer-exchange, and gossip wire traffic.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CryptoError, CryptoResult};

const PROTOCOL_TAG: &str = "wgmesh-v1";
const REPLAY_WINDOW_SECS: i64 = 600;
const NONCE_LEN: usize = 12;

fn base64_engine() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    message_type: String,
    nonce: String,
    ciphertext: String,
}

/// A decrypted, freshness-checked envelope ready for payload-specific parsing.
#[derive(Debug)]
pub struct OpenedEnvelope {
    pub message_type: String,
    pub timestamp: i64,
    pub payload: Value,
}

/// Encrypt `payload` under `key`, stamping it with the protocol tag and `now`.
///
/// The plaintext is the serialized payload object with `protocol` and
/// `timestamp` fields merged in, matching the wire format in section 6: a
/// JSON envelope `{type, nonce, ciphertext}` wrapping AES-256-GCM ciphertext.
pub fn seal_envelope<T: Serialize>(
    message_type: &str,
    payload: &T,
    key: &[u8; 32],
    now: i64,
) -> CryptoResult<Vec<u8>> {
    let mut value = serde_json::to_value(payload)?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| CryptoError::Serialization("payload must serialize to a JSON object".into()))?;
    obj.insert("protocol".into(), Value::String(PROTOCOL_TAG.into()));
    obj.insert("timestamp".into(), Value::from(now));

    let plaintext = serde_json::to_vec(&value)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::Serialization("invalid AES-256-GCM key length".into()))?;
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::BadMessage)?;

    let envelope = WireEnvelope {
        message_type: message_type.to_string(),
        nonce: base64_engine().encode(nonce_bytes),
        ciphertext: base64_engine().encode(ciphertext),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Decrypt and freshness-check an envelope, returning its raw JSON payload.
///
/// Fails with [`CryptoError::BadMessage`] (or a more specific variant) when the
/// envelope cannot be parsed, decryption fails, the protocol tag mismatches, or
/// the embedded timestamp falls outside the ±10 minute replay window around `now`.
pub fn open_envelope_raw(bytes: &[u8], key: &[u8; 32], now: i64) -> CryptoResult<OpenedEnvelope> {
    let envelope: WireEnvelope = serde_json::from_slice(bytes).map_err(|_| CryptoError::BadMessage)?;

    let nonce_bytes = base64_engine()
        .decode(envelope.nonce)
        .map_err(|_| CryptoError::BadMessage)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::BadMessage);
    }
    let ciphertext = base64_engine()
        .decode(envelope.ciphertext)
        .map_err(|_| CryptoError::BadMessage)?;

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::BadMessage)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::BadMessage)?;

    let value: Value = serde_json::from_slice(&plaintext).map_err(|_| CryptoError::BadMessage)?;
    let obj: &Map<String, Value> = value.as_object().ok_or(CryptoError::BadMessage)?;

    let protocol = obj
        .get("protocol")
        .and_then(Value::as_str)
        .ok_or(CryptoError::BadMessage)?;
    if protocol != PROTOCOL_TAG {
        return Err(CryptoError::WrongProtocol(protocol.to_string()));
    }

    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_i64)
        .ok_or(CryptoError::BadMessage)?;
    if timestamp < now - REPLAY_WINDOW_SECS || timestamp > now + REPLAY_WINDOW_SECS {
        return Err(CryptoError::ReplayWindow { ts: timestamp, now });
    }

    Ok(OpenedEnvelope {
        message_type: envelope.message_type,
        timestamp,
        payload: value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Ping {
        n: u32,
    }

    fn key() -> [u8; 32] {
        [0x42u8; 32]
    }

    #[test]
    fn seal_then_open_roundtrips() {
        let sealed = seal_envelope("Ping", &Ping { n: 7 }, &key(), 1_000).unwrap();
        let opened = open_envelope_raw(&sealed, &key(), 1_000).unwrap();
        assert_eq!(opened.message_type, "Ping");
        assert_eq!(opened.timestamp, 1_000);
        let payload: Ping = serde_json::from_value(opened.payload).unwrap();
        assert_eq!(payload, Ping { n: 7 });
    }

    #[test]
    fn bit_flip_in_ciphertext_fails() {
        let mut sealed = seal_envelope("Ping", &Ping { n: 7 }, &key(), 1_000).unwrap();
        let flip_at = sealed.len() - 5;
        sealed[flip_at] ^= 0xff;
        assert!(matches!(
            open_envelope_raw(&sealed, &key(), 1_000),
            Err(CryptoError::BadMessage)
        ));
    }

    #[test]
    fn replay_outside_window_is_rejected() {
        let sealed = seal_envelope("Ping", &Ping { n: 1 }, &key(), 1_000).unwrap();
        let err = open_envelope_raw(&sealed, &key(), 1_000 + 601).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadMessage);
    }

    #[test]
    fn replay_within_window_succeeds() {
        let sealed = seal_envelope("Ping", &Ping { n: 1 }, &key(), 1_000).unwrap();
        assert!(open_envelope_raw(&sealed, &key(), 1_000 + 599).is_ok());
        assert!(open_envelope_raw(&sealed, &key(), 1_000 - 599).is_ok());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal_envelope("Ping", &Ping { n: 1 }, &key(), 1_000).unwrap();
        let other_key = [0x43u8; 32];
        assert!(open_envelope_raw(&sealed, &other_key, 1_000).is_err());
    }
}
