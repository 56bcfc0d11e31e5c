//! Wire envelope the router wraps around an opaque announcement payload.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Carries a payload through the stem phase. `hop_count` is incremented on
/// every stem forward and capped at the router's configured hop cap; `nonce`
/// is fresh per originated announcement so repeated stems of the same
/// payload don't collide in dedup caches downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DandelionEnvelope {
    pub nonce: [u8; 16],
    pub hop_count: u8,
    pub payload: Vec<u8>,
}

impl DandelionEnvelope {
    /// Wraps a freshly originated payload at hop 0 with a random nonce.
    pub fn originate(payload: Vec<u8>) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        DandelionEnvelope {
            nonce,
            hop_count: 0,
            payload,
        }
    }

    /// Returns a copy with the hop count incremented by one, capped at 255.
    pub fn with_incremented_hop(&self) -> Self {
        DandelionEnvelope {
            nonce: self.nonce,
            hop_count: self.hop_count.saturating_add(1),
            payload: self.payload.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelope always serializes")
    }

    pub fn decode(bytes: &[u8]) -> crate::error::DandelionResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn originate_starts_at_hop_zero() {
        let envelope = DandelionEnvelope::originate(b"payload".to_vec());
        assert_eq!(envelope.hop_count, 0);
    }

    #[test]
    fn increment_preserves_nonce_and_payload() {
        let envelope = DandelionEnvelope::originate(b"payload".to_vec());
        let next = envelope.with_incremented_hop();
        assert_eq!(next.hop_count, 1);
        assert_eq!(next.nonce, envelope.nonce);
        assert_eq!(next.payload, envelope.payload);
    }

    #[test]
    fn roundtrips_through_wire_encoding() {
        let envelope = DandelionEnvelope::originate(b"hello".to_vec());
        let decoded = DandelionEnvelope::decode(&envelope.encode()).unwrap();
        assert_eq!(envelope, decoded);
    }
}
