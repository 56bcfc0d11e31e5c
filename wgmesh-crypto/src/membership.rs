//! HMAC membership tokens and secret-rotation announcements.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 16;
const ROTATION_WINDOW_SECS: i64 = 3600;

fn token_for_hour(key: &[u8; 32], pubkey: &[u8], hour: i64) -> [u8; TOKEN_LEN] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(pubkey);
    mac.update(b"|");
    mac.update(hour.to_string().as_bytes());
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; TOKEN_LEN];
    out.copy_from_slice(&full[0..TOKEN_LEN]);
    out
}

/// Generate the membership token proving possession of the shared secret for
/// the current hour, keyed on this node's public key.
pub fn generate_membership_token(key: &[u8; 32], pubkey: &[u8], unix_seconds: i64) -> [u8; TOKEN_LEN] {
    token_for_hour(key, pubkey, unix_seconds / 3600)
}

/// Validate a membership token, accepting the current, previous, and next hour
/// to tolerate clock skew and hour-boundary rollover.
pub fn validate_membership_token(
    key: &[u8; 32],
    pubkey: &[u8],
    token: &[u8; TOKEN_LEN],
    unix_seconds: i64,
) -> bool {
    let hour = unix_seconds / 3600;
    [hour - 1, hour, hour + 1]
        .iter()
        .any(|&h| token_for_hour(key, pubkey, h) == *token)
}

/// A signed announcement that the mesh's shared secret is rotating.
#[derive(Debug, Clone)]
pub struct RotationAnnouncement {
    pub commit: [u8; 32],
    pub grace_secs: u64,
    pub timestamp: i64,
    pub signature: [u8; 32],
}

fn rotation_signing_bytes(commit: &[u8; 32], grace_secs: u64, timestamp: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 8 + 8);
    buf.extend_from_slice(commit);
    buf.extend_from_slice(&grace_secs.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf
}

/// Build a rotation announcement for `new_secret`, signed with the old
/// membership key. The commitment is `SHA256(new_secret)`, never the secret
/// itself, so observers cannot learn the new secret before the grace period.
pub fn generate_rotation_announcement(
    old_membership_key: &[u8; 32],
    new_secret: &str,
    grace_secs: u64,
    now: i64,
) -> RotationAnnouncement {
    let commit: [u8; 32] = Sha256::digest(new_secret.as_bytes()).into();
    let signing_bytes = rotation_signing_bytes(&commit, grace_secs, now);

    let mut mac = HmacSha256::new_from_slice(old_membership_key).expect("HMAC accepts any key length");
    mac.update(&signing_bytes);
    let signature: [u8; 32] = mac.finalize().into_bytes().into();

    RotationAnnouncement {
        commit,
        grace_secs,
        timestamp: now,
        signature,
    }
}

/// Validate a rotation announcement's timestamp window and signature.
pub fn validate_rotation_announcement(
    old_membership_key: &[u8; 32],
    announcement: &RotationAnnouncement,
    now: i64,
) -> CryptoResult<()> {
    if (announcement.timestamp - now).abs() > ROTATION_WINDOW_SECS {
        return Err(CryptoError::RotationTimestampOutOfRange);
    }

    let signing_bytes = rotation_signing_bytes(&announcement.commit, announcement.grace_secs, announcement.timestamp);
    let mut mac = HmacSha256::new_from_slice(old_membership_key).expect("HMAC accepts any key length");
    mac.update(&signing_bytes);
    mac.verify_slice(&announcement.signature)
        .map_err(|_| CryptoError::InvalidRotationSignature)
}

/// Check that `new_secret` matches a previously validated rotation commitment.
pub fn verify_new_secret(announcement: &RotationAnnouncement, new_secret: &str) -> bool {
    let commit: [u8; 32] = Sha256::digest(new_secret.as_bytes()).into();
    commit == announcement.commit
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x11; 32];
    const PUBKEY: &[u8] = b"pubkey-bytes";

    #[test]
    fn token_validates_across_hour_boundary() {
        let hour = 10 * 3600;
        let token = generate_membership_token(&KEY, PUBKEY, hour);
        assert!(validate_membership_token(&KEY, PUBKEY, &token, hour));
        assert!(validate_membership_token(&KEY, PUBKEY, &token, hour - 3600));
        assert!(validate_membership_token(&KEY, PUBKEY, &token, hour + 3600));
        assert!(!validate_membership_token(&KEY, PUBKEY, &token, hour + 2 * 3600));
    }

    #[test]
    fn rotation_roundtrips() {
        let now = 50_000;
        let announcement = generate_rotation_announcement(&KEY, "next-secret-long-enough", 3600, now);
        assert!(validate_rotation_announcement(&KEY, &announcement, now).is_ok());
        assert!(verify_new_secret(&announcement, "next-secret-long-enough"));
        assert!(!verify_new_secret(&announcement, "wrong-secret-long-enough"));
    }

    #[test]
    fn rotation_outside_window_is_rejected() {
        let now = 50_000;
        let announcement = generate_rotation_announcement(&KEY, "next-secret-long-enough", 3600, now);
        let err = validate_rotation_announcement(&KEY, &announcement, now + 3700).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadMessage);
    }

    #[test]
    fn rotation_signature_tampering_fails() {
        let now = 50_000;
        let mut announcement = generate_rotation_announcement(&KEY, "next-secret-long-enough", 3600, now);
        announcement.signature[0] ^= 0xff;
        assert!(validate_rotation_announcement(&KEY, &announcement, now).is_err());
    }
}
