//! Binary load/store of the predictor's byte-footprint estimate.
//!
//! Format: `MAGIC (4 bytes) | VERSION (1 byte) | predicted_bytes: u64 LE |
//! HMAC-SHA256(secret_key, MAGIC..predicted_bytes)[..4]`.
//!
//! The codec is deliberately minimal — the predictor's state is a single
//! number, and durability/versioning/atomicity beyond the magic+version tag
//! and the integrity tag are intentionally not provided. A corrupt file,
//! a stale format, or a key that no longer matches all degrade to a cold
//! start rather than to incorrect operation.

use std::path::Path;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

const MAGIC: [u8; 4] = *b"AARN";
const VERSION: u8 = 1;
const TAG_LEN: usize = 4;
const PAYLOAD_LEN: usize = MAGIC.len() + 1 + 8; // magic + version + u64
const FILE_LEN: usize = PAYLOAD_LEN + TAG_LEN;

fn tag(secret_key: &[u8], payload: &[u8]) -> [u8; TAG_LEN] {
    let mut mac = HmacSha256::new_from_slice(secret_key).expect("HMAC accepts any key length");
    mac.update(payload);
    let full = mac.finalize().into_bytes();
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&full[..TAG_LEN]);
    out
}

/// Saves `predicted_bytes` to `path`, tagged with `secret_key`.
///
/// Returns `false` (never an error) on any I/O failure — save failure is
/// non-fatal; it simply means this session's learning progress is discarded.
pub fn save(path: &Path, secret_key: &str, predicted_bytes: u64) -> bool {
    let mut payload = Vec::with_capacity(PAYLOAD_LEN);
    payload.extend_from_slice(&MAGIC);
    payload.push(VERSION);
    payload.extend_from_slice(&predicted_bytes.to_le_bytes());

    let tag = tag(secret_key.as_bytes(), &payload);
    payload.extend_from_slice(&tag);

    match std::fs::write(path, &payload) {
        Ok(()) => {
            debug!(path = %path.display(), predicted_bytes, "persisted predictor state");
            true
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to persist predictor state");
            false
        }
    }
}

/// Loads a previously-saved `predicted_bytes` from `path`, verifying the
/// integrity tag against `secret_key`.
///
/// Returns `None` on any failure: missing file, open failure, short read,
/// unrecognized magic/version, or a tag mismatch (stale key or corruption).
/// All of these degrade to a cold start, never to a wrong value.
pub fn load(path: &Path, secret_key: &str) -> Option<u64> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(err) => {
            debug!(path = %path.display(), %err, "no persisted predictor state, cold start");
            return None;
        }
    };

    if bytes.len() != FILE_LEN {
        warn!(path = %path.display(), len = bytes.len(), "persisted state has unexpected length, cold start");
        return None;
    }

    let payload = &bytes[..PAYLOAD_LEN];
    if payload[..MAGIC.len()] != MAGIC {
        warn!(path = %path.display(), "persisted state has bad magic, cold start");
        return None;
    }
    if payload[MAGIC.len()] != VERSION {
        warn!(path = %path.display(), version = payload[MAGIC.len()], "persisted state has unsupported version, cold start");
        return None;
    }

    let expected_tag = &bytes[PAYLOAD_LEN..];
    let actual_tag = tag(secret_key.as_bytes(), payload);
    if actual_tag != expected_tag {
        warn!(path = %path.display(), "persisted state failed integrity check, cold start");
        return None;
    }

    let mut word = [0u8; 8];
    word.copy_from_slice(&payload[MAGIC.len() + 1..]);
    let predicted_bytes = u64::from_le_bytes(word);
    debug!(path = %path.display(), predicted_bytes, "restored predictor state");
    Some(predicted_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");

        assert!(save(&path, "secret", 123_456_789));
        assert_eq!(load(&path, "secret"), Some(123_456_789));
    }

    #[test]
    fn load_missing_file_returns_none() {
        crate::test_support::init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.bin");
        assert_eq!(load(&path, "secret"), None);
    }

    #[test]
    fn load_with_wrong_key_fails_closed() {
        crate::test_support::init();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");

        assert!(save(&path, "right-key", 42));
        assert_eq!(load(&path, "wrong-key"), None);
    }

    #[test]
    fn load_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");
        std::fs::write(&path, b"short").unwrap();
        assert_eq!(load(&path, "secret"), None);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin");
        assert!(save(&path, "secret", 7));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();
        assert_eq!(load(&path, "secret"), None);
    }
}
