//! Cache-key hash strategies.
//!
//! Four interchangeable strategies map a query payload to a key suffix. The
//! fast fingerprints trade collision resistance for very short keys and are
//! meant for bounded, low-cardinality query sets; `Secure` is collision
//! resistant and suited to payloads that embed user input; `Full` keeps the
//! payload verbatim and can never collide.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use sha2::{Digest, Sha512};

const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Strategy used to turn a query payload into a cache-key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    /// 32-bit non-cryptographic fingerprint, base-62 encoded.
    Fast32,
    /// 64-bit non-cryptographic fingerprint, base-62 encoded.
    Fast64,
    /// SHA-512 digest, base64 encoded.
    Secure,
    /// Identity: the payload itself becomes the key suffix.
    Full,
}

/// Hash `payload` with the given strategy.
///
/// Pure and deterministic; the empty payload is legal input.
pub fn hash_payload(payload: &str, kind: HashKind) -> String {
    match kind {
        HashKind::Fast32 => encode_base62(u64::from(fingerprint32(payload))),
        HashKind::Fast64 => encode_base62(fingerprint64(payload)),
        HashKind::Secure => {
            let mut hasher = Sha512::new();
            hasher.update(payload.as_bytes());
            STANDARD.encode(hasher.finalize())
        }
        HashKind::Full => payload.to_string(),
    }
}

fn fingerprint64(payload: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

fn fingerprint32(payload: &str) -> u32 {
    let wide = fingerprint64(payload);
    ((wide >> 32) ^ wide) as u32
}

/// Encode into the `0-9A-Za-z` alphabet, most significant digit first.
fn encode_base62(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE62_ALPHABET[(value % 62) as usize] as char);
        value /= 62;
    }
    digits.iter().rev().collect()
}
