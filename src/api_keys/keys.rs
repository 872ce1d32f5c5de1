//! Key generation and hashing.
//!
//! # Key format
//!
//! `km_` prefix + 32 random bytes as lowercase hex (67 chars total, 256 bits
//! of entropy). The prefix lets the authenticator reject foreign tokens
//! without touching the credential store.
//!
//! # Hash storage
//!
//! Raw keys are hashed with SHA-256 (lowercase hex) before persistence. The
//! hash is the lookup key, so validation never needs the raw value at rest.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Fixed prefix for all KnowMint API keys.
pub const KEY_PREFIX: &str = "km_";

const KEY_RANDOM_BYTES: usize = 32;

/// A freshly issued key. `raw` is shown to the caller exactly once; `hash`
/// is what gets stored.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub raw: String,
    pub hash: String,
}

/// Generate a raw API key and its storage hash.
/// Uses `rand::rng()`, which is backed by a CSPRNG.
pub fn generate_api_key() -> GeneratedKey {
    let mut bytes = [0u8; KEY_RANDOM_BYTES];
    rand::rng().fill(&mut bytes);
    let raw = format!("{}{}", KEY_PREFIX, to_hex(&bytes));
    let hash = hash_key(&raw);
    GeneratedKey { raw, hash }
}

/// SHA-256 hex digest of the full raw key (prefix included).
pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_expected_shape() {
        let key = generate_api_key();
        assert!(key.raw.starts_with(KEY_PREFIX));
        assert_eq!(key.raw.len(), 3 + 64);
        assert!(key.raw[3..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(key.hash.len(), 64);
    }

    #[test]
    fn hash_matches_raw() {
        let key = generate_api_key();
        assert_eq!(hash_key(&key.raw), key.hash);
    }

    #[test]
    fn hashing_is_deterministic() {
        let raw = "km_0123456789abcdef";
        assert_eq!(hash_key(raw), hash_key(raw));
    }

    #[test]
    fn independent_keys_differ() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.raw, b.raw);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn known_digest() {
        // sha256("abc")
        assert_eq!(
            hash_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hex_encoding_pads_bytes() {
        assert_eq!(to_hex(&[0x00, 0x0f, 0xab]), "000fab");
    }
}
