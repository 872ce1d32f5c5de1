use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

pub const SIGNATURE_LEN: usize = 64;
pub const PUBLIC_KEY_LEN: usize = 32;

/// Accepts 128 hex characters or canonical base64, either decoding to
/// exactly 64 bytes.
pub fn decode_signature(encoded: &str) -> Option<[u8; SIGNATURE_LEN]> {
    if encoded.len() == SIGNATURE_LEN * 2 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
        return decode_hex(encoded).and_then(|bytes| bytes.try_into().ok());
    }
    let bytes = STANDARD.decode(encoded).ok()?;
    // Reject non-canonical encodings (stray padding bits etc.)
    if STANDARD.encode(&bytes) != encoded {
        return None;
    }
    bytes.try_into().ok()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Decode a base58 wallet address into its 32 public-key bytes. Only the
/// canonical spelling is accepted, so one wallet has one address string.
pub fn canonical_wallet(address: &str) -> Option<[u8; PUBLIC_KEY_LEN]> {
    if !(32..=44).contains(&address.len()) {
        return None;
    }
    let bytes = bs58::decode(address).into_vec().ok()?;
    if bs58::encode(&bytes).into_string() != address {
        return None;
    }
    bytes.try_into().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Invalid wallet address")]
    InvalidWallet,
    #[error("Invalid signature encoding")]
    InvalidEncoding,
    #[error("Wallet is not a valid Ed25519 public key")]
    InvalidPublicKey,
    #[error("Signature verification failed")]
    Mismatch,
}

/// Verify an Ed25519 signature over `message` by the wallet's key.
pub fn verify_wallet_signature(
    wallet: &str,
    message: &str,
    signature: &str,
) -> Result<(), SignatureError> {
    let public_key = canonical_wallet(wallet).ok_or(SignatureError::InvalidWallet)?;
    let sig_bytes = decode_signature(signature).ok_or(SignatureError::InvalidEncoding)?;
    let key = VerifyingKey::from_bytes(&public_key).map_err(|_| SignatureError::InvalidPublicKey)?;
    key.verify(message.as_bytes(), &Signature::from_bytes(&sig_bytes))
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{build_auth_message, ChallengePurpose};
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair(seed: u8) -> (SigningKey, String) {
        let signing = SigningKey::from_bytes(&[seed; 32]);
        let wallet = bs58::encode(signing.verifying_key().to_bytes()).into_string();
        (signing, wallet)
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn hex_and_base64_signatures_verify() {
        let (signing, wallet) = keypair(7);
        let message = build_auth_message(&wallet, "nonce-1", ChallengePurpose::Login);
        let sig = signing.sign(message.as_bytes()).to_bytes();

        assert_eq!(verify_wallet_signature(&wallet, &message, &hex(&sig)), Ok(()));
        assert_eq!(verify_wallet_signature(&wallet, &message, &hex(&sig).to_uppercase()), Ok(()));
        assert_eq!(verify_wallet_signature(&wallet, &message, &STANDARD.encode(sig)), Ok(()));
    }

    #[test]
    fn signature_over_other_message_fails() {
        let (signing, wallet) = keypair(7);
        let login = build_auth_message(&wallet, "nonce-1", ChallengePurpose::Login);
        let register = build_auth_message(&wallet, "nonce-1", ChallengePurpose::Register);
        let sig = hex(&signing.sign(register.as_bytes()).to_bytes());
        assert_eq!(verify_wallet_signature(&wallet, &login, &sig), Err(SignatureError::Mismatch));
    }

    #[test]
    fn signature_from_other_wallet_fails() {
        let (signing, _) = keypair(7);
        let (_, other_wallet) = keypair(8);
        let message = "hello";
        let sig = hex(&signing.sign(message.as_bytes()).to_bytes());
        assert_eq!(verify_wallet_signature(&other_wallet, message, &sig), Err(SignatureError::Mismatch));
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        assert!(decode_signature("").is_none());
        assert!(decode_signature(&"zz".repeat(64)).is_none());
        assert!(decode_signature(&"ab".repeat(63)).is_none());
        // Valid base64 but only 32 bytes
        assert!(decode_signature(&STANDARD.encode([1u8; 32])).is_none());
        assert_eq!(decode_signature(&"ab".repeat(64)), Some([0xab; 64]));
    }

    #[test]
    fn non_canonical_base64_is_rejected() {
        let canonical = STANDARD.encode([0u8; 64]);
        assert!(decode_signature(&canonical).is_some());
        // Same bytes with the unused low bits of the last symbol set
        let mut tweaked = canonical.clone();
        tweaked.replace_range(canonical.len() - 3..canonical.len() - 2, "B");
        assert!(decode_signature(&tweaked).is_none());
    }

    #[test]
    fn wallet_addresses_must_be_canonical_base58() {
        let (_, wallet) = keypair(3);
        assert!(canonical_wallet(&wallet).is_some());
        // 0, O, I and l are not in the base58 alphabet
        assert!(canonical_wallet(&"0".repeat(44)).is_none());
        assert!(canonical_wallet("short").is_none());
        assert!(canonical_wallet(&"1".repeat(45)).is_none());
        // Decodes, but to fewer than 32 bytes
        assert!(canonical_wallet(&"2".repeat(32)).is_none());
    }

    #[test]
    fn malformed_inputs_report_why() {
        assert_eq!(
            verify_wallet_signature("not-a-wallet", "m", &"ab".repeat(64)),
            Err(SignatureError::InvalidWallet)
        );
        let (_, wallet) = keypair(3);
        assert_eq!(
            verify_wallet_signature(&wallet, "m", "not base64!"),
            Err(SignatureError::InvalidEncoding)
        );
    }
}
