//! Solana wallet ownership proofs.
//!
//! Agents prove control of a wallet by signing a server-issued message
//! containing a one-time nonce. Verification is plain Ed25519 over the UTF-8
//! message bytes, with the wallet address (base58) as the public key.

pub mod message;
pub mod signature;

pub use message::{build_auth_message, ChallengePurpose};
pub use signature::{canonical_wallet, decode_signature, verify_wallet_signature, SignatureError};
