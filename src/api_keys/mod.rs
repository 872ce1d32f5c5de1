//! API key credentials for the versioned REST API.
//!
//! Callers authenticate with `Authorization: Bearer km_...` (RFC 6750 §2.1).
//! Only the SHA-256 digest of a key is ever stored; the raw value is returned
//! once, at issuance.

pub mod keys;
pub mod memory;
pub mod store;
pub mod types;

pub use keys::{generate_api_key, hash_key, GeneratedKey, KEY_PREFIX};
pub use memory::InMemoryCredentialStore;
pub use store::{CredentialStore, SqliteCredentialStore};
pub use types::{ApiCredential, KeySummary};
