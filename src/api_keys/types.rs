use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored API key record. Contains the key hash, never raw key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCredential {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Owning profile.
    pub user_id: String,
    /// Human-readable label (e.g. "wallet-login").
    pub name: String,
    /// SHA-256 hex digest of the full raw key.
    pub key_hash: String,
    /// Granted capabilities. Normally a subset of `read`, `write`, `admin`;
    /// unknown strings are kept as-is and simply never match a requirement.
    pub permissions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiCredential {
    pub fn new(
        user_id: &str,
        name: &str,
        key_hash: String,
        permissions: Vec<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            key_hash,
            permissions,
            expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }

    pub fn summary(&self) -> KeySummary {
        KeySummary {
            id: self.id.clone(),
            name: self.name.clone(),
            permissions: self.permissions.clone(),
            last_used_at: self.last_used_at,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Listing view of a key: everything except the hash.
#[derive(Debug, Clone, Serialize)]
pub struct KeySummary {
    pub id: String,
    pub name: String,
    pub permissions: Vec<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}
