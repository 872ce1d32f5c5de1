//! Bearer API key authentication (RFC 6750 §2.1).
//!
//! Per RFC 7235 §2.1 the auth-scheme comparison is case-insensitive, so
//! `Bearer`, `bearer` and `BEARER` are all accepted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use chrono::Utc;

use crate::api_keys::{hash_key, CredentialStore, KEY_PREFIX};
use crate::usage::UsageWriter;

/// Identity attached to a request that passed authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedKey {
    pub user_id: String,
    pub key_id: String,
    pub permissions: Vec<String>,
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() > 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|t| !t.is_empty())
}

/// Validates API keys against a [`CredentialStore`].
///
/// Never errors: every failure (missing header, foreign prefix, unknown or
/// expired key, store outage) resolves to `None`.
pub struct KeyAuthenticator {
    store: Arc<dyn CredentialStore>,
    usage: UsageWriter,
    /// Last time a `last_used_at` write was queued, per key id.
    touched: Mutex<HashMap<String, Instant>>,
    touch_throttle: Duration,
}

impl KeyAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>, usage: UsageWriter, touch_throttle: Duration) -> Self {
        Self {
            store,
            usage,
            touched: Mutex::new(HashMap::new()),
            touch_throttle,
        }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Option<AuthenticatedKey> {
        let token = bearer_token(headers)?;
        self.authenticate_token(token).await
    }

    pub async fn authenticate_token(&self, token: &str) -> Option<AuthenticatedKey> {
        // Foreign tokens never reach the store.
        if !token.starts_with(KEY_PREFIX) {
            return None;
        }

        let hash = hash_key(token);
        let credential = match self.store.find_by_hash(&hash).await {
            Ok(Some(c)) => c,
            Ok(None) => return None,
            Err(e) => {
                log::error!("API key lookup failed, denying request: {}", e);
                return None;
            }
        };

        let now = Utc::now();
        if credential.is_expired_at(now) {
            log::info!("AUDIT DENIED key={} reason=expired", credential.id);
            return None;
        }

        if self.should_touch(&credential.id, Instant::now()) {
            self.usage.record(&credential.id, now);
        }

        Some(AuthenticatedKey {
            user_id: credential.user_id,
            key_id: credential.id,
            permissions: credential.permissions,
        })
    }

    /// Returns `true` (and arms the throttle) when no write for `key_id` was
    /// queued within the throttle window.
    fn should_touch(&self, key_id: &str, now: Instant) -> bool {
        let mut touched = self.touched.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = touched.get(key_id) {
            if now.saturating_duration_since(*prev) <= self.touch_throttle {
                return false;
            }
        }
        touched.insert(key_id.to_string(), now);
        true
    }

    /// Forget throttle marks older than the throttle window.
    pub fn prune_touches(&self) -> usize {
        self.prune_touches_at(Instant::now())
    }

    pub(crate) fn prune_touches_at(&self, now: Instant) -> usize {
        let mut touched = self.touched.lock().unwrap_or_else(|e| e.into_inner());
        let before = touched.len();
        let throttle = self.touch_throttle;
        touched.retain(|_, at| now.saturating_duration_since(*at) <= throttle);
        before - touched.len()
    }
}
