use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;

use super::store::CredentialStore;
use super::types::ApiCredential;
use crate::error::{GateError, GateResult};

/// Process-local credential store.
///
/// Used by tests and embedders without a database. Counts hash lookups so callers
/// can assert that cheap rejections never reach the store, and can be told to
/// fail lookups to exercise fail-closed paths.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    keys: RwLock<Vec<ApiCredential>>,
    lookups: AtomicUsize,
    fail_lookups: AtomicBool,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find_by_hash` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Make every subsequent `find_by_hash` return an error.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<ApiCredential> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|k| k.id == id)
            .cloned()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_hash(&self, key_hash: &str) -> GateResult<Option<ApiCredential>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(GateError::Other("credential store unavailable".into()));
        }
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        Ok(keys
            .iter()
            .find(|k| bool::from(k.key_hash.as_bytes().ct_eq(key_hash.as_bytes())))
            .cloned())
    }

    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> GateResult<()> {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = keys.iter_mut().find(|k| k.id == id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn insert(&self, credential: ApiCredential) -> GateResult<()> {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if keys
            .iter()
            .any(|k| k.id == credential.id || k.key_hash == credential.key_hash)
        {
            return Err(GateError::Conflict(format!("api key {}", credential.id)));
        }
        keys.push(credential);
        Ok(())
    }

    async fn list_for_user(&self, user_id: &str) -> GateResult<Vec<ApiCredential>> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let mut owned: Vec<ApiCredential> =
            keys.iter().filter(|k| k.user_id == user_id).cloned().collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn delete_for_user(&self, id: &str, user_id: &str) -> GateResult<bool> {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        let before = keys.len();
        keys.retain(|k| !(k.id == id && k.user_id == user_id));
        Ok(keys.len() < before)
    }

    async fn count_active_for_user(&self, user_id: &str, now: DateTime<Utc>) -> GateResult<usize> {
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        Ok(keys
            .iter()
            .filter(|k| k.user_id == user_id && k.expires_at.is_some_and(|exp| exp > now))
            .count())
    }
}
