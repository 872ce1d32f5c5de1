use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::types::ApiCredential;
use crate::db::{parse_timestamp, timestamp, Database};
use crate::error::{GateError, GateResult};

/// Persistence boundary for API credentials.
///
/// The authenticator only needs `find_by_hash` and `touch_last_used`; the
/// remaining operations back the key management routes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_hash(&self, key_hash: &str) -> GateResult<Option<ApiCredential>>;
    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> GateResult<()>;
    async fn insert(&self, credential: ApiCredential) -> GateResult<()>;
    /// Keys owned by `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str) -> GateResult<Vec<ApiCredential>>;
    /// Returns `false` when no key with that id belongs to the user.
    async fn delete_for_user(&self, id: &str, user_id: &str) -> GateResult<bool>;
    /// Keys with an expiry strictly after `now`. Keys without an expiry are
    /// not counted.
    async fn count_active_for_user(&self, user_id: &str, now: DateTime<Utc>) -> GateResult<usize>;
}

/// SQLite-backed credential store (`api_keys` table).
#[derive(Clone)]
pub struct SqliteCredentialStore {
    db: Database,
}

impl SqliteCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, name, key_hash, permissions, expires_at, last_used_at, created_at FROM api_keys";

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<(ApiCredential, RawColumns)> {
    let raw = RawColumns {
        permissions: row.get(4)?,
        expires_at: row.get(5)?,
        last_used_at: row.get(6)?,
        created_at: row.get(7)?,
    };
    let credential = ApiCredential {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        key_hash: row.get(3)?,
        permissions: Vec::new(),
        expires_at: None,
        last_used_at: None,
        created_at: Utc::now(),
    };
    Ok((credential, raw))
}

/// Permission and timestamp columns are parsed outside the rusqlite row
/// closure so that a corrupt value surfaces as a `GateError` instead of a
/// panic or silent default.
struct RawColumns {
    permissions: String,
    expires_at: Option<String>,
    last_used_at: Option<String>,
    created_at: String,
}

fn finish(parts: (ApiCredential, RawColumns)) -> GateResult<ApiCredential> {
    let (mut credential, raw) = parts;
    credential.permissions = serde_json::from_str(&raw.permissions)?;
    credential.expires_at = raw.expires_at.as_deref().map(parse_timestamp).transpose()?;
    credential.last_used_at = raw.last_used_at.as_deref().map(parse_timestamp).transpose()?;
    credential.created_at = parse_timestamp(&raw.created_at)?;
    Ok(credential)
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn find_by_hash(&self, key_hash: &str) -> GateResult<Option<ApiCredential>> {
        let key_hash = key_hash.to_string();
        self.db
            .call(move |conn| {
                let sql = format!("{} WHERE key_hash = ?1", SELECT_COLUMNS);
                conn.query_row(&sql, params![key_hash], credential_from_row)
                    .optional()?
                    .map(finish)
                    .transpose()
            })
            .await
    }

    async fn touch_last_used(&self, id: &str, at: DateTime<Utc>) -> GateResult<()> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
                    params![timestamp(at), id],
                )?;
                Ok(())
            })
            .await
    }

    async fn insert(&self, credential: ApiCredential) -> GateResult<()> {
        let permissions = serde_json::to_string(&credential.permissions)?;
        self.db
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO api_keys (id, user_id, name, key_hash, permissions, expires_at, last_used_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        credential.id,
                        credential.user_id,
                        credential.name,
                        credential.key_hash,
                        permissions,
                        credential.expires_at.map(timestamp),
                        credential.last_used_at.map(timestamp),
                        timestamp(credential.created_at),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Err(GateError::Conflict(format!("api key {}", credential.id)))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    async fn list_for_user(&self, user_id: &str) -> GateResult<Vec<ApiCredential>> {
        let user_id = user_id.to_string();
        self.db
            .call(move |conn| {
                let sql = format!(
                    "{} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
                    SELECT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![user_id], credential_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(finish).collect()
            })
            .await
    }

    async fn delete_for_user(&self, id: &str, user_id: &str) -> GateResult<bool> {
        let id = id.to_string();
        let user_id = user_id.to_string();
        self.db
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM api_keys WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                )?;
                Ok(removed > 0)
            })
            .await
    }

    async fn count_active_for_user(&self, user_id: &str, now: DateTime<Utc>) -> GateResult<usize> {
        let user_id = user_id.to_string();
        self.db
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM api_keys WHERE user_id = ?1 AND expires_at > ?2",
                    params![user_id, timestamp(now)],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
    }
}
