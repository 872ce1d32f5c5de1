//! Wallet-linked profiles and outstanding sign-in challenges.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::db::{parse_timestamp, timestamp, Database};
use crate::error::{GateError, GateResult};
use crate::wallet::ChallengePurpose;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: String,
    pub wallet_address: Option<String>,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn for_wallet(wallet: &str, display_name: Option<&str>) -> Self {
        let display_name = match display_name {
            Some(name) => name.to_string(),
            None => default_display_name(wallet),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            wallet_address: Some(wallet.to_string()),
            display_name,
            created_at: Utc::now(),
        }
    }
}

/// `Agent_` followed by the first eight characters of the wallet.
pub fn default_display_name(wallet: &str) -> String {
    let prefix: String = wallet.chars().take(8).collect();
    format!("Agent_{}", prefix)
}

#[derive(Clone)]
pub struct AccountStore {
    db: Database,
}

impl AccountStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find_by_wallet(&self, wallet: &str) -> GateResult<Option<Profile>> {
        let wallet = wallet.to_string();
        self.db
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, wallet_address, display_name, created_at
                         FROM profiles WHERE wallet_address = ?1",
                        params![wallet],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, Option<String>>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                            ))
                        },
                    )
                    .optional()?;
                row.map(|(id, wallet_address, display_name, created_at)| {
                    Ok(Profile {
                        id,
                        wallet_address,
                        display_name,
                        created_at: parse_timestamp(&created_at)?,
                    })
                })
                .transpose()
            })
            .await
    }

    /// Fails with `Conflict` when the wallet is already linked to a profile.
    pub async fn create_profile(&self, profile: Profile) -> GateResult<()> {
        self.db
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO profiles (id, wallet_address, display_name, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        profile.id,
                        profile.wallet_address,
                        profile.display_name,
                        timestamp(profile.created_at),
                    ],
                );
                match result {
                    Ok(_) => Ok(()),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Err(GateError::Conflict(format!(
                            "wallet {}",
                            profile.wallet_address.unwrap_or_default()
                        )))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    pub async fn delete_profile(&self, id: &str) -> GateResult<()> {
        let id = id.to_string();
        self.db
            .call(move |conn| {
                conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await
    }

    /// Store a challenge for `wallet`, replacing any outstanding one.
    pub async fn upsert_challenge(
        &self,
        wallet: &str,
        nonce: &str,
        purpose: ChallengePurpose,
        expires_at: DateTime<Utc>,
    ) -> GateResult<()> {
        let wallet = wallet.to_string();
        let nonce = nonce.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO auth_challenges (wallet, nonce, purpose, expires_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(wallet) DO UPDATE SET
                        nonce = excluded.nonce,
                        purpose = excluded.purpose,
                        expires_at = excluded.expires_at",
                    params![wallet, nonce, purpose.as_str(), timestamp(expires_at)],
                )?;
                Ok(())
            })
            .await
    }

    /// Atomically remove a matching, unexpired challenge. Returns `false`
    /// when there was nothing to consume (wrong nonce, wrong purpose,
    /// expired, or already used).
    pub async fn consume_challenge(
        &self,
        wallet: &str,
        nonce: &str,
        purpose: ChallengePurpose,
        now: DateTime<Utc>,
    ) -> GateResult<bool> {
        let wallet = wallet.to_string();
        let nonce = nonce.to_string();
        self.db
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM auth_challenges
                     WHERE wallet = ?1 AND nonce = ?2 AND purpose = ?3 AND expires_at > ?4",
                    params![wallet, nonce, purpose.as_str(), timestamp(now)],
                )?;
                Ok(removed > 0)
            })
            .await
    }

    /// Drop challenges that expired before `now`.
    pub async fn purge_expired_challenges(&self, now: DateTime<Utc>) -> GateResult<usize> {
        self.db
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM auth_challenges WHERE expires_at <= ?1",
                    params![timestamp(now)],
                )?;
                Ok(removed)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> AccountStore {
        AccountStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn default_name_uses_wallet_prefix() {
        assert_eq!(default_display_name("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU"), "Agent_7xKXtg2C");
        assert_eq!(Profile::for_wallet("abc", Some("Scout")).display_name, "Scout");
    }

    #[tokio::test]
    async fn profile_round_trip_and_duplicate_wallet() {
        let store = store();
        let profile = Profile::for_wallet("WalletOne", None);
        store.create_profile(profile.clone()).await.unwrap();

        let found = store.find_by_wallet("WalletOne").await.unwrap().unwrap();
        assert_eq!(found.id, profile.id);
        assert_eq!(found.display_name, "Agent_WalletOn");

        let dup = Profile::for_wallet("WalletOne", None);
        assert!(matches!(store.create_profile(dup).await, Err(GateError::Conflict(_))));

        store.delete_profile(&profile.id).await.unwrap();
        assert!(store.find_by_wallet("WalletOne").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn challenge_is_single_use() {
        let store = store();
        let now = Utc::now();
        store
            .upsert_challenge("w", "n1", ChallengePurpose::Login, now + Duration::minutes(10))
            .await
            .unwrap();

        assert!(store.consume_challenge("w", "n1", ChallengePurpose::Login, now).await.unwrap());
        assert!(!store.consume_challenge("w", "n1", ChallengePurpose::Login, now).await.unwrap());
    }

    #[tokio::test]
    async fn challenge_must_match_nonce_purpose_and_be_live() {
        let store = store();
        let now = Utc::now();
        store
            .upsert_challenge("w", "n1", ChallengePurpose::Register, now + Duration::minutes(10))
            .await
            .unwrap();

        assert!(!store.consume_challenge("w", "other", ChallengePurpose::Register, now).await.unwrap());
        assert!(!store.consume_challenge("w", "n1", ChallengePurpose::Login, now).await.unwrap());
        let later = now + Duration::minutes(11);
        assert!(!store.consume_challenge("w", "n1", ChallengePurpose::Register, later).await.unwrap());
    }

    #[tokio::test]
    async fn new_challenge_replaces_old_one() {
        let store = store();
        let now = Utc::now();
        let exp = now + Duration::minutes(10);
        store.upsert_challenge("w", "first", ChallengePurpose::Login, exp).await.unwrap();
        store.upsert_challenge("w", "second", ChallengePurpose::Login, exp).await.unwrap();

        assert!(!store.consume_challenge("w", "first", ChallengePurpose::Login, now).await.unwrap());
        assert!(store.consume_challenge("w", "second", ChallengePurpose::Login, now).await.unwrap());
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = store();
        let now = Utc::now();
        store.upsert_challenge("a", "n", ChallengePurpose::Login, now - Duration::minutes(1)).await.unwrap();
        store.upsert_challenge("b", "n", ChallengePurpose::Login, now + Duration::minutes(1)).await.unwrap();

        assert_eq!(store.purge_expired_challenges(now).await.unwrap(), 1);
        assert!(store.consume_challenge("b", "n", ChallengePurpose::Login, now).await.unwrap());
    }
}
