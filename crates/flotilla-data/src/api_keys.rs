//! API key store; keys are stored as argon2 hashes only.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::error::{StoreError, StoreResult};
use crate::instances::{format_ts, parse_ts};

const KEY_LENGTH: usize = 40;

/// Persisted API key metadata; the key itself is shown once at creation.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    /// Row id.
    pub id: i64,
    /// Operator-facing label, unique.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last successful authentication.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Store over the `api_keys` table.
#[derive(Clone)]
pub struct ApiKeyStore {
    pool: SqlitePool,
}

impl ApiKeyStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Mint a key under the given label and return `(record, plaintext)`.
    /// The plaintext is never stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] on a duplicate label.
    pub async fn create(&self, name: &str) -> StoreResult<(ApiKeyRecord, String)> {
        let plaintext: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(KEY_LENGTH)
            .map(char::from)
            .collect();
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|err| StoreError::Corrupt {
                detail: format!("api key hashing failed: {err}"),
            })?
            .to_string();

        let now = format_ts(Utc::now());
        let result = sqlx::query(
            "INSERT INTO api_keys (name, key_hash, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(name)
        .bind(&hash)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::on_insert("api key", name, err))?;

        let record = self.get(result.last_insert_rowid()).await?;
        Ok((record, plaintext))
    }

    /// Fetch one key record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn get(&self, id: i64) -> StoreResult<ApiKeyRecord> {
        let row = sqlx::query(
            "SELECT id, name, created_at, last_used_at FROM api_keys WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| decode_key(&row))
            .transpose()?
            .ok_or(StoreError::NotFound {
                entity: "api key",
                id,
            })
    }

    /// List key metadata ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self) -> StoreResult<Vec<ApiKeyRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, last_used_at FROM api_keys ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_key).collect()
    }

    /// Verify a presented key against every stored hash, stamping
    /// `last_used_at` on success.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn verify(&self, presented: &str) -> StoreResult<Option<ApiKeyRecord>> {
        let rows = sqlx::query("SELECT id, key_hash FROM api_keys")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let stored: String = row.try_get("key_hash")?;
            let Ok(parsed) = PasswordHash::new(&stored) else {
                continue;
            };
            if Argon2::default()
                .verify_password(presented.as_bytes(), &parsed)
                .is_ok()
            {
                sqlx::query("UPDATE api_keys SET last_used_at = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(format_ts(Utc::now()))
                    .execute(&self.pool)
                    .await?;
                return Ok(Some(self.get(id).await?));
            }
        }
        Ok(None)
    }

    /// Revoke a key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn delete(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "api key",
                id,
            });
        }
        Ok(())
    }
}

fn decode_key(row: &SqliteRow) -> StoreResult<ApiKeyRecord> {
    let created_at: String = row.try_get("created_at")?;
    let last_used_at: Option<String> = row.try_get("last_used_at")?;
    Ok(ApiKeyRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: parse_ts(&created_at),
        last_used_at: last_used_at.as_deref().map(parse_ts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn minted_keys_verify_and_stamp_usage() {
        let db = Database::open_in_memory().await.expect("open");
        let store = db.api_keys();
        let (record, plaintext) = store.create("automation").await.expect("create");
        assert_eq!(plaintext.len(), KEY_LENGTH);
        assert!(record.last_used_at.is_none());

        let verified = store
            .verify(&plaintext)
            .await
            .expect("verify")
            .expect("match");
        assert_eq!(verified.id, record.id);
        assert!(verified.last_used_at.is_some());
    }

    #[tokio::test]
    async fn wrong_keys_do_not_verify() {
        let db = Database::open_in_memory().await.expect("open");
        let store = db.api_keys();
        store.create("automation").await.expect("create");
        assert!(store.verify("nonsense").await.expect("verify").is_none());
    }
}
