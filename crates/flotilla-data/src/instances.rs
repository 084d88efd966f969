//! Instance registry store.

use chrono::{DateTime, Utc};
use flotilla_core::Instance;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::error::{StoreError, StoreResult};

const INSTANCE_COLUMNS: &str = r"
    id,
    name,
    base_url,
    username,
    encrypted_password,
    basic_username,
    encrypted_basic_password,
    tls_skip_verify,
    has_local_filesystem_access,
    enabled,
    created_at,
    updated_at
";

/// Input for registering a new instance. Credentials arrive already
/// encrypted.
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// Display name, unique across the registry.
    pub name: String,
    /// Base URL of the upstream WebUI.
    pub base_url: String,
    /// WebUI username.
    pub username: String,
    /// AEAD ciphertext of the WebUI password.
    pub encrypted_password: String,
    /// Optional basic-auth username.
    pub basic_username: Option<String>,
    /// Optional AEAD ciphertext of the basic-auth password.
    pub encrypted_basic_password: Option<String>,
    /// Skip TLS verification.
    pub tls_skip_verify: bool,
    /// Whether this process can read the upstream's filesystem.
    pub has_local_filesystem_access: bool,
    /// Whether the instance starts enabled.
    pub enabled: bool,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct InstancePatch {
    /// New display name.
    pub name: Option<String>,
    /// New base URL.
    pub base_url: Option<String>,
    /// New WebUI username.
    pub username: Option<String>,
    /// New encrypted WebUI password.
    pub encrypted_password: Option<String>,
    /// New basic-auth username (`Some(None)` clears it).
    pub basic_username: Option<Option<String>>,
    /// New encrypted basic-auth password (`Some(None)` clears it).
    pub encrypted_basic_password: Option<Option<String>>,
    /// New TLS flag.
    pub tls_skip_verify: Option<bool>,
    /// New filesystem access flag.
    pub has_local_filesystem_access: Option<bool>,
    /// New enabled flag.
    pub enabled: Option<bool>,
}

/// Store over the `instances` table.
#[derive(Clone)]
pub struct InstanceStore {
    pool: SqlitePool,
}

impl InstanceStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a new instance and return the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] on a duplicate name.
    pub async fn create(&self, input: NewInstance) -> StoreResult<Instance> {
        let now = Utc::now();
        let result = sqlx::query(
            r"
            INSERT INTO instances (
                name, base_url, username, encrypted_password,
                basic_username, encrypted_basic_password,
                tls_skip_verify, has_local_filesystem_access, enabled,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ",
        )
        .bind(&input.name)
        .bind(&input.base_url)
        .bind(&input.username)
        .bind(&input.encrypted_password)
        .bind(&input.basic_username)
        .bind(&input.encrypted_basic_password)
        .bind(input.tls_skip_verify)
        .bind(input.has_local_filesystem_access)
        .bind(input.enabled)
        .bind(format_ts(now))
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::on_insert("instance", &input.name, err))?;

        self.get(result.last_insert_rowid()).await
    }

    /// Fetch one instance by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn get(&self, id: i64) -> StoreResult<Instance> {
        self.find(id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "instance",
                id,
            })
    }

    /// Fetch one instance by id, returning `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn find(&self, id: i64) -> StoreResult<Option<Instance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| decode_instance(&row)).transpose()
    }

    /// List every registered instance ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self) -> StoreResult<Vec<Instance>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_instance).collect()
    }

    /// Apply a partial update and return the new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn update(&self, id: i64, patch: InstancePatch) -> StoreResult<Instance> {
        let mut current = self.get(id).await?;
        if let Some(name) = patch.name {
            current.name = name;
        }
        if let Some(base_url) = patch.base_url {
            current.base_url = base_url;
        }
        if let Some(username) = patch.username {
            current.username = username;
        }
        if let Some(encrypted_password) = patch.encrypted_password {
            current.encrypted_password = encrypted_password;
        }
        if let Some(basic_username) = patch.basic_username {
            current.basic_username = basic_username;
        }
        if let Some(encrypted_basic_password) = patch.encrypted_basic_password {
            current.encrypted_basic_password = encrypted_basic_password;
        }
        if let Some(tls_skip_verify) = patch.tls_skip_verify {
            current.tls_skip_verify = tls_skip_verify;
        }
        if let Some(access) = patch.has_local_filesystem_access {
            current.has_local_filesystem_access = access;
        }
        if let Some(enabled) = patch.enabled {
            current.enabled = enabled;
        }

        let now = Utc::now();
        sqlx::query(
            r"
            UPDATE instances SET
                name = ?2,
                base_url = ?3,
                username = ?4,
                encrypted_password = ?5,
                basic_username = ?6,
                encrypted_basic_password = ?7,
                tls_skip_verify = ?8,
                has_local_filesystem_access = ?9,
                enabled = ?10,
                updated_at = ?11
            WHERE id = ?1
            ",
        )
        .bind(id)
        .bind(&current.name)
        .bind(&current.base_url)
        .bind(&current.username)
        .bind(&current.encrypted_password)
        .bind(&current.basic_username)
        .bind(&current.encrypted_basic_password)
        .bind(current.tls_skip_verify)
        .bind(current.has_local_filesystem_access)
        .bind(current.enabled)
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?;

        self.get(id).await
    }

    /// Delete an instance; rules cascade.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn delete(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM instances WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "instance",
                id,
            });
        }
        Ok(())
    }
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn decode_instance(row: &SqliteRow) -> StoreResult<Instance> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(Instance {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        base_url: row.try_get("base_url")?,
        username: row.try_get("username")?,
        encrypted_password: row.try_get("encrypted_password")?,
        basic_username: row.try_get("basic_username")?,
        encrypted_basic_password: row.try_get("encrypted_basic_password")?,
        tls_skip_verify: row.try_get("tls_skip_verify")?,
        has_local_filesystem_access: row.try_get("has_local_filesystem_access")?,
        enabled: row.try_get("enabled")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn sample(name: &str) -> NewInstance {
        NewInstance {
            name: name.to_string(),
            base_url: "http://localhost:8080".to_string(),
            username: "admin".to_string(),
            encrypted_password: "ciphertext".to_string(),
            basic_username: None,
            encrypted_basic_password: None,
            tls_skip_verify: false,
            has_local_filesystem_access: false,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn create_get_list_round_trip() {
        let db = Database::open_in_memory().await.expect("open");
        let store = db.instances();

        let created = store.create(sample("box-a")).await.expect("create");
        assert!(created.id > 0);
        assert_eq!(created.name, "box-a");
        assert!(created.enabled);

        let fetched = store.get(created.id).await.expect("get");
        assert_eq!(fetched.base_url, "http://localhost:8080");

        let listed = store.list().await.expect("list");
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let db = Database::open_in_memory().await.expect("open");
        let store = db.instances();
        store.create(sample("dupe")).await.expect("first");
        let err = store.create(sample("dupe")).await.expect_err("second");
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn patch_updates_only_named_fields() {
        let db = Database::open_in_memory().await.expect("open");
        let store = db.instances();
        let created = store.create(sample("box-b")).await.expect("create");

        let patch = InstancePatch {
            enabled: Some(false),
            ..InstancePatch::default()
        };
        let updated = store.update(created.id, patch).await.expect("update");
        assert!(!updated.enabled);
        assert_eq!(updated.name, "box-b");
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let db = Database::open_in_memory().await.expect("open");
        let err = db.instances().delete(99).await.expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }
}
