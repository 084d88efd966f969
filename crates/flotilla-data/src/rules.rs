//! Automation rule store.
//!
//! The condition tree is persisted as a JSON column; the rules crate owns
//! its typed shape and this store treats it as opaque.

use chrono::Utc;
use serde_json::Value;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::error::{StoreError, StoreResult};
use crate::instances::{format_ts, parse_ts};

const RULE_COLUMNS: &str = r"
    id,
    instance_id,
    name,
    enabled,
    dry_run,
    sort_order,
    tracker_scope,
    interval_seconds,
    conditions,
    free_space_source,
    created_at,
    updated_at
";

/// Persisted rule row; `conditions` is the serialized action-condition
/// payload.
#[derive(Debug, Clone)]
pub struct RuleRow {
    /// Rule id.
    pub id: i64,
    /// Owning instance id.
    pub instance_id: i64,
    /// Operator-facing name.
    pub name: String,
    /// Whether the scheduler evaluates this rule.
    pub enabled: bool,
    /// Log planned actions without dispatching them.
    pub dry_run: bool,
    /// Evaluation order within the instance, ascending.
    pub sort_order: i64,
    /// `*` or a comma-joined domain list.
    pub tracker_scope: String,
    /// Seconds between scheduled evaluations.
    pub interval_seconds: i64,
    /// Serialized action-condition payload.
    pub conditions: Value,
    /// `qbittorrent` (default when `None`) or `path:<absolute>`.
    pub free_space_source: Option<String>,
    /// Creation timestamp (RFC 3339).
    pub created_at: chrono::DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: chrono::DateTime<Utc>,
}

/// Input for persisting a new rule; validation happens before this layer.
#[derive(Debug, Clone)]
pub struct NewRuleRow {
    /// Owning instance id.
    pub instance_id: i64,
    /// Operator-facing name.
    pub name: String,
    /// Whether the scheduler evaluates this rule.
    pub enabled: bool,
    /// Log planned actions without dispatching them.
    pub dry_run: bool,
    /// Evaluation order within the instance.
    pub sort_order: i64,
    /// `*` or a comma-joined domain list.
    pub tracker_scope: String,
    /// Seconds between scheduled evaluations.
    pub interval_seconds: i64,
    /// Serialized action-condition payload.
    pub conditions: Value,
    /// Optional free-space source override.
    pub free_space_source: Option<String>,
}

/// Partial rule update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct RuleRowPatch {
    /// New name.
    pub name: Option<String>,
    /// New enabled flag.
    pub enabled: Option<bool>,
    /// New dry-run flag.
    pub dry_run: Option<bool>,
    /// New evaluation order.
    pub sort_order: Option<i64>,
    /// New tracker scope.
    pub tracker_scope: Option<String>,
    /// New evaluation interval.
    pub interval_seconds: Option<i64>,
    /// New serialized condition payload.
    pub conditions: Option<Value>,
    /// New free-space source (`Some(None)` resets to the default).
    pub free_space_source: Option<Option<String>>,
}

/// Store over the `rules` table.
#[derive(Clone)]
pub struct RuleStore {
    pool: SqlitePool,
}

impl RuleStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new rule and return the stored row.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails.
    pub async fn create(&self, input: NewRuleRow) -> StoreResult<RuleRow> {
        let now = Utc::now();
        let conditions = input.conditions.to_string();
        let result = sqlx::query(
            r"
            INSERT INTO rules (
                instance_id, name, enabled, dry_run, sort_order,
                tracker_scope, interval_seconds, conditions,
                free_space_source, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ",
        )
        .bind(input.instance_id)
        .bind(&input.name)
        .bind(input.enabled)
        .bind(input.dry_run)
        .bind(input.sort_order)
        .bind(&input.tracker_scope)
        .bind(input.interval_seconds)
        .bind(conditions)
        .bind(&input.free_space_source)
        .bind(format_ts(now))
        .execute(&self.pool)
        .await?;

        self.get(result.last_insert_rowid()).await
    }

    /// Fetch one rule by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn get(&self, id: i64) -> StoreResult<RuleRow> {
        let row = sqlx::query(&format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| decode_rule(&row))
            .transpose()?
            .ok_or(StoreError::NotFound { entity: "rule", id })
    }

    /// List rules for one instance in evaluation order.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list_for_instance(&self, instance_id: i64) -> StoreResult<Vec<RuleRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE instance_id = ?1 ORDER BY sort_order, id"
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_rule).collect()
    }

    /// List every rule across all instances in evaluation order.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list_all(&self) -> StoreResult<Vec<RuleRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {RULE_COLUMNS} FROM rules ORDER BY instance_id, sort_order, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_rule).collect()
    }

    /// Apply a partial update and return the new row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn update(&self, id: i64, patch: RuleRowPatch) -> StoreResult<RuleRow> {
        let mut current = self.get(id).await?;
        if let Some(name) = patch.name {
            current.name = name;
        }
        if let Some(enabled) = patch.enabled {
            current.enabled = enabled;
        }
        if let Some(dry_run) = patch.dry_run {
            current.dry_run = dry_run;
        }
        if let Some(sort_order) = patch.sort_order {
            current.sort_order = sort_order;
        }
        if let Some(tracker_scope) = patch.tracker_scope {
            current.tracker_scope = tracker_scope;
        }
        if let Some(interval_seconds) = patch.interval_seconds {
            current.interval_seconds = interval_seconds;
        }
        if let Some(conditions) = patch.conditions {
            current.conditions = conditions;
        }
        if let Some(free_space_source) = patch.free_space_source {
            current.free_space_source = free_space_source;
        }

        sqlx::query(
            r"
            UPDATE rules SET
                name = ?2,
                enabled = ?3,
                dry_run = ?4,
                sort_order = ?5,
                tracker_scope = ?6,
                interval_seconds = ?7,
                conditions = ?8,
                free_space_source = ?9,
                updated_at = ?10
            WHERE id = ?1
            ",
        )
        .bind(id)
        .bind(&current.name)
        .bind(current.enabled)
        .bind(current.dry_run)
        .bind(current.sort_order)
        .bind(&current.tracker_scope)
        .bind(current.interval_seconds)
        .bind(current.conditions.to_string())
        .bind(&current.free_space_source)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        self.get(id).await
    }

    /// Delete a rule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn delete(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "rule", id });
        }
        Ok(())
    }
}

fn decode_rule(row: &SqliteRow) -> StoreResult<RuleRow> {
    let conditions_raw: String = row.try_get("conditions")?;
    let conditions =
        serde_json::from_str(&conditions_raw).map_err(|err| StoreError::Corrupt {
            detail: format!("rule conditions column: {err}"),
        })?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(RuleRow {
        id: row.try_get("id")?,
        instance_id: row.try_get("instance_id")?,
        name: row.try_get("name")?,
        enabled: row.try_get("enabled")?,
        dry_run: row.try_get("dry_run")?,
        sort_order: row.try_get("sort_order")?,
        tracker_scope: row.try_get("tracker_scope")?,
        interval_seconds: row.try_get("interval_seconds")?,
        conditions,
        free_space_source: row.try_get("free_space_source")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instances::NewInstance;
    use crate::Database;

    async fn db_with_instance() -> (Database, i64) {
        let db = Database::open_in_memory().await.expect("open");
        let instance = db
            .instances()
            .create(NewInstance {
                name: "box".to_string(),
                base_url: "http://localhost:8080".to_string(),
                username: "admin".to_string(),
                encrypted_password: "ciphertext".to_string(),
                basic_username: None,
                encrypted_basic_password: None,
                tls_skip_verify: false,
                has_local_filesystem_access: false,
                enabled: true,
            })
            .await
            .expect("instance");
        (db, instance.id)
    }

    fn sample(instance_id: i64, name: &str, sort_order: i64) -> NewRuleRow {
        NewRuleRow {
            instance_id,
            name: name.to_string(),
            enabled: true,
            dry_run: false,
            sort_order,
            tracker_scope: "*".to_string(),
            interval_seconds: 900,
            conditions: serde_json::json!({ "pause": null }),
            free_space_source: None,
        }
    }

    #[tokio::test]
    async fn rules_round_trip_with_json_conditions() {
        let (db, instance_id) = db_with_instance().await;
        let store = db.rules();
        let created = store
            .create(sample(instance_id, "pause-stalled", 0))
            .await
            .expect("create");
        assert_eq!(created.conditions, serde_json::json!({ "pause": null }));

        let listed = store.list_for_instance(instance_id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "pause-stalled");
    }

    #[tokio::test]
    async fn listing_respects_sort_order() {
        let (db, instance_id) = db_with_instance().await;
        let store = db.rules();
        store
            .create(sample(instance_id, "second", 5))
            .await
            .expect("create");
        store
            .create(sample(instance_id, "first", 1))
            .await
            .expect("create");

        let listed = store.list_for_instance(instance_id).await.expect("list");
        let names: Vec<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn deleting_instance_cascades_to_rules() {
        let (db, instance_id) = db_with_instance().await;
        db.rules()
            .create(sample(instance_id, "doomed", 0))
            .await
            .expect("create");
        db.instances().delete(instance_id).await.expect("delete");
        assert!(db.rules().list_all().await.expect("list").is_empty());
    }
}
