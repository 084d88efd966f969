//! External program registry store.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::error::{StoreError, StoreResult};
use crate::instances::{format_ts, parse_ts};

const PROGRAM_COLUMNS: &str = r"
    id, name, path, args_template, execution_mode, enabled, created_at, updated_at
";

/// Persisted external program definition.
#[derive(Debug, Clone)]
pub struct ProgramRecord {
    /// Row id.
    pub id: i64,
    /// Operator-facing name, unique.
    pub name: String,
    /// Absolute executable path; must sit inside the configured allow-list.
    pub path: String,
    /// Argument template with `${field}` placeholders.
    pub args_template: String,
    /// `background`, `terminal`, `start`, or `direct`.
    pub execution_mode: String,
    /// Whether rules may reference this program.
    pub enabled: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a program.
#[derive(Debug, Clone)]
pub struct NewProgram {
    /// Operator-facing name.
    pub name: String,
    /// Absolute executable path.
    pub path: String,
    /// Argument template.
    pub args_template: String,
    /// Execution mode label.
    pub execution_mode: String,
    /// Whether rules may reference this program.
    pub enabled: bool,
}

/// Partial program update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProgramPatch {
    /// New name.
    pub name: Option<String>,
    /// New path.
    pub path: Option<String>,
    /// New argument template.
    pub args_template: Option<String>,
    /// New execution mode.
    pub execution_mode: Option<String>,
    /// New enabled flag.
    pub enabled: Option<bool>,
}

/// Store over the `external_programs` table.
#[derive(Clone)]
pub struct ProgramStore {
    pool: SqlitePool,
}

impl ProgramStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a program and return the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] on a duplicate name.
    pub async fn create(&self, input: NewProgram) -> StoreResult<ProgramRecord> {
        let now = format_ts(Utc::now());
        let result = sqlx::query(
            r"
            INSERT INTO external_programs (
                name, path, args_template, execution_mode, enabled,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ",
        )
        .bind(&input.name)
        .bind(&input.path)
        .bind(&input.args_template)
        .bind(&input.execution_mode)
        .bind(input.enabled)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::on_insert("program", &input.name, err))?;

        self.get(result.last_insert_rowid()).await
    }

    /// Fetch one program by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn get(&self, id: i64) -> StoreResult<ProgramRecord> {
        let row = sqlx::query(&format!(
            "SELECT {PROGRAM_COLUMNS} FROM external_programs WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| decode_program(&row))
            .transpose()?
            .ok_or(StoreError::NotFound {
                entity: "program",
                id,
            })
    }

    /// List every program ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self) -> StoreResult<Vec<ProgramRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROGRAM_COLUMNS} FROM external_programs ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode_program).collect()
    }

    /// Apply a partial update and return the new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn update(&self, id: i64, patch: ProgramPatch) -> StoreResult<ProgramRecord> {
        let mut current = self.get(id).await?;
        if let Some(name) = patch.name {
            current.name = name;
        }
        if let Some(path) = patch.path {
            current.path = path;
        }
        if let Some(args_template) = patch.args_template {
            current.args_template = args_template;
        }
        if let Some(execution_mode) = patch.execution_mode {
            current.execution_mode = execution_mode;
        }
        if let Some(enabled) = patch.enabled {
            current.enabled = enabled;
        }

        sqlx::query(
            r"
            UPDATE external_programs SET
                name = ?2, path = ?3, args_template = ?4,
                execution_mode = ?5, enabled = ?6, updated_at = ?7
            WHERE id = ?1
            ",
        )
        .bind(id)
        .bind(&current.name)
        .bind(&current.path)
        .bind(&current.args_template)
        .bind(&current.execution_mode)
        .bind(current.enabled)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await?;

        self.get(id).await
    }

    /// Delete a program.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn delete(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM external_programs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "program",
                id,
            });
        }
        Ok(())
    }
}

fn decode_program(row: &SqliteRow) -> StoreResult<ProgramRecord> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(ProgramRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        args_template: row.try_get("args_template")?,
        execution_mode: row.try_get("execution_mode")?,
        enabled: row.try_get("enabled")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn programs_round_trip() {
        let db = Database::open_in_memory().await.expect("open");
        let store = db.programs();
        let created = store
            .create(NewProgram {
                name: "notify".to_string(),
                path: "/usr/local/bin/notify".to_string(),
                args_template: "${hash} ${name}".to_string(),
                execution_mode: "background".to_string(),
                enabled: true,
            })
            .await
            .expect("create");
        assert_eq!(created.execution_mode, "background");

        let updated = store
            .update(
                created.id,
                ProgramPatch {
                    enabled: Some(false),
                    ..ProgramPatch::default()
                },
            )
            .await
            .expect("update");
        assert!(!updated.enabled);

        store.delete(created.id).await.expect("delete");
        assert!(store.list().await.expect("list").is_empty());
    }
}
