//! Append-only activity log with batched inserts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::StoreResult;
use crate::instances::{format_ts, parse_ts};

/// Rows buffered before an early flush.
const FLUSH_ROWS: usize = 100;
/// Longest a buffered row waits before being flushed.
const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

const ACTIVITY_COLUMNS: &str = r"
    id,
    rule_id,
    instance_id,
    hash,
    torrent_name,
    action,
    outcome,
    detail,
    run_id,
    created_at
";

/// One appended activity entry.
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    /// Row id.
    pub id: i64,
    /// Originating rule, `None` once the rule is deleted.
    pub rule_id: Option<i64>,
    /// Instance the action targeted.
    pub instance_id: i64,
    /// Canonical torrent hash.
    pub hash: String,
    /// Torrent name at evaluation time.
    pub torrent_name: String,
    /// Action label, e.g. `set_share_limit`.
    pub action: String,
    /// Outcome label, e.g. `applied`, `errored`, `would_have_applied`.
    pub outcome: String,
    /// Error message or action payload fingerprint.
    pub detail: Option<String>,
    /// Groups all records emitted by one evaluation tick.
    pub run_id: String,
    /// Append timestamp.
    pub created_at: DateTime<Utc>,
}

/// Input for appending an activity entry.
#[derive(Debug, Clone)]
pub struct NewActivity {
    /// Originating rule.
    pub rule_id: Option<i64>,
    /// Instance the action targeted.
    pub instance_id: i64,
    /// Canonical torrent hash.
    pub hash: String,
    /// Torrent name at evaluation time.
    pub torrent_name: String,
    /// Action label.
    pub action: String,
    /// Outcome label.
    pub outcome: String,
    /// Error message or payload fingerprint.
    pub detail: Option<String>,
    /// Evaluation-tick grouping id.
    pub run_id: String,
}

/// Query bounds for listing activity.
#[derive(Debug, Clone, Default)]
pub struct ActivityQuery {
    /// Restrict to one rule.
    pub rule_id: Option<i64>,
    /// Restrict to one instance.
    pub instance_id: Option<i64>,
    /// Restrict to one evaluation run.
    pub run_id: Option<String>,
    /// Page size, clamped to 1000.
    pub limit: i64,
    /// Page offset.
    pub offset: i64,
}

/// Store over the `activity` table.
#[derive(Clone)]
pub struct ActivityStore {
    pool: SqlitePool,
}

impl ActivityStore {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch of records in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error when the transaction fails.
    pub async fn append_batch(&self, records: &[NewActivity]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let now = format_ts(Utc::now());
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r"
                INSERT INTO activity (
                    rule_id, instance_id, hash, torrent_name,
                    action, outcome, detail, run_id, created_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )
            .bind(record.rule_id)
            .bind(record.instance_id)
            .bind(&record.hash)
            .bind(&record.torrent_name)
            .bind(&record.action)
            .bind(&record.outcome)
            .bind(&record.detail)
            .bind(&record.run_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// List records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error when the query fails.
    pub async fn list(&self, query: &ActivityQuery) -> StoreResult<Vec<ActivityRecord>> {
        let limit = if query.limit <= 0 {
            100
        } else {
            query.limit.min(1000)
        };
        let sql = format!(
            r"
            SELECT {ACTIVITY_COLUMNS} FROM activity
            WHERE (?1 IS NULL OR rule_id = ?1)
              AND (?2 IS NULL OR instance_id = ?2)
              AND (?3 IS NULL OR run_id = ?3)
            ORDER BY id DESC LIMIT ?4 OFFSET ?5
            "
        );

        let rows = sqlx::query(&sql)
            .bind(query.rule_id)
            .bind(query.instance_id)
            .bind(&query.run_id)
            .bind(limit)
            .bind(query.offset.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_activity).collect()
    }

    /// Delete records older than the given number of days, returning the
    /// deleted row count.
    ///
    /// # Errors
    ///
    /// Returns an error when the delete fails.
    pub async fn delete_older_than(&self, days: i64) -> StoreResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days.max(0));
        let result = sqlx::query("DELETE FROM activity WHERE created_at < ?1")
            .bind(format_ts(cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Start the buffered writer used by the rule engine's hot path.
    #[must_use]
    pub fn writer(&self) -> ActivityWriter {
        let (sender, receiver) = mpsc::channel(1024);
        let store = self.clone();
        let task = tokio::spawn(run_writer(store, receiver));
        ActivityWriter {
            sender,
            _task: task,
        }
    }
}

/// Buffered, non-blocking appender; flushes every 200 ms or 100 rows.
pub struct ActivityWriter {
    sender: mpsc::Sender<NewActivity>,
    _task: JoinHandle<()>,
}

impl ActivityWriter {
    /// Enqueue a record; drops (with an error log) when the buffer is
    /// saturated rather than blocking the evaluation tick.
    pub fn append(&self, record: NewActivity) {
        if let Err(err) = self.sender.try_send(record) {
            error!(error = %err, "activity buffer saturated, dropping record");
        }
    }
}

async fn run_writer(store: ActivityStore, mut receiver: mpsc::Receiver<NewActivity>) {
    let mut buffer: Vec<NewActivity> = Vec::with_capacity(FLUSH_ROWS);
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            received = receiver.recv() => {
                match received {
                    Some(record) => {
                        buffer.push(record);
                        if buffer.len() >= FLUSH_ROWS {
                            flush(&store, &mut buffer).await;
                        }
                    }
                    None => {
                        flush(&store, &mut buffer).await;
                        debug!("activity writer channel closed, stopping");
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&store, &mut buffer).await;
            }
        }
    }
}

async fn flush(store: &ActivityStore, buffer: &mut Vec<NewActivity>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    if let Err(err) = store.append_batch(&batch).await {
        error!(error = %err, rows = batch.len(), "failed to flush activity batch");
    }
}

fn decode_activity(row: &SqliteRow) -> StoreResult<ActivityRecord> {
    let created_at: String = row.try_get("created_at")?;
    Ok(ActivityRecord {
        id: row.try_get("id")?,
        rule_id: row.try_get("rule_id")?,
        instance_id: row.try_get("instance_id")?,
        hash: row.try_get("hash")?,
        torrent_name: row.try_get("torrent_name")?,
        action: row.try_get("action")?,
        outcome: row.try_get("outcome")?,
        detail: row.try_get("detail")?,
        run_id: row.try_get("run_id")?,
        created_at: parse_ts(&created_at),
    })
}
