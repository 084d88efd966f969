#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! SQLite persistence for the proxy's own state: registered instances,
//! automation rules, the activity log, external programs, and API keys.
//!
//! Stores hold raw SQL as module constants and decode rows by hand; the
//! only schema knowledge lives in `migrations/`. Credential columns carry
//! AEAD ciphertext produced by the pool's crypter; this crate never sees
//! plaintext secrets.

mod activity;
mod api_keys;
mod error;
mod instances;
mod programs;
mod rules;

use std::path::Path;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub use activity::{ActivityQuery, ActivityRecord, ActivityStore, ActivityWriter, NewActivity};
pub use api_keys::{ApiKeyRecord, ApiKeyStore};
pub use error::{StoreError, StoreResult};
pub use instances::{InstancePatch, InstanceStore, NewInstance};
pub use programs::{NewProgram, ProgramPatch, ProgramRecord, ProgramStore};
pub use rules::{NewRuleRow, RuleRow, RuleRowPatch, RuleStore};

/// Shared handle over the SQLite database backing every store.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or a migration
    /// fails.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests.
    ///
    /// # Errors
    ///
    /// Returns an error when migrations fail.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store over the `instances` table.
    #[must_use]
    pub fn instances(&self) -> InstanceStore {
        InstanceStore::new(self.pool.clone())
    }

    /// Store over the `rules` table.
    #[must_use]
    pub fn rules(&self) -> RuleStore {
        RuleStore::new(self.pool.clone())
    }

    /// Store over the `activity` table.
    #[must_use]
    pub fn activity(&self) -> ActivityStore {
        ActivityStore::new(self.pool.clone())
    }

    /// Store over the `external_programs` table.
    #[must_use]
    pub fn programs(&self) -> ProgramStore {
        ProgramStore::new(self.pool.clone())
    }

    /// Store over the `api_keys` table.
    #[must_use]
    pub fn api_keys(&self) -> ApiKeyStore {
        ApiKeyStore::new(self.pool.clone())
    }
}
