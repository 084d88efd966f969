//! Store error surface.

use flotilla_core::{ErrorKind, Kinded};
use thiserror::Error;

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure in the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced row does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity name, e.g. `instance`.
        entity: &'static str,
        /// Missing row id.
        id: i64,
    },
    /// A uniqueness constraint was violated.
    #[error("{entity} already exists: {detail}")]
    AlreadyExists {
        /// Entity name.
        entity: &'static str,
        /// Conflicting value.
        detail: String,
    },
    /// The underlying database failed.
    #[error("database failure")]
    Database(#[from] sqlx::Error),
    /// A migration failed to apply.
    #[error("migration failure")]
    Migration(#[from] sqlx::migrate::MigrateError),
    /// A persisted JSON column could not be decoded.
    #[error("corrupt persisted payload: {detail}")]
    Corrupt {
        /// What failed to decode.
        detail: String,
    },
}

impl Kinded for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::Database(_) | Self::Migration(_) | Self::Corrupt { .. } => ErrorKind::Internal,
        }
    }
}

impl StoreError {
    /// Translate a sqlx unique-constraint violation into
    /// [`StoreError::AlreadyExists`], passing other errors through.
    #[must_use]
    pub fn on_insert(entity: &'static str, detail: &str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::AlreadyExists {
                    entity,
                    detail: detail.to_string(),
                };
            }
        }
        Self::Database(err)
    }
}
