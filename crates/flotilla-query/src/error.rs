//! Query layer error surface.

use flotilla_core::{ErrorKind, Kinded};
use flotilla_rules::RuleError;
use flotilla_sync::SyncError;
use thiserror::Error;

/// Convenience alias for query results.
pub type QueryResult<T> = Result<T, QueryError>;

/// Failure parsing or executing a list request.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The request failed to parse.
    #[error("invalid query: {reason}")]
    Invalid {
        /// Human-readable reason.
        reason: String,
    },
    /// The expression filter failed to compile.
    #[error(transparent)]
    Expression(#[from] RuleError),
    /// Reading the snapshot failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl QueryError {
    #[allow(dead_code)]
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

impl Kinded for QueryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid { .. } => ErrorKind::BadRequest,
            Self::Expression(err) => err.kind(),
            Self::Sync(err) => err.kind(),
        }
    }
}
