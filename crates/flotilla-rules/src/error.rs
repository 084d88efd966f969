//! Rule engine error surface.

use flotilla_core::{ErrorKind, Kinded};
use flotilla_data::StoreError;
use flotilla_sync::SyncError;
use thiserror::Error;

/// Convenience alias for rule results.
pub type RuleResult<T> = Result<T, RuleError>;

/// Failure validating, scheduling, or applying a rule.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The rule payload failed validation; the message names the field and
    /// reason.
    #[error("invalid rule: {reason}")]
    Invalid {
        /// Human-readable reason.
        reason: String,
    },
    /// A regex in the payload failed to compile.
    #[error("invalid regex {pattern:?}: {reason} (patterns use RE2 syntax; lookaround is not supported)")]
    InvalidRegex {
        /// The offending pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
    /// The referenced rule does not exist.
    #[error("rule {id} not found")]
    NotFound {
        /// Missing rule id.
        id: i64,
    },
    /// Reading the instance snapshot failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Launching an external program failed.
    #[error("external program failed to start: {reason}")]
    ProgramFailed {
        /// What went wrong.
        reason: String,
    },
}

impl RuleError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

impl Kinded for RuleError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Invalid { .. } | Self::InvalidRegex { .. } => ErrorKind::BadRequest,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Sync(err) => err.kind(),
            Self::Store(err) => err.kind(),
            Self::ProgramFailed { .. } => ErrorKind::Internal,
        }
    }
}
