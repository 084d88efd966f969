//! Pool error surface.

use flotilla_core::{ErrorKind, Kinded};
use flotilla_qbit::QbitError;
use thiserror::Error;

/// Convenience alias for pool results.
pub type PoolResult<T> = Result<T, PoolError>;

/// Failure acquiring or using a pooled upstream session.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No instance registered under the given id.
    #[error("instance {id} not found")]
    InstanceNotFound {
        /// Missing instance id.
        id: i64,
    },
    /// The instance exists but is disabled by the operator.
    #[error("instance {id} is disabled")]
    InstanceDisabled {
        /// Disabled instance id.
        id: i64,
    },
    /// The session degraded after repeated upstream failures and must be
    /// re-enabled by a successful reconnection.
    #[error("instance {id} is unreachable after repeated failures")]
    Degraded {
        /// Degraded instance id.
        id: i64,
    },
    /// Stored credentials could not be decrypted or re-encrypted.
    #[error("credential handling failed: {detail}")]
    Credentials {
        /// Human-readable explanation; never includes key material.
        detail: String,
    },
    /// The upstream call itself failed.
    #[error(transparent)]
    Upstream(#[from] QbitError),
    /// The instance directory backing the pool failed.
    #[error("instance directory failure")]
    Directory(#[source] anyhow::Error),
}

impl Kinded for PoolError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InstanceNotFound { .. } => ErrorKind::NotFound,
            Self::InstanceDisabled { .. } | Self::Degraded { .. } => ErrorKind::UpstreamDisabled,
            Self::Credentials { .. } | Self::Directory(_) => ErrorKind::Internal,
            Self::Upstream(err) => err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_and_degraded_share_a_kind() {
        assert_eq!(
            PoolError::InstanceDisabled { id: 1 }.kind(),
            ErrorKind::UpstreamDisabled
        );
        assert_eq!(
            PoolError::Degraded { id: 1 }.kind(),
            ErrorKind::UpstreamDisabled
        );
    }

    #[test]
    fn upstream_kind_passes_through() {
        let err = PoolError::Upstream(QbitError::Unauthorized);
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
