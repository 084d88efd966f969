//! Sync layer error surface.

use flotilla_core::{ErrorKind, Kinded};
use flotilla_pool::PoolError;
use flotilla_qbit::QbitError;
use thiserror::Error;

/// Convenience alias for sync results.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure reading or mutating cached instance state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Acquiring the upstream session failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The upstream call itself failed.
    #[error(transparent)]
    Upstream(#[from] QbitError),
    /// The referenced torrent is not present in the snapshot.
    #[error("torrent {hash} not found on instance {instance_id}")]
    TorrentNotFound {
        /// Target instance.
        instance_id: i64,
        /// Missing canonical hash.
        hash: String,
    },
    /// The instance has never been successfully synced and the refresh
    /// failed, so there is nothing to serve.
    #[error("no snapshot available for instance {instance_id}: {detail}")]
    Unavailable {
        /// Target instance.
        instance_id: i64,
        /// Why the populate failed.
        detail: String,
    },
}

impl Kinded for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Pool(err) => err.kind(),
            Self::Upstream(err) => err.kind(),
            Self::TorrentNotFound { .. } => ErrorKind::NotFound,
            Self::Unavailable { .. } => ErrorKind::UpstreamTransient,
        }
    }
}
