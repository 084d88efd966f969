//! Free-space sources for rule evaluation.

use std::path::PathBuf;

use systemstat::{Platform, System};
use tracing::warn;

use crate::error::{RuleError, RuleResult};

/// Where a rule reads free space from. Resolved once per tick and cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreeSpaceSource {
    /// The upstream's own `server_state.free_space_on_disk`.
    Qbittorrent,
    /// A local mount, read with statvfs; requires filesystem access.
    Path(PathBuf),
}

impl FreeSpaceSource {
    /// Parse the persisted form: absent or `qbittorrent` for the default,
    /// `path:<absolute>` for a local mount.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unrecognized input.
    pub fn parse(raw: Option<&str>) -> RuleResult<Self> {
        match raw {
            None | Some("qbittorrent") => Ok(Self::Qbittorrent),
            Some(other) => other.strip_prefix("path:").map_or_else(
                || {
                    Err(RuleError::invalid(format!(
                        "unrecognized free_space_source {other:?}"
                    )))
                },
                |path| Ok(Self::Path(PathBuf::from(path))),
            ),
        }
    }

    /// Read the current free space in bytes. `upstream_free` is the value
    /// from the instance snapshot.
    #[must_use]
    pub fn read(&self, upstream_free: Option<i64>) -> Option<i64> {
        match self {
            Self::Qbittorrent => upstream_free,
            Self::Path(path) => match System::new().mount_at(path) {
                Ok(mount) => i64::try_from(mount.avail.as_u64()).ok(),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "statvfs read failed");
                    None
                }
            },
        }
    }
}
