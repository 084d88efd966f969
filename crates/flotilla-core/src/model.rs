//! Normalized torrent, instance, and counter models.

use std::collections::BTreeSet;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel category name matching torrents without a category.
pub const UNCATEGORIZED: &str = "";

/// Sentinel tag name matching torrents without tags.
pub const UNTAGGED: &str = "";

/// Identity and connection settings for one registered upstream endpoint.
///
/// Credentials are stored encrypted at rest; this record carries the
/// ciphertext and is decrypted only inside the client pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Stable integer identifier assigned by the instance store.
    pub id: i64,
    /// Operator-facing display name.
    pub name: String,
    /// Base URL of the upstream WebUI, e.g. `http://seedbox:8080`.
    pub base_url: String,
    /// Login username for the WebUI session.
    pub username: String,
    /// AEAD-encrypted WebUI password (base64 nonce||ciphertext).
    pub encrypted_password: String,
    /// Optional HTTP basic-auth username for a fronting proxy.
    pub basic_username: Option<String>,
    /// Optional AEAD-encrypted basic-auth password.
    pub encrypted_basic_password: Option<String>,
    /// Skip TLS certificate verification for this endpoint.
    pub tls_skip_verify: bool,
    /// Whether this process can see the upstream's filesystem; unlocks
    /// conditions that reference on-disk state.
    pub has_local_filesystem_access: bool,
    /// Disabled instances are never contacted and surface as unavailable.
    pub enabled: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Upstream torrent lifecycle state as reported by qBittorrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TorrentState {
    /// An error interrupted the torrent.
    #[serde(rename = "error")]
    Error,
    /// Data files are missing on disk.
    #[serde(rename = "missingFiles")]
    MissingFiles,
    /// Seeding with active transfer.
    #[serde(rename = "uploading")]
    Uploading,
    /// Completed and stopped (qBittorrent >= 5 naming).
    #[serde(rename = "stoppedUP", alias = "pausedUP")]
    StoppedUp,
    /// Queued for seeding.
    #[serde(rename = "queuedUP")]
    QueuedUp,
    /// Seeding without connected peers.
    #[serde(rename = "stalledUP")]
    StalledUp,
    /// Checking completed data.
    #[serde(rename = "checkingUP")]
    CheckingUp,
    /// Seeding with forced start.
    #[serde(rename = "forcedUP")]
    ForcedUp,
    /// Allocating disk space.
    #[serde(rename = "allocating")]
    Allocating,
    /// Downloading with active transfer.
    #[serde(rename = "downloading")]
    Downloading,
    /// Fetching metadata from the swarm.
    #[serde(rename = "metaDL")]
    MetaDownload,
    /// Incomplete and stopped.
    #[serde(rename = "stoppedDL", alias = "pausedDL")]
    StoppedDl,
    /// Queued for download.
    #[serde(rename = "queuedDL")]
    QueuedDl,
    /// Downloading without available peers.
    #[serde(rename = "stalledDL")]
    StalledDl,
    /// Checking incomplete data.
    #[serde(rename = "checkingDL")]
    CheckingDl,
    /// Downloading with forced start.
    #[serde(rename = "forcedDL")]
    ForcedDl,
    /// Rechecking resume data at startup.
    #[serde(rename = "checkingResumeData")]
    CheckingResumeData,
    /// Storage is being relocated.
    #[serde(rename = "moving")]
    Moving,
    /// State string the proxy does not recognize.
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl TorrentState {
    /// Whether the torrent is on the download side of its lifecycle.
    #[must_use]
    pub const fn is_downloading(self) -> bool {
        matches!(
            self,
            Self::Downloading
                | Self::MetaDownload
                | Self::StalledDl
                | Self::CheckingDl
                | Self::ForcedDl
                | Self::QueuedDl
                | Self::StoppedDl
                | Self::Allocating
        )
    }

    /// Whether the torrent is on the seeding side of its lifecycle.
    #[must_use]
    pub const fn is_seeding(self) -> bool {
        matches!(
            self,
            Self::Uploading | Self::StalledUp | Self::CheckingUp | Self::ForcedUp | Self::QueuedUp
        )
    }

    /// Whether the torrent has finished downloading.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(
            self,
            Self::Uploading
                | Self::StalledUp
                | Self::CheckingUp
                | Self::ForcedUp
                | Self::QueuedUp
                | Self::StoppedUp
        )
    }

    /// Whether the torrent is stopped by the operator.
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::StoppedUp | Self::StoppedDl)
    }

    /// Whether the torrent is stalled in either direction.
    #[must_use]
    pub const fn is_stalled(self) -> bool {
        matches!(self, Self::StalledUp | Self::StalledDl)
    }

    /// Whether data is being verified.
    #[must_use]
    pub const fn is_checking(self) -> bool {
        matches!(
            self,
            Self::CheckingUp | Self::CheckingDl | Self::CheckingResumeData
        )
    }

    /// Whether the torrent is in an error condition.
    #[must_use]
    pub const fn is_errored(self) -> bool {
        matches!(self, Self::Error | Self::MissingFiles)
    }
}

/// Normalized upstream torrent record held in instance snapshots.
///
/// Refreshed wholesale from upstream sync payloads; never mutated locally
/// except by optimistic patches that are discarded on the next refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentView {
    /// Canonical lowercase hex info-hash (v1 preferred, v2 fallback).
    pub hash: String,
    /// Info-hash v1 when reported.
    pub infohash_v1: Option<String>,
    /// Info-hash v2 when reported.
    pub infohash_v2: Option<String>,
    /// Display name.
    pub name: String,
    /// Selected payload size in bytes.
    pub size: i64,
    /// Completion fraction in `[0, 1]`.
    pub progress: f64,
    /// Lifecycle state.
    pub state: TorrentState,
    /// Category name, empty when uncategorized.
    pub category: String,
    /// Ordered tag set.
    pub tags: BTreeSet<String>,
    /// Primary announce URL.
    pub tracker: String,
    /// Registrable domain derived from [`TorrentView::tracker`], lowercased.
    pub tracker_domain: String,
    /// Unix timestamp the torrent was added upstream.
    pub added_on: i64,
    /// Unix timestamp the torrent completed, 0 or negative when incomplete.
    pub completion_on: i64,
    /// Save path on the upstream host.
    pub save_path: String,
    /// Content path on the upstream host.
    pub content_path: String,
    /// Share ratio.
    pub ratio: f64,
    /// Per-torrent ratio limit, -2 global / -1 unlimited.
    pub ratio_limit: f64,
    /// Accumulated seeding time in seconds.
    pub seeding_time: i64,
    /// Per-torrent seeding time limit in minutes, -2 global / -1 unlimited.
    pub seeding_time_limit: i64,
    /// Current download speed in bytes per second.
    pub dlspeed: i64,
    /// Current upload speed in bytes per second.
    pub upspeed: i64,
    /// Download limit in bytes per second, 0 or negative when unlimited.
    pub dl_limit: i64,
    /// Upload limit in bytes per second, 0 or negative when unlimited.
    pub up_limit: i64,
    /// Connected seeds.
    pub num_seeds: i64,
    /// Connected leeches.
    pub num_leechs: i64,
    /// Estimated seconds to completion, `8640000` means unknown upstream.
    pub eta: i64,
    /// Whether the torrent came from a private tracker.
    pub is_private: bool,
    /// Bytes left to download.
    pub amount_left: i64,
    /// Seconds the torrent has been active.
    pub time_active: i64,
    /// Unix timestamp of the last payload transfer.
    pub last_activity: i64,
    /// Distributed copies available in the swarm.
    pub availability: f64,
    /// Total bytes uploaded.
    pub uploaded: i64,
    /// Total bytes downloaded.
    pub downloaded: i64,
}

impl TorrentView {
    /// Age of the torrent in whole seconds relative to `now` (unix epoch).
    #[must_use]
    pub const fn age_seconds(&self, now: i64) -> i64 {
        now.saturating_sub(self.added_on)
    }

    /// Whether the upstream reports data files missing on disk.
    #[must_use]
    pub const fn has_missing_files(&self) -> bool {
        matches!(self.state, TorrentState::MissingFiles)
    }
}

/// Upstream category definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Category {
    /// Category name.
    pub name: String,
    /// Save path associated with the category, empty for default.
    #[serde(rename = "savePath", default)]
    pub save_path: String,
}

/// Per-dimension counters returned alongside every paginated listing.
///
/// Each map counts matches after applying every filter dimension except the
/// one being counted; the substring search applies to all of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counters {
    /// Matches per status bucket.
    pub status: HashMap<String, u64>,
    /// Matches per category; the empty key counts uncategorized torrents.
    pub categories: HashMap<String, u64>,
    /// Matches per tag; the empty key counts untagged torrents.
    pub tags: HashMap<String, u64>,
    /// Matches per tracker domain; the empty key buckets unknown trackers.
    pub trackers: HashMap<String, u64>,
}
