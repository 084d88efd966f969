//! Wire models for the qBittorrent api/v2 surface.
//!
//! Field names mirror the upstream JSON exactly; normalization into the
//! proxy's [`flotilla_core::TorrentView`] happens in the sync layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Full torrent record as returned by `torrents/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct TorrentInfo {
    /// Torrent hash used as the upstream key.
    pub hash: String,
    /// Info-hash v1 when reported (qBittorrent >= 4.4).
    #[serde(default)]
    pub infohash_v1: Option<String>,
    /// Info-hash v2 when reported.
    #[serde(default)]
    pub infohash_v2: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Selected payload size in bytes.
    #[serde(default)]
    pub size: i64,
    /// Completion fraction in `[0, 1]`.
    #[serde(default)]
    pub progress: f64,
    /// Upstream state string.
    #[serde(default)]
    pub state: String,
    /// Category name.
    #[serde(default)]
    pub category: String,
    /// Comma-joined tag list.
    #[serde(default)]
    pub tags: String,
    /// Primary announce URL.
    #[serde(default)]
    pub tracker: String,
    /// Unix timestamp the torrent was added.
    #[serde(default)]
    pub added_on: i64,
    /// Unix timestamp the torrent completed.
    #[serde(default)]
    pub completion_on: i64,
    /// Save path on the upstream host.
    #[serde(default)]
    pub save_path: String,
    /// Content path on the upstream host.
    #[serde(default)]
    pub content_path: String,
    /// Share ratio.
    #[serde(default)]
    pub ratio: f64,
    /// Ratio limit (-2 global, -1 unlimited).
    #[serde(default)]
    pub ratio_limit: f64,
    /// Accumulated seeding time in seconds.
    #[serde(default)]
    pub seeding_time: i64,
    /// Seeding time limit in minutes (-2 global, -1 unlimited).
    #[serde(default)]
    pub seeding_time_limit: i64,
    /// Download speed in bytes per second.
    #[serde(default)]
    pub dlspeed: i64,
    /// Upload speed in bytes per second.
    #[serde(default)]
    pub upspeed: i64,
    /// Download limit in bytes per second.
    #[serde(default)]
    pub dl_limit: i64,
    /// Upload limit in bytes per second.
    #[serde(default)]
    pub up_limit: i64,
    /// Connected seeds.
    #[serde(default)]
    pub num_seeds: i64,
    /// Connected leeches.
    #[serde(default)]
    pub num_leechs: i64,
    /// Estimated seconds to completion.
    #[serde(default)]
    pub eta: i64,
    /// Whether the torrent is from a private tracker; absent before
    /// qBittorrent 5.0.
    #[serde(default, alias = "isPrivate")]
    pub private: Option<bool>,
    /// Bytes left to download.
    #[serde(default)]
    pub amount_left: i64,
    /// Seconds the torrent has been active.
    #[serde(default)]
    pub time_active: i64,
    /// Unix timestamp of the last payload transfer.
    #[serde(default)]
    pub last_activity: i64,
    /// Distributed copies available in the swarm.
    #[serde(default)]
    pub availability: f64,
    /// Total bytes uploaded.
    #[serde(default)]
    pub uploaded: i64,
    /// Total bytes downloaded.
    #[serde(default)]
    pub downloaded: i64,
}

/// Partial torrent record carried by `sync/maindata` deltas.
///
/// Every field is optional: the upstream sends only what changed since the
/// supplied cursor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TorrentDelta {
    /// Info-hash v1.
    #[serde(default)]
    pub infohash_v1: Option<String>,
    /// Info-hash v2.
    #[serde(default)]
    pub infohash_v2: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Selected payload size in bytes.
    #[serde(default)]
    pub size: Option<i64>,
    /// Completion fraction.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Upstream state string.
    #[serde(default)]
    pub state: Option<String>,
    /// Category name.
    #[serde(default)]
    pub category: Option<String>,
    /// Comma-joined tag list.
    #[serde(default)]
    pub tags: Option<String>,
    /// Primary announce URL.
    #[serde(default)]
    pub tracker: Option<String>,
    /// Unix timestamp the torrent was added.
    #[serde(default)]
    pub added_on: Option<i64>,
    /// Unix timestamp the torrent completed.
    #[serde(default)]
    pub completion_on: Option<i64>,
    /// Save path.
    #[serde(default)]
    pub save_path: Option<String>,
    /// Content path.
    #[serde(default)]
    pub content_path: Option<String>,
    /// Share ratio.
    #[serde(default)]
    pub ratio: Option<f64>,
    /// Ratio limit.
    #[serde(default)]
    pub ratio_limit: Option<f64>,
    /// Accumulated seeding time in seconds.
    #[serde(default)]
    pub seeding_time: Option<i64>,
    /// Seeding time limit in minutes.
    #[serde(default)]
    pub seeding_time_limit: Option<i64>,
    /// Download speed in bytes per second.
    #[serde(default)]
    pub dlspeed: Option<i64>,
    /// Upload speed in bytes per second.
    #[serde(default)]
    pub upspeed: Option<i64>,
    /// Download limit in bytes per second.
    #[serde(default)]
    pub dl_limit: Option<i64>,
    /// Upload limit in bytes per second.
    #[serde(default)]
    pub up_limit: Option<i64>,
    /// Connected seeds.
    #[serde(default)]
    pub num_seeds: Option<i64>,
    /// Connected leeches.
    #[serde(default)]
    pub num_leechs: Option<i64>,
    /// Estimated seconds to completion.
    #[serde(default)]
    pub eta: Option<i64>,
    /// Private-tracker flag.
    #[serde(default, alias = "isPrivate")]
    pub private: Option<bool>,
    /// Bytes left to download.
    #[serde(default)]
    pub amount_left: Option<i64>,
    /// Seconds the torrent has been active.
    #[serde(default)]
    pub time_active: Option<i64>,
    /// Unix timestamp of the last payload transfer.
    #[serde(default)]
    pub last_activity: Option<i64>,
    /// Distributed copies available.
    #[serde(default)]
    pub availability: Option<f64>,
    /// Total bytes uploaded.
    #[serde(default)]
    pub uploaded: Option<i64>,
    /// Total bytes downloaded.
    #[serde(default)]
    pub downloaded: Option<i64>,
}

/// Category payload inside `sync/maindata` and `torrents/categories`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryInfo {
    /// Category name.
    #[serde(default)]
    pub name: String,
    /// Save path associated with the category.
    #[serde(rename = "savePath", default)]
    pub save_path: String,
}

/// Subset of the `server_state` object the proxy consumes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerState {
    /// Free disk space on the upstream's default save location.
    #[serde(default)]
    pub free_space_on_disk: Option<i64>,
    /// Global download rate limit in bytes per second.
    #[serde(default)]
    pub dl_rate_limit: Option<i64>,
    /// Global upload rate limit in bytes per second.
    #[serde(default)]
    pub up_rate_limit: Option<i64>,
    /// Upstream connection status string.
    #[serde(default)]
    pub connection_status: Option<String>,
}

/// Incremental sync payload from `sync/maindata`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MainData {
    /// Cursor to echo on the next request.
    pub rid: i64,
    /// Present and true when the payload replaces all cached state.
    #[serde(default)]
    pub full_update: Option<bool>,
    /// Added or updated torrents keyed by upstream hash.
    #[serde(default)]
    pub torrents: Option<HashMap<String, TorrentDelta>>,
    /// Hashes removed since the supplied cursor.
    #[serde(default)]
    pub torrents_removed: Option<Vec<String>>,
    /// Added or updated categories keyed by name.
    #[serde(default)]
    pub categories: Option<HashMap<String, CategoryInfo>>,
    /// Categories removed since the supplied cursor.
    #[serde(default)]
    pub categories_removed: Option<Vec<String>>,
    /// Tags added since the supplied cursor.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Tags removed since the supplied cursor.
    #[serde(default)]
    pub tags_removed: Option<Vec<String>>,
    /// Global transfer state.
    #[serde(default)]
    pub server_state: Option<ServerState>,
    /// Tracker URL to member-hash mapping.
    #[serde(default)]
    pub trackers: Option<HashMap<String, Vec<String>>>,
}

/// Torrent detail from `torrents/properties`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentProperties {
    /// Save path.
    #[serde(default)]
    pub save_path: String,
    /// Creation timestamp embedded in the metainfo.
    #[serde(default)]
    pub creation_date: i64,
    /// Piece size in bytes.
    #[serde(default)]
    pub piece_size: i64,
    /// Author comment.
    #[serde(default)]
    pub comment: String,
    /// Bytes wasted.
    #[serde(default)]
    pub total_wasted: i64,
    /// Bytes uploaded all-time.
    #[serde(default)]
    pub total_uploaded: i64,
    /// Bytes downloaded all-time.
    #[serde(default)]
    pub total_downloaded: i64,
    /// Upload limit in bytes per second.
    #[serde(default)]
    pub up_limit: i64,
    /// Download limit in bytes per second.
    #[serde(default)]
    pub dl_limit: i64,
    /// Seconds elapsed while active.
    #[serde(default)]
    pub time_elapsed: i64,
    /// Seconds elapsed while complete.
    #[serde(default)]
    pub seeding_time: i64,
    /// Share ratio.
    #[serde(default)]
    pub share_ratio: f64,
    /// Unix timestamp the torrent was added.
    #[serde(default)]
    pub addition_date: i64,
    /// Unix timestamp the torrent completed.
    #[serde(default)]
    pub completion_date: i64,
    /// Connected peers.
    #[serde(default)]
    pub peers: i64,
    /// Swarm peers.
    #[serde(default)]
    pub peers_total: i64,
    /// Pieces owned.
    #[serde(default)]
    pub pieces_have: i64,
    /// Total pieces.
    #[serde(default)]
    pub pieces_num: i64,
    /// Connected seeds.
    #[serde(default)]
    pub seeds: i64,
    /// Swarm seeds.
    #[serde(default)]
    pub seeds_total: i64,
    /// Total torrent size in bytes.
    #[serde(default)]
    pub total_size: i64,
    /// Seconds until the next tracker announce.
    #[serde(default)]
    pub reannounce: i64,
    /// Private-tracker flag.
    #[serde(default, alias = "isPrivate")]
    pub private: Option<bool>,
}

/// Tracker entry from `torrents/trackers`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerEntry {
    /// Announce URL, or a `** [DHT] **` style pseudo entry.
    pub url: String,
    /// Upstream tracker status code.
    #[serde(default)]
    pub status: i64,
    /// Tier, negative for pseudo entries.
    #[serde(default)]
    pub tier: i64,
    /// Peers reported by this tracker.
    #[serde(default)]
    pub num_peers: i64,
    /// Seeds reported by this tracker.
    #[serde(default)]
    pub num_seeds: i64,
    /// Leeches reported by this tracker.
    #[serde(default)]
    pub num_leeches: i64,
    /// Tracker-provided message.
    #[serde(default)]
    pub msg: String,
}

/// Web seed entry from `torrents/webseeds`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSeed {
    /// Web seed URL.
    pub url: String,
}

/// File entry from `torrents/files`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentFileEntry {
    /// File index within the torrent.
    #[serde(default)]
    pub index: i64,
    /// Relative path including folders.
    pub name: String,
    /// File size in bytes.
    #[serde(default)]
    pub size: i64,
    /// Completion fraction.
    #[serde(default)]
    pub progress: f64,
    /// Download priority.
    #[serde(default)]
    pub priority: i64,
    /// Piece range `[first, last]`.
    #[serde(default)]
    pub piece_range: Vec<i64>,
    /// Availability fraction.
    #[serde(default)]
    pub availability: f64,
}

/// Peer listing from `sync/torrentPeers`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TorrentPeers {
    /// Cursor to echo on the next request.
    #[serde(default)]
    pub rid: i64,
    /// Whether the payload replaces all cached peers.
    #[serde(default)]
    pub full_update: Option<bool>,
    /// Peers keyed by `ip:port`.
    #[serde(default)]
    pub peers: Option<HashMap<String, PeerEntry>>,
}

/// Single peer record.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PeerEntry {
    /// Peer IP address.
    #[serde(default)]
    pub ip: String,
    /// Peer port.
    #[serde(default)]
    pub port: i64,
    /// Client identification string.
    #[serde(default)]
    pub client: String,
    /// Completion fraction of the peer.
    #[serde(default)]
    pub progress: f64,
    /// Download speed from this peer in bytes per second.
    #[serde(default)]
    pub dl_speed: i64,
    /// Upload speed to this peer in bytes per second.
    #[serde(default)]
    pub up_speed: i64,
    /// Connection flags.
    #[serde(default)]
    pub flags: String,
    /// Country name when GeoIP is enabled upstream.
    #[serde(default)]
    pub country: String,
}

/// Torrent-creator task descriptor (qBittorrent >= 5.0).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatorTask {
    /// Task identifier assigned by the upstream.
    #[serde(rename = "taskID")]
    pub task_id: String,
    /// Source path being packed.
    #[serde(default, rename = "sourcePath")]
    pub source_path: String,
    /// Task status string (`Queued`, `Running`, `Finished`, `Failed`).
    #[serde(default)]
    pub status: String,
    /// Failure message when status is `Failed`.
    #[serde(default, rename = "errorMessage")]
    pub error_message: String,
}
