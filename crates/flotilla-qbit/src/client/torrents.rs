//! Torrent listing, actions, and metadata RPCs.

use std::collections::HashMap;

use reqwest::multipart;

use crate::client::{QbitClient, join_hashes};
use crate::error::{QbitError, QbitResult, classify_transport};
use crate::models::{
    CategoryInfo, TorrentFileEntry, TorrentInfo, TorrentProperties, TrackerEntry, WebSeed,
};

/// Batch verb applied to a hash list through `bulk_action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkVerb {
    /// Stop the torrents.
    Stop,
    /// Start the torrents.
    Start,
    /// Force-start the torrents, bypassing queue limits.
    ForceStart,
    /// Recheck on-disk data.
    Recheck,
    /// Re-announce to all trackers.
    Reannounce,
    /// Move to the top of the queue.
    TopPriority,
    /// Move to the bottom of the queue.
    BottomPriority,
    /// Move one step up in the queue.
    IncreasePriority,
    /// Move one step down in the queue.
    DecreasePriority,
    /// Toggle sequential download.
    ToggleSequential,
    /// Toggle first/last piece priority.
    ToggleFirstLastPiece,
    /// Enable or disable automatic torrent management.
    SetAutoManagement(bool),
    /// Enable or disable super seeding.
    SetSuperSeeding(bool),
    /// Delete the torrents, optionally with their data.
    Delete {
        /// Remove downloaded files as well.
        delete_files: bool,
    },
}

impl BulkVerb {
    const fn path(self) -> &'static str {
        match self {
            Self::Stop => "torrents/stop",
            Self::Start => "torrents/start",
            Self::ForceStart => "torrents/setForceStart",
            Self::Recheck => "torrents/recheck",
            Self::Reannounce => "torrents/reannounce",
            Self::TopPriority => "torrents/topPrio",
            Self::BottomPriority => "torrents/bottomPrio",
            Self::IncreasePriority => "torrents/increasePrio",
            Self::DecreasePriority => "torrents/decreasePrio",
            Self::ToggleSequential => "torrents/toggleSequentialDownload",
            Self::ToggleFirstLastPiece => "torrents/toggleFirstLastPiecePrio",
            Self::SetAutoManagement(_) => "torrents/setAutoManagement",
            Self::SetSuperSeeding(_) => "torrents/setSuperSeeding",
            Self::Delete { .. } => "torrents/delete",
        }
    }
}

/// Optional knobs for `torrents/add`.
#[derive(Debug, Clone, Default)]
pub struct AddTorrentOptions {
    /// Download directory override.
    pub save_path: Option<String>,
    /// Category to assign.
    pub category: Option<String>,
    /// Tags to assign.
    pub tags: Vec<String>,
    /// Skip hash checking.
    pub skip_checking: bool,
    /// Add in the stopped state.
    pub stopped: bool,
    /// Enable automatic torrent management.
    pub auto_tmm: Option<bool>,
    /// Enable sequential download.
    pub sequential: bool,
    /// Prioritize first and last pieces.
    pub first_last_piece_prio: bool,
    /// Per-torrent upload limit in bytes per second.
    pub up_limit: Option<i64>,
    /// Per-torrent download limit in bytes per second.
    pub dl_limit: Option<i64>,
    /// Per-torrent ratio limit.
    pub ratio_limit: Option<f64>,
    /// Per-torrent seeding time limit in minutes.
    pub seeding_time_limit: Option<i64>,
    /// Rename the torrent on add.
    pub rename: Option<String>,
    /// Content layout (`Original`, `Subfolder`, `NoSubfolder`).
    pub content_layout: Option<String>,
}

/// One `torrents/add` request: any mix of fetch URLs and raw metainfo
/// files.
#[derive(Debug, Clone, Default)]
pub struct AddTorrentPayload {
    /// Magnet links or HTTP(S) URLs to fetch upstream.
    pub urls: Vec<String>,
    /// Raw `.torrent` files as `(filename, bytes)` pairs.
    pub files: Vec<(String, Vec<u8>)>,
    /// Shared admission options.
    pub options: AddTorrentOptions,
}

impl QbitClient {
    /// List torrents via `torrents/info`, optionally scoped to a hash set.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_torrents(&self, hashes: Option<&[String]>) -> QbitResult<Vec<TorrentInfo>> {
        let mut query = Vec::new();
        if let Some(hashes) = hashes {
            query.push(("hashes", join_hashes(hashes)));
        }
        self.get_json("torrents/info", &query).await
    }

    /// Fetch detail properties for one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::NotFound`] for an unknown hash.
    pub async fn get_properties(&self, hash: &str) -> QbitResult<TorrentProperties> {
        self.get_json("torrents/properties", &[("hash", hash.to_string())])
            .await
    }

    /// Fetch the file listing for one torrent.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_files(&self, hash: &str) -> QbitResult<Vec<TorrentFileEntry>> {
        self.get_json("torrents/files", &[("hash", hash.to_string())])
            .await
    }

    /// Fetch tracker entries for one torrent.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_trackers(&self, hash: &str) -> QbitResult<Vec<TrackerEntry>> {
        self.get_json("torrents/trackers", &[("hash", hash.to_string())])
            .await
    }

    /// Fetch web seeds for one torrent.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_webseeds(&self, hash: &str) -> QbitResult<Vec<WebSeed>> {
        self.get_json("torrents/webseeds", &[("hash", hash.to_string())])
            .await
    }

    /// Fetch per-piece states (0 pending, 1 downloading, 2 downloaded).
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_piece_states(&self, hash: &str) -> QbitResult<Vec<u8>> {
        self.get_json("torrents/pieceStates", &[("hash", hash.to_string())])
            .await
    }

    /// Fetch all categories.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_categories(&self) -> QbitResult<HashMap<String, CategoryInfo>> {
        self.get_json("torrents/categories", &[]).await
    }

    /// Fetch all tags.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_tags(&self) -> QbitResult<Vec<String>> {
        self.get_json("torrents/tags", &[]).await
    }

    /// Download the `.torrent` file for one torrent.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::NotFound`] for an unknown hash.
    pub async fn export_torrent(&self, hash: &str) -> QbitResult<Vec<u8>> {
        self.get_bytes("torrents/export", &[("hash", hash.to_string())])
            .await
    }

    /// Apply a batch verb to a hash list.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error; mutations are never retried.
    pub async fn bulk_action(&self, verb: BulkVerb, hashes: &[String]) -> QbitResult<()> {
        let mut form = vec![("hashes", join_hashes(hashes))];
        match verb {
            BulkVerb::Delete { delete_files } => {
                form.push(("deleteFiles", delete_files.to_string()));
            }
            BulkVerb::SetAutoManagement(enable) => form.push(("enable", enable.to_string())),
            BulkVerb::SetSuperSeeding(enable) => form.push(("value", enable.to_string())),
            BulkVerb::ForceStart => form.push(("value", true.to_string())),
            _ => {}
        }
        self.post_form(verb.path(), &form).await
    }

    /// Add torrents from URLs and/or raw metainfo files.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error. qBittorrent reports an
    /// unusable payload with the literal body `Fails.`.
    pub async fn add_torrent(&self, payload: AddTorrentPayload) -> QbitResult<()> {
        // Multipart bodies are not replayable, so the session is verified
        // up front instead of relying on the usual re-login path.
        let mut attempted_login = false;
        loop {
            let url = self.endpoint("torrents/add")?;
            let form = build_add_form(&payload);
            let request = self.apply_basic_auth(self.http.post(url).multipart(form));
            let response = request
                .send()
                .await
                .map_err(|err| classify_transport(&err))?;
            let status = response.status();
            if matches!(
                status,
                reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED
            ) {
                if attempted_login {
                    return Err(QbitError::Unauthorized);
                }
                attempted_login = true;
                self.login().await?;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(crate::error::classify(status.as_u16(), &body));
            }
            if body.trim() == "Fails." {
                return Err(QbitError::Conflict {
                    detail: "upstream rejected the torrent payload".to_string(),
                });
            }
            return Ok(());
        }
    }

    /// Add tags to torrents, creating unknown tags upstream.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn add_tags(&self, hashes: &[String], tags: &[String]) -> QbitResult<()> {
        self.post_form(
            "torrents/addTags",
            &[("hashes", join_hashes(hashes)), ("tags", tags.join(","))],
        )
        .await
    }

    /// Remove tags from torrents.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn remove_tags(&self, hashes: &[String], tags: &[String]) -> QbitResult<()> {
        self.post_form(
            "torrents/removeTags",
            &[("hashes", join_hashes(hashes)), ("tags", tags.join(","))],
        )
        .await
    }

    /// Replace the full tag set on torrents (qBittorrent >= 5.1).
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn set_tags(&self, hashes: &[String], tags: &[String]) -> QbitResult<()> {
        self.post_form(
            "torrents/setTags",
            &[("hashes", join_hashes(hashes)), ("tags", tags.join(","))],
        )
        .await
    }

    /// Create tags without assigning them.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn create_tags(&self, tags: &[String]) -> QbitResult<()> {
        self.post_form("torrents/createTags", &[("tags", tags.join(","))])
            .await
    }

    /// Delete tags everywhere.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn delete_tags(&self, tags: &[String]) -> QbitResult<()> {
        self.post_form("torrents/deleteTags", &[("tags", tags.join(","))])
            .await
    }

    /// Assign a category to torrents; empty string clears it.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::Conflict`] when the category does not exist.
    pub async fn set_category(&self, hashes: &[String], category: &str) -> QbitResult<()> {
        self.post_form(
            "torrents/setCategory",
            &[
                ("hashes", join_hashes(hashes)),
                ("category", category.to_string()),
            ],
        )
        .await
    }

    /// Create a category.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::Conflict`] when the name is invalid.
    pub async fn create_category(&self, name: &str, save_path: &str) -> QbitResult<()> {
        self.post_form(
            "torrents/createCategory",
            &[
                ("category", name.to_string()),
                ("savePath", save_path.to_string()),
            ],
        )
        .await
    }

    /// Change a category's save path.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn edit_category(&self, name: &str, save_path: &str) -> QbitResult<()> {
        self.post_form(
            "torrents/editCategory",
            &[
                ("category", name.to_string()),
                ("savePath", save_path.to_string()),
            ],
        )
        .await
    }

    /// Remove categories; member torrents become uncategorized.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn remove_categories(&self, names: &[String]) -> QbitResult<()> {
        self.post_form("torrents/removeCategories", &[("categories", names.join("\n"))])
            .await
    }

    /// Set share limits for torrents. `-2` keeps the global limit and `-1`
    /// means unlimited; seeding times are minutes.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn set_share_limits(
        &self,
        hashes: &[String],
        ratio_limit: f64,
        seeding_time_limit: i64,
        inactive_seeding_time_limit: i64,
    ) -> QbitResult<()> {
        self.post_form(
            "torrents/setShareLimits",
            &[
                ("hashes", join_hashes(hashes)),
                ("ratioLimit", ratio_limit.to_string()),
                ("seedingTimeLimit", seeding_time_limit.to_string()),
                (
                    "inactiveSeedingTimeLimit",
                    inactive_seeding_time_limit.to_string(),
                ),
            ],
        )
        .await
    }

    /// Set the per-torrent download limit in bytes per second; 0 clears it.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn set_download_limit(&self, hashes: &[String], limit_bps: i64) -> QbitResult<()> {
        self.post_form(
            "torrents/setDownloadLimit",
            &[
                ("hashes", join_hashes(hashes)),
                ("limit", limit_bps.to_string()),
            ],
        )
        .await
    }

    /// Set the per-torrent upload limit in bytes per second; 0 clears it.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn set_upload_limit(&self, hashes: &[String], limit_bps: i64) -> QbitResult<()> {
        self.post_form(
            "torrents/setUploadLimit",
            &[
                ("hashes", join_hashes(hashes)),
                ("limit", limit_bps.to_string()),
            ],
        )
        .await
    }

    /// Move torrent storage to a new location.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::Conflict`] when a move is already in flight.
    pub async fn set_location(&self, hashes: &[String], location: &str) -> QbitResult<()> {
        self.post_form(
            "torrents/setLocation",
            &[
                ("hashes", join_hashes(hashes)),
                ("location", location.to_string()),
            ],
        )
        .await
    }

    /// Rename a torrent.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn rename_torrent(&self, hash: &str, name: &str) -> QbitResult<()> {
        self.post_form(
            "torrents/rename",
            &[("hash", hash.to_string()), ("name", name.to_string())],
        )
        .await
    }

    /// Rename a file within a torrent.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::Conflict`] when the new path collides.
    pub async fn rename_file(&self, hash: &str, old_path: &str, new_path: &str) -> QbitResult<()> {
        self.post_form(
            "torrents/renameFile",
            &[
                ("hash", hash.to_string()),
                ("oldPath", old_path.to_string()),
                ("newPath", new_path.to_string()),
            ],
        )
        .await
    }

    /// Rename a folder within a torrent.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::Conflict`] when the new path collides.
    pub async fn rename_folder(&self, hash: &str, old_path: &str, new_path: &str) -> QbitResult<()> {
        self.post_form(
            "torrents/renameFolder",
            &[
                ("hash", hash.to_string()),
                ("oldPath", old_path.to_string()),
                ("newPath", new_path.to_string()),
            ],
        )
        .await
    }
}

fn build_add_form(payload: &AddTorrentPayload) -> multipart::Form {
    let mut form = multipart::Form::new();
    if !payload.urls.is_empty() {
        form = form.text("urls", payload.urls.join("\n"));
    }
    for (filename, bytes) in &payload.files {
        let part = multipart::Part::bytes(bytes.clone())
            .file_name(filename.clone())
            .mime_str("application/x-bittorrent")
            .unwrap_or_else(|_| multipart::Part::bytes(bytes.clone()).file_name(filename.clone()));
        form = form.part("torrents", part);
    }

    let options = &payload.options;
    if let Some(save_path) = &options.save_path {
        form = form.text("savepath", save_path.clone());
    }
    if let Some(category) = &options.category {
        form = form.text("category", category.clone());
    }
    if !options.tags.is_empty() {
        form = form.text("tags", options.tags.join(","));
    }
    if options.skip_checking {
        form = form.text("skip_checking", "true");
    }
    if options.stopped {
        form = form.text("stopped", "true");
        form = form.text("paused", "true");
    }
    if let Some(auto_tmm) = options.auto_tmm {
        form = form.text("autoTMM", auto_tmm.to_string());
    }
    if options.sequential {
        form = form.text("sequentialDownload", "true");
    }
    if options.first_last_piece_prio {
        form = form.text("firstLastPiecePrio", "true");
    }
    if let Some(limit) = options.up_limit {
        form = form.text("upLimit", limit.to_string());
    }
    if let Some(limit) = options.dl_limit {
        form = form.text("dlLimit", limit.to_string());
    }
    if let Some(ratio) = options.ratio_limit {
        form = form.text("ratioLimit", ratio.to_string());
    }
    if let Some(minutes) = options.seeding_time_limit {
        form = form.text("seedingTimeLimit", minutes.to_string());
    }
    if let Some(rename) = &options.rename {
        form = form.text("rename", rename.clone());
    }
    if let Some(layout) = &options.content_layout {
        form = form.text("contentLayout", layout.clone());
    }
    form
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_map_to_expected_paths() {
        assert_eq!(BulkVerb::Stop.path(), "torrents/stop");
        assert_eq!(
            BulkVerb::Delete { delete_files: true }.path(),
            "torrents/delete"
        );
        assert_eq!(
            BulkVerb::ToggleSequential.path(),
            "torrents/toggleSequentialDownload"
        );
    }
}
