//! Torrent-creator task RPCs, available from qBittorrent 5.0.

use crate::client::QbitClient;
use crate::error::{QbitError, QbitResult};
use crate::models::CreatorTask;

/// Major version that introduced the torrent-creator API.
const CREATOR_MIN_MAJOR: u64 = 5;

/// Parameters for a new torrent-creation task.
#[derive(Debug, Clone, Default)]
pub(crate) struct CreatorTaskParams {
    /// Path on the upstream host to pack.
    pub(crate) source_path: String,
    /// Tracker announce URLs, one per tier.
    pub(crate) trackers: Vec<String>,
    /// Mark the torrent private.
    pub(crate) private: bool,
    /// Author comment.
    pub(crate) comment: Option<String>,
    /// Start seeding once created.
    pub(crate) start_seeding: bool,
}

impl QbitClient {
    /// Queue a torrent-creation task and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::UnsupportedVersion`] below qBittorrent 5.0.
    pub async fn creator_add_task(
        &self,
        source_path: &str,
        trackers: &[String],
        private: bool,
        comment: Option<&str>,
        start_seeding: bool,
    ) -> QbitResult<String> {
        self.require_creator_support("creator_add_task").await?;
        let params = CreatorTaskParams {
            source_path: source_path.to_string(),
            trackers: trackers.to_vec(),
            private,
            comment: comment.map(str::to_string),
            start_seeding,
        };
        let mut form = vec![
            ("sourcePath", params.source_path),
            ("private", params.private.to_string()),
            ("startSeeding", params.start_seeding.to_string()),
        ];
        if !params.trackers.is_empty() {
            form.push(("trackers", params.trackers.join("|")));
        }
        if let Some(comment) = params.comment {
            form.push(("comment", comment));
        }
        let body = self.post_form_text("torrentcreator/addTask", &form).await?;
        let value: serde_json::Value = serde_json::from_str(&body).map_err(QbitError::Decode)?;
        value
            .get("taskID")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| QbitError::Conflict {
                detail: "upstream did not return a task id".to_string(),
            })
    }

    /// Fetch status for creation tasks; `task_id` narrows to one task.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::UnsupportedVersion`] below qBittorrent 5.0.
    pub async fn creator_task_status(&self, task_id: Option<&str>) -> QbitResult<Vec<CreatorTask>> {
        self.require_creator_support("creator_task_status").await?;
        let mut query = Vec::new();
        if let Some(task_id) = task_id {
            query.push(("taskID", task_id.to_string()));
        }
        self.get_json("torrentcreator/status", &query).await
    }

    /// Download the produced `.torrent` file for a finished task.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::UnsupportedVersion`] below qBittorrent 5.0.
    pub async fn creator_task_file(&self, task_id: &str) -> QbitResult<Vec<u8>> {
        self.require_creator_support("creator_task_file").await?;
        self.get_bytes("torrentcreator/torrentFile", &[("taskID", task_id.to_string())])
            .await
    }

    /// Delete a creation task.
    ///
    /// # Errors
    ///
    /// Returns [`QbitError::UnsupportedVersion`] below qBittorrent 5.0.
    pub async fn creator_delete_task(&self, task_id: &str) -> QbitResult<()> {
        self.require_creator_support("creator_delete_task").await?;
        self.post_form("torrentcreator/deleteTask", &[("taskID", task_id.to_string())])
            .await
    }

    async fn require_creator_support(&self, operation: &'static str) -> QbitResult<()> {
        let version = self.version().await.unwrap_or_default();
        if major_version(&version) >= CREATOR_MIN_MAJOR {
            return Ok(());
        }
        Err(QbitError::UnsupportedVersion { version, operation })
    }
}

fn major_version(version: &str) -> u64 {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_version_parses_prefixed_strings() {
        assert_eq!(major_version("v5.0.2"), 5);
        assert_eq!(major_version("4.6.7"), 4);
        assert_eq!(major_version(""), 0);
        assert_eq!(major_version("garbage"), 0);
    }
}
