//! Incremental sync RPCs.

use crate::client::QbitClient;
use crate::error::QbitResult;
use crate::models::{MainData, TorrentPeers};

impl QbitClient {
    /// Fetch the incremental state delta since `rid`; pass 0 for a full
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_maindata(&self, rid: i64) -> QbitResult<MainData> {
        self.get_json("sync/maindata", &[("rid", rid.to_string())])
            .await
    }

    /// Fetch the incremental peer delta for one torrent.
    ///
    /// # Errors
    ///
    /// Returns a classified upstream error.
    pub async fn get_torrent_peers(&self, hash: &str, rid: i64) -> QbitResult<TorrentPeers> {
        self.get_json(
            "sync/torrentPeers",
            &[("hash", hash.to_string()), ("rid", rid.to_string())],
        )
        .await
    }
}
