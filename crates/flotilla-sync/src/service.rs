//! Instance-spanning sync facade: reads, optimistic mutations, details.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use flotilla_pool::{ClientHandle, ClientPool};
use flotilla_qbit::models::MainData;
use flotilla_qbit::{AddTorrentPayload, BulkVerb, QbitError};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::detail::{DetailCache, DetailEndpoint};
use crate::error::SyncResult;
use crate::manager::{MaindataSource, SnapshotManager, SnapshotRead};
use crate::snapshot::Snapshot;

type ManagerMap = HashMap<i64, Arc<SnapshotManager>>;

struct PoolSource {
    pool: Arc<ClientPool>,
    instance_id: i64,
}

#[async_trait]
impl MaindataSource for PoolSource {
    async fn fetch(&self, rid: i64) -> SyncResult<MainData> {
        let handle = self.pool.get_client(self.instance_id).await?;
        let result = handle.client().get_maindata(rid).await;
        handle.observe(&result);
        Ok(result?)
    }
}

/// Facade over every instance's snapshot plus the mutation fan-out.
///
/// Mutations patch the published snapshot first and then fire the
/// upstream call, so a read issued immediately after a mutation returns
/// already observes the change; a failed dispatch invalidates the
/// snapshot so the next read repairs the view.
pub struct SyncService {
    pool: Arc<ClientPool>,
    managers: ArcSwap<ManagerMap>,
    manager_lock: Mutex<()>,
    ttl: Duration,
    details: DetailCache,
}

impl SyncService {
    /// Build the service over a client pool.
    #[must_use]
    pub fn new(pool: Arc<ClientPool>, refresh_ttl: Duration, detail_ttl: Duration) -> Self {
        Self {
            pool,
            managers: ArcSwap::from_pointee(ManagerMap::new()),
            manager_lock: Mutex::new(()),
            ttl: refresh_ttl,
            details: DetailCache::new(detail_ttl),
        }
    }

    /// The snapshot manager for one instance, created lazily.
    pub async fn manager(&self, instance_id: i64) -> Arc<SnapshotManager> {
        if let Some(manager) = self.managers.load().get(&instance_id) {
            return Arc::clone(manager);
        }
        let _guard = self.manager_lock.lock().await;
        if let Some(manager) = self.managers.load().get(&instance_id) {
            return Arc::clone(manager);
        }
        let source = Arc::new(PoolSource {
            pool: Arc::clone(&self.pool),
            instance_id,
        });
        let manager = Arc::new(SnapshotManager::new(instance_id, source, self.ttl));
        let mut next: ManagerMap = self.managers.load().as_ref().clone();
        next.insert(instance_id, Arc::clone(&manager));
        self.managers.store(Arc::new(next));
        manager
    }

    /// Read one instance's snapshot per the freshness state machine.
    ///
    /// # Errors
    ///
    /// Returns an error when no image can be served.
    pub async fn read(&self, instance_id: i64) -> SyncResult<SnapshotRead> {
        let manager = self.manager(instance_id).await;
        manager.read().await
    }

    /// Read several instances in parallel; each id maps to its own
    /// result so one unreachable upstream does not poison the rest.
    pub async fn read_many(&self, instance_ids: &[i64]) -> Vec<(i64, SyncResult<SnapshotRead>)> {
        let reads = instance_ids.iter().map(|&id| async move {
            let result = self.read(id).await;
            (id, result)
        });
        join_all(reads).await
    }

    /// Drop cached state for an instance after an edit or delete.
    pub async fn forget_instance(&self, instance_id: i64) {
        let _guard = self.manager_lock.lock().await;
        let mut next: ManagerMap = self.managers.load().as_ref().clone();
        if next.remove(&instance_id).is_some() {
            self.managers.store(Arc::new(next));
        }
        self.details.purge_instance(instance_id);
        self.pool.invalidate(instance_id).await;
        debug!(instance_id, "dropped cached instance state");
    }

    /// The client pool backing this service.
    #[must_use]
    pub fn pool(&self) -> Arc<ClientPool> {
        Arc::clone(&self.pool)
    }

    async fn handle(&self, instance_id: i64) -> SyncResult<Arc<ClientHandle>> {
        Ok(self.pool.get_client(instance_id).await?)
    }

    async fn mutate<F, Fut>(
        &self,
        instance_id: i64,
        patch: impl Fn(&mut Snapshot),
        call: F,
    ) -> SyncResult<()>
    where
        F: FnOnce(Arc<ClientHandle>) -> Fut,
        Fut: Future<Output = Result<(), QbitError>>,
    {
        let handle = self.handle(instance_id).await?;
        let manager = self.manager(instance_id).await;
        manager.patch(patch);

        let result = call(Arc::clone(&handle)).await;
        handle.observe(&result);
        if let Err(err) = result {
            manager.invalidate();
            self.details.purge_instance(instance_id);
            return Err(err.into());
        }
        Ok(())
    }

    /// Apply a bulk verb with an optimistic state patch.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after rolling the snapshot back to
    /// stale.
    pub async fn bulk_action(
        &self,
        instance_id: i64,
        verb: BulkVerb,
        hashes: Vec<String>,
    ) -> SyncResult<()> {
        let hashes: Vec<String> = hashes.iter().map(|h| h.to_ascii_lowercase()).collect();
        let verb_hashes = hashes.clone();
        self.mutate(
            instance_id,
            move |snapshot| apply_verb_patch(snapshot, verb, &verb_hashes),
            |handle| async move { handle.client().bulk_action(verb, &hashes).await },
        )
        .await
    }

    /// Add tags to torrents, patching the snapshot immediately.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn add_tags(
        &self,
        instance_id: i64,
        hashes: Vec<String>,
        tags: Vec<String>,
    ) -> SyncResult<()> {
        let hashes: Vec<String> = hashes.iter().map(|h| h.to_ascii_lowercase()).collect();
        let patch_hashes = hashes.clone();
        let patch_tags = tags.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                snapshot.tags.extend(patch_tags.iter().cloned());
                for hash in &patch_hashes {
                    if let Some(view) = snapshot.torrents.get_mut(hash) {
                        view.tags.extend(patch_tags.iter().cloned());
                    }
                }
            },
            |handle| async move { handle.client().add_tags(&hashes, &tags).await },
        )
        .await
    }

    /// Remove tags from torrents.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn remove_tags(
        &self,
        instance_id: i64,
        hashes: Vec<String>,
        tags: Vec<String>,
    ) -> SyncResult<()> {
        let hashes: Vec<String> = hashes.iter().map(|h| h.to_ascii_lowercase()).collect();
        let patch_hashes = hashes.clone();
        let patch_tags = tags.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                for hash in &patch_hashes {
                    if let Some(view) = snapshot.torrents.get_mut(hash) {
                        for tag in &patch_tags {
                            view.tags.remove(tag);
                        }
                    }
                }
            },
            |handle| async move { handle.client().remove_tags(&hashes, &tags).await },
        )
        .await
    }

    /// Replace the full tag set on torrents.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn set_tags(
        &self,
        instance_id: i64,
        hashes: Vec<String>,
        tags: Vec<String>,
    ) -> SyncResult<()> {
        let hashes: Vec<String> = hashes.iter().map(|h| h.to_ascii_lowercase()).collect();
        let patch_hashes = hashes.clone();
        let patch_tags = tags.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                snapshot.tags.extend(patch_tags.iter().cloned());
                for hash in &patch_hashes {
                    if let Some(view) = snapshot.torrents.get_mut(hash) {
                        view.tags = patch_tags.iter().cloned().collect();
                    }
                }
            },
            |handle| async move { handle.client().set_tags(&hashes, &tags).await },
        )
        .await
    }

    /// Create tags upstream and in the snapshot.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn create_tags(&self, instance_id: i64, tags: Vec<String>) -> SyncResult<()> {
        let patch_tags = tags.clone();
        self.mutate(
            instance_id,
            move |snapshot| snapshot.tags.extend(patch_tags.iter().cloned()),
            |handle| async move { handle.client().create_tags(&tags).await },
        )
        .await
    }

    /// Delete tags everywhere.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn delete_tags(&self, instance_id: i64, tags: Vec<String>) -> SyncResult<()> {
        let patch_tags = tags.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                for tag in &patch_tags {
                    snapshot.tags.remove(tag);
                    for view in snapshot.torrents.values_mut() {
                        view.tags.remove(tag);
                    }
                }
            },
            |handle| async move { handle.client().delete_tags(&tags).await },
        )
        .await
    }

    /// Assign a category; empty string clears it.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn set_category(
        &self,
        instance_id: i64,
        hashes: Vec<String>,
        category: String,
    ) -> SyncResult<()> {
        let hashes: Vec<String> = hashes.iter().map(|h| h.to_ascii_lowercase()).collect();
        let patch_hashes = hashes.clone();
        let patch_category = category.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                for hash in &patch_hashes {
                    if let Some(view) = snapshot.torrents.get_mut(hash) {
                        view.category = patch_category.clone();
                    }
                }
            },
            |handle| async move { handle.client().set_category(&hashes, &category).await },
        )
        .await
    }

    /// Create a category.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn create_category(
        &self,
        instance_id: i64,
        name: String,
        save_path: String,
    ) -> SyncResult<()> {
        let patch_name = name.clone();
        let patch_path = save_path.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                snapshot.categories.insert(
                    patch_name.clone(),
                    flotilla_core::Category {
                        name: patch_name.clone(),
                        save_path: patch_path.clone(),
                    },
                );
            },
            |handle| async move { handle.client().create_category(&name, &save_path).await },
        )
        .await
    }

    /// Change a category's save path.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn edit_category(
        &self,
        instance_id: i64,
        name: String,
        save_path: String,
    ) -> SyncResult<()> {
        let patch_name = name.clone();
        let patch_path = save_path.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                if let Some(category) = snapshot.categories.get_mut(&patch_name) {
                    category.save_path = patch_path.clone();
                }
            },
            |handle| async move { handle.client().edit_category(&name, &save_path).await },
        )
        .await
    }

    /// Remove categories; member torrents become uncategorized.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn remove_categories(
        &self,
        instance_id: i64,
        names: Vec<String>,
    ) -> SyncResult<()> {
        let patch_names = names.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                for name in &patch_names {
                    snapshot.categories.remove(name);
                    for view in snapshot.torrents.values_mut() {
                        if view.category == *name {
                            view.category.clear();
                        }
                    }
                }
            },
            |handle| async move { handle.client().remove_categories(&names).await },
        )
        .await
    }

    /// Set share limits on torrents.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn set_share_limits(
        &self,
        instance_id: i64,
        hashes: Vec<String>,
        ratio_limit: f64,
        seeding_time_limit: i64,
        inactive_seeding_time_limit: i64,
    ) -> SyncResult<()> {
        let hashes: Vec<String> = hashes.iter().map(|h| h.to_ascii_lowercase()).collect();
        let patch_hashes = hashes.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                for hash in &patch_hashes {
                    if let Some(view) = snapshot.torrents.get_mut(hash) {
                        view.ratio_limit = ratio_limit;
                        view.seeding_time_limit = seeding_time_limit;
                    }
                }
            },
            |handle| async move {
                handle
                    .client()
                    .set_share_limits(
                        &hashes,
                        ratio_limit,
                        seeding_time_limit,
                        inactive_seeding_time_limit,
                    )
                    .await
            },
        )
        .await
    }

    /// Set per-torrent speed limits in bytes per second; `None` leaves a
    /// direction untouched, `Some(0)` clears it.
    ///
    /// # Errors
    ///
    /// Returns the first dispatch failure after invalidating the snapshot.
    pub async fn set_speed_limits(
        &self,
        instance_id: i64,
        hashes: Vec<String>,
        upload_bps: Option<i64>,
        download_bps: Option<i64>,
    ) -> SyncResult<()> {
        let hashes: Vec<String> = hashes.iter().map(|h| h.to_ascii_lowercase()).collect();
        if let Some(limit) = upload_bps {
            let patch_hashes = hashes.clone();
            let call_hashes = hashes.clone();
            self.mutate(
                instance_id,
                move |snapshot| {
                    for hash in &patch_hashes {
                        if let Some(view) = snapshot.torrents.get_mut(hash) {
                            view.up_limit = limit;
                        }
                    }
                },
                |handle| async move { handle.client().set_upload_limit(&call_hashes, limit).await },
            )
            .await?;
        }
        if let Some(limit) = download_bps {
            let patch_hashes = hashes.clone();
            self.mutate(
                instance_id,
                move |snapshot| {
                    for hash in &patch_hashes {
                        if let Some(view) = snapshot.torrents.get_mut(hash) {
                            view.dl_limit = limit;
                        }
                    }
                },
                |handle| async move { handle.client().set_download_limit(&hashes, limit).await },
            )
            .await?;
        }
        Ok(())
    }

    /// Move torrent storage.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn set_location(
        &self,
        instance_id: i64,
        hashes: Vec<String>,
        location: String,
    ) -> SyncResult<()> {
        let hashes: Vec<String> = hashes.iter().map(|h| h.to_ascii_lowercase()).collect();
        let patch_hashes = hashes.clone();
        let patch_location = location.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                for hash in &patch_hashes {
                    if let Some(view) = snapshot.torrents.get_mut(hash) {
                        view.save_path = patch_location.clone();
                    }
                }
            },
            |handle| async move { handle.client().set_location(&hashes, &location).await },
        )
        .await
    }

    /// Rename a torrent.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure after invalidating the snapshot.
    pub async fn rename_torrent(
        &self,
        instance_id: i64,
        hash: String,
        name: String,
    ) -> SyncResult<()> {
        let hash = hash.to_ascii_lowercase();
        let patch_hash = hash.clone();
        let patch_name = name.clone();
        self.mutate(
            instance_id,
            move |snapshot| {
                if let Some(view) = snapshot.torrents.get_mut(&patch_hash) {
                    view.name = patch_name.clone();
                }
            },
            |handle| async move { handle.client().rename_torrent(&hash, &name).await },
        )
        .await
    }

    /// Add torrents; the snapshot is invalidated rather than patched
    /// because patches never invent records.
    ///
    /// # Errors
    ///
    /// Returns the dispatch failure.
    pub async fn add_torrent(
        &self,
        instance_id: i64,
        payload: AddTorrentPayload,
    ) -> SyncResult<()> {
        let handle = self.handle(instance_id).await?;
        let result = handle.client().add_torrent(payload).await;
        handle.observe(&result);
        result?;
        let manager = self.manager(instance_id).await;
        manager.invalidate();
        Ok(())
    }

    async fn detail(
        &self,
        instance_id: i64,
        hash: &str,
        endpoint: DetailEndpoint,
    ) -> SyncResult<Value> {
        let hash = hash.to_ascii_lowercase();
        if let Some(cached) = self.details.get(instance_id, &hash, endpoint) {
            return Ok(cached);
        }
        let handle = self.handle(instance_id).await?;
        let client = handle.client();
        let result: Result<Value, QbitError> = match endpoint {
            DetailEndpoint::Properties => client
                .get_properties(&hash)
                .await
                .and_then(|v| to_value(&v)),
            DetailEndpoint::Files => client.get_files(&hash).await.and_then(|v| to_value(&v)),
            DetailEndpoint::Trackers => {
                client.get_trackers(&hash).await.and_then(|v| to_value(&v))
            }
            DetailEndpoint::Peers => client
                .get_torrent_peers(&hash, 0)
                .await
                .and_then(|v| to_value(&v)),
            DetailEndpoint::WebSeeds => {
                client.get_webseeds(&hash).await.and_then(|v| to_value(&v))
            }
            DetailEndpoint::PieceStates => client
                .get_piece_states(&hash)
                .await
                .and_then(|v| to_value(&v)),
        };
        handle.observe(&result);
        let value = result?;
        self.details.put(instance_id, &hash, endpoint, value.clone());
        Ok(value)
    }

    /// Per-hash detail, micro-cached for 2 s by default.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown hashes and classified upstream
    /// errors otherwise.
    pub async fn torrent_detail(
        &self,
        instance_id: i64,
        hash: &str,
        endpoint: DetailEndpoint,
    ) -> SyncResult<Value> {
        self.detail(instance_id, hash, endpoint).await
    }

    /// Export the `.torrent` file for a hash; never cached.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown hashes.
    pub async fn export_torrent(&self, instance_id: i64, hash: &str) -> SyncResult<Vec<u8>> {
        let handle = self.handle(instance_id).await?;
        let result = handle.client().export_torrent(&hash.to_ascii_lowercase()).await;
        handle.observe(&result);
        Ok(result?)
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, QbitError> {
    serde_json::to_value(value).map_err(QbitError::Decode)
}

fn apply_verb_patch(snapshot: &mut Snapshot, verb: BulkVerb, hashes: &[String]) {
    use flotilla_core::TorrentState;

    match verb {
        BulkVerb::Delete { .. } => {
            for hash in hashes {
                snapshot.torrents.remove(hash);
            }
            snapshot.rebuild_trackers_index();
        }
        BulkVerb::Stop => {
            for hash in hashes {
                if let Some(view) = snapshot.torrents.get_mut(hash) {
                    view.state = if view.state.is_completed() {
                        TorrentState::StoppedUp
                    } else {
                        TorrentState::StoppedDl
                    };
                    view.dlspeed = 0;
                    view.upspeed = 0;
                }
            }
        }
        BulkVerb::Start => {
            for hash in hashes {
                if let Some(view) = snapshot.torrents.get_mut(hash) {
                    view.state = if view.state.is_completed() {
                        TorrentState::StalledUp
                    } else {
                        TorrentState::StalledDl
                    };
                }
            }
        }
        BulkVerb::ForceStart => {
            for hash in hashes {
                if let Some(view) = snapshot.torrents.get_mut(hash) {
                    view.state = if view.state.is_completed() {
                        TorrentState::ForcedUp
                    } else {
                        TorrentState::ForcedDl
                    };
                }
            }
        }
        BulkVerb::Recheck => {
            for hash in hashes {
                if let Some(view) = snapshot.torrents.get_mut(hash) {
                    view.state = if view.state.is_completed() {
                        TorrentState::CheckingUp
                    } else {
                        TorrentState::CheckingDl
                    };
                }
            }
        }
        // Queue moves, reannounce, and toggles have no snapshot-visible
        // effect worth guessing at; the next refresh reflects them.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_core::TorrentState;

    fn snapshot_with(hashes: &[&str], state: TorrentState) -> Snapshot {
        let data: MainData = serde_json::from_value(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": hashes
                .iter()
                .map(|h| ((*h).to_string(), serde_json::json!({ "name": h, "state": "downloading" })))
                .collect::<serde_json::Map<String, Value>>()
        }))
        .expect("fixture");
        let mut snapshot = Snapshot::default().apply_maindata(&data, std::time::Instant::now());
        for view in snapshot.torrents.values_mut() {
            view.state = state;
        }
        snapshot
    }

    #[test]
    fn delete_patch_removes_records_and_index_entries() {
        let mut snapshot = snapshot_with(&["aa", "bb"], TorrentState::Uploading);
        apply_verb_patch(
            &mut snapshot,
            BulkVerb::Delete { delete_files: false },
            &["aa".to_string()],
        );
        assert!(!snapshot.torrents.contains_key("aa"));
        assert!(snapshot.torrents.contains_key("bb"));
        for members in snapshot.trackers_index.values() {
            assert!(!members.contains("aa"));
        }
    }

    #[test]
    fn stop_patch_picks_the_right_side() {
        let mut snapshot = snapshot_with(&["aa"], TorrentState::Uploading);
        apply_verb_patch(&mut snapshot, BulkVerb::Stop, &["aa".to_string()]);
        assert_eq!(snapshot.torrents["aa"].state, TorrentState::StoppedUp);

        let mut snapshot = snapshot_with(&["aa"], TorrentState::Downloading);
        apply_verb_patch(&mut snapshot, BulkVerb::Stop, &["aa".to_string()]);
        assert_eq!(snapshot.torrents["aa"].state, TorrentState::StoppedDl);
    }

    #[test]
    fn patch_never_invents_torrents() {
        let mut snapshot = snapshot_with(&["aa"], TorrentState::Downloading);
        apply_verb_patch(&mut snapshot, BulkVerb::Start, &["zz".to_string()]);
        assert_eq!(snapshot.torrents.len(), 1);
        assert!(!snapshot.torrents.contains_key("zz"));
    }
}
