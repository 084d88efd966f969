//! The cached image of one upstream's torrent-level state.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use flotilla_core::{Category, TorrentState, TorrentView, canonical_hash, tracker_domain};
use flotilla_qbit::models::{MainData, TorrentDelta};

/// Lifecycle of a cached snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    /// Never populated.
    Empty,
    /// A populate is in flight; readers with no prior image wait for it,
    /// readers holding a stale image are served that image meanwhile.
    Populating,
    /// Inside the freshness window.
    Fresh,
    /// Past the freshness window; served while a refresh proceeds.
    Stale,
    /// The last refresh failed; the prior image is served with a warning.
    Error,
}

/// Immutable cached state for one instance.
///
/// Cloned wholesale for every refresh or optimistic patch and republished
/// behind the manager's atomic pointer; never mutated in place once
/// published.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Torrents keyed by canonical hash.
    pub torrents: HashMap<String, TorrentView>,
    /// Categories keyed by name.
    pub categories: HashMap<String, Category>,
    /// Known tags.
    pub tags: BTreeSet<String>,
    /// Tracker domain to member hashes; values are subsets of
    /// `torrents.keys()`.
    pub trackers_index: HashMap<String, BTreeSet<String>>,
    /// Free space reported by the upstream's server state, when known.
    pub free_space_on_disk: Option<i64>,
    /// When the snapshot was last confirmed against the upstream.
    pub fetched_at: Option<Instant>,
    /// Monotonic counter bumped on every refresh and optimistic patch.
    pub serving_version: u64,
    /// Incremental sync cursor to echo on the next `sync/maindata` call.
    pub rid: i64,
    /// Last refresh failure, cleared on success.
    pub last_error: Option<String>,
    /// Set by a failed optimistic mutation to force the next read to
    /// refresh regardless of the freshness window.
    pub expired: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            torrents: HashMap::new(),
            categories: HashMap::new(),
            tags: BTreeSet::new(),
            trackers_index: HashMap::new(),
            free_space_on_disk: None,
            fetched_at: None,
            serving_version: 0,
            rid: 0,
            last_error: None,
            expired: false,
        }
    }
}

impl Snapshot {
    /// Whether the snapshot has ever been populated.
    #[must_use]
    pub const fn is_populated(&self) -> bool {
        self.fetched_at.is_some()
    }

    /// Apply a `sync/maindata` payload to a clone of this snapshot and
    /// return the successor image.
    #[must_use]
    pub fn apply_maindata(&self, data: &MainData, now: Instant) -> Self {
        let mut next = if data.full_update.unwrap_or(false) {
            Self {
                serving_version: self.serving_version,
                ..Self::default()
            }
        } else {
            self.clone()
        };

        if let Some(removed) = &data.torrents_removed {
            for hash in removed {
                next.torrents.remove(&hash.to_ascii_lowercase());
            }
        }
        if let Some(torrents) = &data.torrents {
            for (upstream_hash, delta) in torrents {
                let key = canonical_hash(
                    delta.infohash_v1.as_deref().or(Some(upstream_hash)),
                    delta.infohash_v2.as_deref(),
                )
                .unwrap_or_else(|| upstream_hash.to_ascii_lowercase());
                match next.torrents.get_mut(&key) {
                    Some(existing) => apply_delta(existing, delta),
                    None => {
                        let mut view = empty_view(key.clone(), upstream_hash);
                        apply_delta(&mut view, delta);
                        next.torrents.insert(key, view);
                    }
                }
            }
        }

        if let Some(removed) = &data.categories_removed {
            for name in removed {
                next.categories.remove(name);
            }
        }
        if let Some(categories) = &data.categories {
            for (name, info) in categories {
                next.categories.insert(
                    name.clone(),
                    Category {
                        name: if info.name.is_empty() {
                            name.clone()
                        } else {
                            info.name.clone()
                        },
                        save_path: info.save_path.clone(),
                    },
                );
            }
        }

        if let Some(removed) = &data.tags_removed {
            for tag in removed {
                next.tags.remove(tag);
            }
        }
        if let Some(tags) = &data.tags {
            next.tags.extend(tags.iter().cloned());
        }

        if let Some(trackers) = &data.trackers {
            // Backfill primary announce URLs for torrents whose delta left
            // the tracker field empty.
            for (url, hashes) in trackers {
                for hash in hashes {
                    if let Some(view) = next.torrents.get_mut(&hash.to_ascii_lowercase()) {
                        if view.tracker.is_empty() {
                            view.tracker = url.clone();
                            view.tracker_domain = tracker_domain(url);
                        }
                    }
                }
            }
        }

        if let Some(server_state) = &data.server_state {
            if let Some(free) = server_state.free_space_on_disk {
                next.free_space_on_disk = Some(free);
            }
        }

        next.rebuild_trackers_index();
        next.rid = data.rid;
        next.fetched_at = Some(now);
        next.serving_version += 1;
        next.last_error = None;
        next.expired = false;
        next
    }

    /// Rebuild the domain index from the torrent set.
    pub fn rebuild_trackers_index(&mut self) {
        let mut index: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (hash, view) in &self.torrents {
            index
                .entry(view.tracker_domain.clone())
                .or_default()
                .insert(hash.clone());
        }
        self.trackers_index = index;
    }

    /// Hashes present in the snapshot out of the requested set.
    #[must_use]
    pub fn known_hashes(&self, hashes: &[String]) -> Vec<String> {
        hashes
            .iter()
            .map(|hash| hash.to_ascii_lowercase())
            .filter(|hash| self.torrents.contains_key(hash))
            .collect()
    }
}

fn empty_view(canonical: String, upstream_hash: &str) -> TorrentView {
    TorrentView {
        hash: canonical,
        infohash_v1: Some(upstream_hash.to_ascii_lowercase()),
        infohash_v2: None,
        name: String::new(),
        size: 0,
        progress: 0.0,
        state: TorrentState::Unknown,
        category: String::new(),
        tags: BTreeSet::new(),
        tracker: String::new(),
        tracker_domain: String::new(),
        added_on: 0,
        completion_on: 0,
        save_path: String::new(),
        content_path: String::new(),
        ratio: 0.0,
        ratio_limit: -2.0,
        seeding_time: 0,
        seeding_time_limit: -2,
        dlspeed: 0,
        upspeed: 0,
        dl_limit: 0,
        up_limit: 0,
        num_seeds: 0,
        num_leechs: 0,
        eta: 8_640_000,
        is_private: false,
        amount_left: 0,
        time_active: 0,
        last_activity: 0,
        availability: 0.0,
        uploaded: 0,
        downloaded: 0,
    }
}

fn parse_state(raw: &str) -> TorrentState {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .unwrap_or(TorrentState::Unknown)
}

fn split_tags(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn apply_delta(view: &mut TorrentView, delta: &TorrentDelta) {
    if let Some(v1) = &delta.infohash_v1 {
        if !v1.is_empty() {
            view.infohash_v1 = Some(v1.to_ascii_lowercase());
        }
    }
    if let Some(v2) = &delta.infohash_v2 {
        if !v2.is_empty() {
            view.infohash_v2 = Some(v2.to_ascii_lowercase());
        }
    }
    if let Some(name) = &delta.name {
        view.name = name.clone();
    }
    if let Some(size) = delta.size {
        view.size = size;
    }
    if let Some(progress) = delta.progress {
        view.progress = progress;
    }
    if let Some(state) = &delta.state {
        view.state = parse_state(state);
    }
    if let Some(category) = &delta.category {
        view.category = category.clone();
    }
    if let Some(tags) = &delta.tags {
        view.tags = split_tags(tags);
    }
    if let Some(tracker) = &delta.tracker {
        view.tracker = tracker.clone();
        view.tracker_domain = tracker_domain(tracker);
    }
    if let Some(added_on) = delta.added_on {
        view.added_on = added_on;
    }
    if let Some(completion_on) = delta.completion_on {
        view.completion_on = completion_on;
    }
    if let Some(save_path) = &delta.save_path {
        view.save_path = save_path.clone();
    }
    if let Some(content_path) = &delta.content_path {
        view.content_path = content_path.clone();
    }
    if let Some(ratio) = delta.ratio {
        view.ratio = ratio;
    }
    if let Some(ratio_limit) = delta.ratio_limit {
        view.ratio_limit = ratio_limit;
    }
    if let Some(seeding_time) = delta.seeding_time {
        view.seeding_time = seeding_time;
    }
    if let Some(limit) = delta.seeding_time_limit {
        view.seeding_time_limit = limit;
    }
    if let Some(dlspeed) = delta.dlspeed {
        view.dlspeed = dlspeed;
    }
    if let Some(upspeed) = delta.upspeed {
        view.upspeed = upspeed;
    }
    if let Some(dl_limit) = delta.dl_limit {
        view.dl_limit = dl_limit;
    }
    if let Some(up_limit) = delta.up_limit {
        view.up_limit = up_limit;
    }
    if let Some(num_seeds) = delta.num_seeds {
        view.num_seeds = num_seeds;
    }
    if let Some(num_leechs) = delta.num_leechs {
        view.num_leechs = num_leechs;
    }
    if let Some(eta) = delta.eta {
        view.eta = eta;
    }
    if let Some(private) = delta.private {
        view.is_private = private;
    }
    if let Some(amount_left) = delta.amount_left {
        view.amount_left = amount_left;
    }
    if let Some(time_active) = delta.time_active {
        view.time_active = time_active;
    }
    if let Some(last_activity) = delta.last_activity {
        view.last_activity = last_activity;
    }
    if let Some(availability) = delta.availability {
        view.availability = availability;
    }
    if let Some(uploaded) = delta.uploaded {
        view.uploaded = uploaded;
    }
    if let Some(downloaded) = delta.downloaded {
        view.downloaded = downloaded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maindata(json: serde_json::Value) -> MainData {
        serde_json::from_value(json).expect("maindata fixture")
    }

    #[test]
    fn full_update_replaces_prior_state() {
        let first = Snapshot::default().apply_maindata(
            &maindata(serde_json::json!({
                "rid": 1,
                "full_update": true,
                "torrents": {
                    "AABB": {
                        "name": "one",
                        "state": "downloading",
                        "tracker": "https://tracker.example.org/announce"
                    }
                }
            })),
            Instant::now(),
        );
        assert_eq!(first.torrents.len(), 1);
        assert_eq!(first.serving_version, 1);
        assert_eq!(first.rid, 1);
        let view = &first.torrents["aabb"];
        assert_eq!(view.name, "one");
        assert_eq!(view.state, TorrentState::Downloading);
        assert_eq!(view.tracker_domain, "example.org");

        let second = first.apply_maindata(
            &maindata(serde_json::json!({
                "rid": 2,
                "full_update": true,
                "torrents": { "ccdd": { "name": "two", "state": "uploading" } }
            })),
            Instant::now(),
        );
        assert_eq!(second.torrents.len(), 1);
        assert!(second.torrents.contains_key("ccdd"));
        assert_eq!(second.serving_version, 2);
    }

    #[test]
    fn partial_update_merges_and_removes() {
        let base = Snapshot::default().apply_maindata(
            &maindata(serde_json::json!({
                "rid": 1,
                "full_update": true,
                "torrents": {
                    "aabb": { "name": "one", "state": "downloading", "progress": 0.2 },
                    "ccdd": { "name": "two", "state": "uploading" }
                }
            })),
            Instant::now(),
        );

        let next = base.apply_maindata(
            &maindata(serde_json::json!({
                "rid": 2,
                "torrents": { "aabb": { "progress": 0.9 } },
                "torrents_removed": ["ccdd"]
            })),
            Instant::now(),
        );
        assert_eq!(next.torrents.len(), 1);
        let view = &next.torrents["aabb"];
        assert!((view.progress - 0.9).abs() < f64::EPSILON);
        // Untouched fields survive the merge.
        assert_eq!(view.name, "one");
        assert_eq!(next.serving_version, base.serving_version + 1);
    }

    #[test]
    fn trackers_index_tracks_membership() {
        let snapshot = Snapshot::default().apply_maindata(
            &maindata(serde_json::json!({
                "rid": 1,
                "full_update": true,
                "torrents": {
                    "aabb": { "tracker": "https://a.example.org/x" },
                    "ccdd": { "tracker": "https://b.example.org/x" },
                    "eeff": { "tracker": "" }
                }
            })),
            Instant::now(),
        );
        assert_eq!(snapshot.trackers_index["example.org"].len(), 2);
        assert!(snapshot.trackers_index[""].contains("eeff"));
        for members in snapshot.trackers_index.values() {
            for hash in members {
                assert!(snapshot.torrents.contains_key(hash));
            }
        }
    }

    #[test]
    fn trackers_map_backfills_empty_tracker_fields() {
        let snapshot = Snapshot::default().apply_maindata(
            &maindata(serde_json::json!({
                "rid": 1,
                "full_update": true,
                "torrents": { "aabb": { "name": "one" } },
                "trackers": { "https://t.example.net/announce": ["aabb"] }
            })),
            Instant::now(),
        );
        assert_eq!(snapshot.torrents["aabb"].tracker_domain, "example.net");
    }

    #[test]
    fn tag_and_category_deltas_apply() {
        let base = Snapshot::default().apply_maindata(
            &maindata(serde_json::json!({
                "rid": 1,
                "full_update": true,
                "tags": ["iso", "keep"],
                "categories": { "linux": { "name": "linux", "savePath": "/dl/linux" } }
            })),
            Instant::now(),
        );
        assert!(base.tags.contains("keep"));
        assert_eq!(base.categories["linux"].save_path, "/dl/linux");

        let next = base.apply_maindata(
            &maindata(serde_json::json!({
                "rid": 2,
                "tags_removed": ["keep"],
                "categories_removed": ["linux"]
            })),
            Instant::now(),
        );
        assert!(!next.tags.contains("keep"));
        assert!(next.categories.is_empty());
    }

    #[test]
    fn serving_version_is_monotonic_across_refreshes() {
        let mut snapshot = Snapshot::default();
        for rid in 1..5 {
            let next = snapshot.apply_maindata(
                &maindata(serde_json::json!({ "rid": rid, "torrents": {} })),
                Instant::now(),
            );
            assert!(next.serving_version > snapshot.serving_version);
            snapshot = next;
        }
    }
}
