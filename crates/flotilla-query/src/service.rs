//! Listing service over instance snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use flotilla_core::{Counters, Kinded, TorrentView};
use flotilla_sync::{Snapshot, SyncService};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::QueryResult;
use crate::filter::{CompiledFilter, TorrentFilter, evaluate};
use crate::sort::{SortDirection, SortKey, sort_views};

const MAX_LIMIT: usize = 2_000;
const DEFAULT_LIMIT: usize = 300;

/// One paginated list request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRequest {
    /// Filter dimensions.
    #[serde(flatten)]
    pub filter: TorrentFilter,
    /// Sort column.
    #[serde(default)]
    pub sort: SortKey,
    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
    /// Page size; clamped to 2000, defaulting to 300.
    #[serde(default)]
    pub limit: usize,
    /// Page offset.
    #[serde(default)]
    pub offset: usize,
}

/// One page plus totals and counters.
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    /// The page.
    pub data: Vec<TorrentView>,
    /// Matches before pagination.
    pub total: usize,
    /// Per-dimension counters (see the crate docs for the contract).
    pub counters: Counters,
    /// Whether the backing snapshot was inside its freshness window;
    /// surfaced as the `X-Data-Source` header, not in the body.
    #[serde(skip)]
    pub fresh: bool,
}

/// Column selectors for flat field listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSelector {
    /// Canonical hash.
    Hash,
    /// Display name.
    Name,
    /// Save path.
    SavePath,
    /// Content path.
    ContentPath,
    /// Category.
    Category,
    /// Primary tracker URL.
    Tracker,
}

impl FieldSelector {
    fn extract(self, view: &TorrentView) -> &str {
        match self {
            Self::Hash => &view.hash,
            Self::Name => &view.name,
            Self::SavePath => &view.save_path,
            Self::ContentPath => &view.content_path,
            Self::Category => &view.category,
            Self::Tracker => &view.tracker,
        }
    }
}

/// Cross-instance list request; `instance_ids` carries explicit priority
/// order when provided.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossListRequest {
    /// Filter, sort, and pagination.
    #[serde(flatten)]
    pub list: ListRequest,
    /// Instances to include, in priority order; `None` means all known
    /// instances with priority by ascending id.
    #[serde(default)]
    pub instance_ids: Option<Vec<i64>>,
}

/// One merged row.
#[derive(Debug, Clone, Serialize)]
pub struct CrossInstanceRow {
    /// The instance that won the merge for this hash.
    #[serde(rename = "instanceId")]
    pub instance_id: i64,
    /// The torrent record from that instance.
    #[serde(flatten)]
    pub torrent: TorrentView,
}

/// A per-instance failure surfaced alongside partial results.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceWarning {
    /// The failing instance.
    #[serde(rename = "instanceId")]
    pub instance_id: i64,
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Merged cross-instance page.
#[derive(Debug, Clone, Serialize)]
pub struct CrossListResponse {
    /// The page.
    pub data: Vec<CrossInstanceRow>,
    /// Matches before pagination.
    pub total: usize,
    /// Counters over the merged set.
    pub counters: Counters,
    /// Instances that could not contribute.
    pub warnings: Vec<InstanceWarning>,
}

/// Read-side facade: parses and executes list requests against the sync
/// layer.
pub struct ListingService {
    sync: Arc<SyncService>,
}

impl ListingService {
    /// Build the service.
    #[must_use]
    pub const fn new(sync: Arc<SyncService>) -> Self {
        Self { sync }
    }

    /// List one instance's torrents.
    ///
    /// # Errors
    ///
    /// Returns filter compile failures and snapshot read errors.
    pub async fn list(&self, instance_id: i64, request: ListRequest) -> QueryResult<ListResponse> {
        let read = self.sync.read(instance_id).await?;
        let mut response = list_snapshot(&read.snapshot, request)?;
        response.fresh = read.is_fresh();
        Ok(response)
    }

    /// Flat, deduplicated column listing over every match.
    ///
    /// # Errors
    ///
    /// Returns filter compile failures and snapshot read errors.
    pub async fn field_values(
        &self,
        instance_id: i64,
        field: FieldSelector,
        filter: TorrentFilter,
    ) -> QueryResult<Vec<String>> {
        let read = self.sync.read(instance_id).await?;
        let compiled = CompiledFilter::compile(filter)?;
        let (matched, _) = evaluate(
            &compiled,
            read.snapshot.torrents.values(),
            Utc::now().timestamp(),
            read.snapshot.free_space_on_disk,
        );
        let mut refs = matched;
        refs.sort_by(|a, b| a.hash.cmp(&b.hash));

        // Single pass: dedup while streaming into the output.
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for view in refs {
            let value = field.extract(view);
            if !value.is_empty() && seen.insert(value.to_string()) {
                values.push(value.to_string());
            }
        }
        Ok(values)
    }

    /// Merged listing across instances. `instance_ids` order is the merge
    /// priority; pass ids sorted ascending for the default lowest-id-wins
    /// behavior.
    ///
    /// # Errors
    ///
    /// Returns filter compile failures; unreachable instances degrade to
    /// warnings.
    pub async fn list_cross(
        &self,
        instance_ids: Vec<i64>,
        request: ListRequest,
    ) -> QueryResult<CrossListResponse> {
        let reads = self.sync.read_many(&instance_ids).await;
        let mut snapshots: Vec<(i64, Arc<Snapshot>)> = Vec::new();
        let mut warnings = Vec::new();
        let mut by_id: HashMap<i64, Arc<Snapshot>> = HashMap::new();
        for (id, result) in reads {
            match result {
                Ok(read) => {
                    by_id.insert(id, read.snapshot);
                }
                Err(err) => {
                    debug!(instance_id = id, error = %err, "cross-instance read failed");
                    warnings.push(InstanceWarning {
                        instance_id: id,
                        code: err.kind().code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        // Preserve the caller's priority order.
        for id in &instance_ids {
            if let Some(snapshot) = by_id.remove(id) {
                snapshots.push((*id, snapshot));
            }
        }
        let mut response = merge_and_list(&snapshots, request)?;
        response.warnings = warnings;
        Ok(response)
    }
}

/// Pure listing over one snapshot; the service adds freshness.
///
/// # Errors
///
/// Returns filter compile failures.
pub(crate) fn list_snapshot(snapshot: &Snapshot, request: ListRequest) -> QueryResult<ListResponse> {
    let compiled = CompiledFilter::compile(request.filter)?;
    let (mut matched, counters) = evaluate(
        &compiled,
        snapshot.torrents.values(),
        Utc::now().timestamp(),
        snapshot.free_space_on_disk,
    );
    sort_views(&mut matched, request.sort, request.direction);

    let total = matched.len();
    let limit = clamp_limit(request.limit);
    let data = matched
        .into_iter()
        .skip(request.offset)
        .take(limit)
        .cloned()
        .collect();
    Ok(ListResponse {
        data,
        total,
        counters,
        fresh: false,
    })
}

/// Pure merged listing: first snapshot in `snapshots` wins each hash.
///
/// # Errors
///
/// Returns filter compile failures.
pub(crate) fn merge_and_list(
    snapshots: &[(i64, Arc<Snapshot>)],
    request: ListRequest,
) -> QueryResult<CrossListResponse> {
    let mut origin: HashMap<String, i64> = HashMap::new();
    let mut merged: HashMap<String, &TorrentView> = HashMap::new();
    for (instance_id, snapshot) in snapshots {
        for (hash, view) in &snapshot.torrents {
            if !merged.contains_key(hash) {
                merged.insert(hash.clone(), view);
                origin.insert(hash.clone(), *instance_id);
            }
        }
    }

    let compiled = CompiledFilter::compile(request.filter)?;
    let (mut matched, counters) = evaluate(
        &compiled,
        merged.values().copied(),
        Utc::now().timestamp(),
        None,
    );
    sort_views(&mut matched, request.sort, request.direction);

    let total = matched.len();
    let limit = clamp_limit(request.limit);
    let data = matched
        .into_iter()
        .skip(request.offset)
        .take(limit)
        .map(|view| CrossInstanceRow {
            instance_id: origin.get(&view.hash).copied().unwrap_or_default(),
            torrent: view.clone(),
        })
        .collect();
    Ok(CrossListResponse {
        data,
        total,
        counters,
        warnings: Vec::new(),
    })
}

const fn clamp_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_LIMIT
    } else if limit > MAX_LIMIT {
        MAX_LIMIT
    } else {
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::StatusFilter;
    use flotilla_qbit::models::MainData;
    use std::time::Instant;

    fn snapshot(json: serde_json::Value) -> Arc<Snapshot> {
        let data: MainData = serde_json::from_value(json).expect("maindata");
        Arc::new(Snapshot::default().apply_maindata(&data, Instant::now()))
    }

    fn mixed_snapshot() -> Arc<Snapshot> {
        snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "h1": { "name": "one", "state": "downloading", "tags": "a", "size": 1000 },
                "h2": { "name": "two", "state": "stoppedUP", "tags": "a,b", "size": 2000 },
                "h3": { "name": "three", "state": "stoppedDL", "tags": "", "size": 3000 }
            }
        }))
    }

    #[test]
    fn status_and_tag_filters_combine_with_counters() {
        let request = ListRequest {
            filter: TorrentFilter {
                status: vec![StatusFilter::Completed, StatusFilter::Downloading],
                tags: vec!["a".to_string()],
                ..TorrentFilter::default()
            },
            sort: SortKey::Size,
            direction: SortDirection::Asc,
            limit: 10,
            offset: 0,
        };
        let response = list_snapshot(&mixed_snapshot(), request).expect("list");
        let hashes: Vec<&str> = response.data.iter().map(|v| v.hash.as_str()).collect();
        assert_eq!(hashes, vec!["h1", "h2"]);
        assert_eq!(response.total, 2);
        assert_eq!(response.counters.status.get("downloading"), Some(&1));
        assert_eq!(response.counters.status.get("completed"), Some(&1));
        assert_eq!(response.counters.tags.get("a"), Some(&2));
        assert_eq!(response.counters.tags.get("b"), Some(&1));
        assert_eq!(response.counters.tags.get(""), Some(&1));
    }

    #[test]
    fn pagination_is_a_prefix_partition_of_the_full_listing() {
        // A page concatenated with its successor is a prefix of
        // the unpaginated listing, with no duplicates or omissions.
        let full = list_snapshot(
            &mixed_snapshot(),
            ListRequest {
                limit: 100,
                ..ListRequest::default()
            },
        )
        .expect("full");
        let page = |offset| {
            list_snapshot(
                &mixed_snapshot(),
                ListRequest {
                    limit: 2,
                    offset,
                    ..ListRequest::default()
                },
            )
            .expect("page")
        };
        let first = page(0);
        let second = page(2);
        assert_eq!(first.total, full.total);

        let mut combined: Vec<String> =
            first.data.iter().map(|v| v.hash.clone()).collect();
        combined.extend(second.data.iter().map(|v| v.hash.clone()));
        let full_hashes: Vec<String> = full.data.iter().map(|v| v.hash.clone()).collect();
        assert_eq!(combined, full_hashes);
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(clamp_limit(0), 300);
        assert_eq!(clamp_limit(50), 50);
        assert_eq!(clamp_limit(10_000), 2_000);
    }

    #[test]
    fn cross_merge_dedups_by_priority() {
        let a = snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": { "hx": { "name": "shared", "state": "uploading" } }
        }));
        let b = snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "hx": { "name": "shared", "state": "uploading" },
                "hy": { "name": "only-b", "state": "uploading" }
            }
        }));

        let response = merge_and_list(
            &[(1, a.clone()), (2, b.clone())],
            ListRequest {
                limit: 100,
                ..ListRequest::default()
            },
        )
        .expect("merge");
        assert_eq!(response.total, 2);
        let shared = response
            .data
            .iter()
            .find(|row| row.torrent.hash == "hx")
            .expect("hx present");
        assert_eq!(shared.instance_id, 1);

        // Explicit priority reverses the winner.
        let response = merge_and_list(
            &[(2, b), (1, a)],
            ListRequest {
                limit: 100,
                ..ListRequest::default()
            },
        )
        .expect("merge");
        let shared = response
            .data
            .iter()
            .find(|row| row.torrent.hash == "hx")
            .expect("hx present");
        assert_eq!(shared.instance_id, 2);
    }

    #[test]
    fn field_selector_extracts_columns() {
        let snapshot = mixed_snapshot();
        let view = &snapshot.torrents["h1"];
        assert_eq!(FieldSelector::Name.extract(view), "one");
        assert_eq!(FieldSelector::Hash.extract(view), "h1");
    }
}
