//! Filter dimensions and counter computation.

use std::collections::HashMap;

use flotilla_core::{Counters, TorrentState, TorrentView};
use flotilla_rules::{CompiledCondition, EvalContext, GroupIndex, RuleCondition};
use serde::{Deserialize, Serialize};

use crate::error::QueryResult;

/// Closed status filter vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    /// Matches everything.
    All,
    /// Download side of the lifecycle.
    Downloading,
    /// Seeding side of the lifecycle.
    Seeding,
    /// Finished downloading.
    Completed,
    /// Stopped by the operator (legacy name).
    Paused,
    /// Stopped by the operator.
    Stopped,
    /// Transferring payload right now.
    Active,
    /// Not transferring payload.
    Inactive,
    /// Not stopped.
    Resumed,
    /// Stalled in either direction.
    Stalled,
    /// Stalled while seeding.
    StalledUploading,
    /// Stalled while downloading.
    StalledDownloading,
    /// In an error condition.
    Errored,
    /// Verifying data.
    Checking,
    /// Relocating storage.
    Moving,
}

impl StatusFilter {
    /// Whether a torrent belongs to this status bucket.
    #[must_use]
    pub fn matches(self, view: &TorrentView) -> bool {
        match self {
            Self::All => true,
            Self::Downloading => view.state.is_downloading(),
            Self::Seeding => view.state.is_seeding(),
            Self::Completed => view.state.is_completed(),
            Self::Paused | Self::Stopped => view.state.is_stopped(),
            Self::Active => view.dlspeed > 0 || view.upspeed > 0,
            Self::Inactive => view.dlspeed == 0 && view.upspeed == 0,
            Self::Resumed => !view.state.is_stopped(),
            Self::Stalled => view.state.is_stalled(),
            Self::StalledUploading => view.state == TorrentState::StalledUp,
            Self::StalledDownloading => view.state == TorrentState::StalledDl,
            Self::Errored => view.state.is_errored(),
            Self::Checking => view.state.is_checking(),
            Self::Moving => view.state == TorrentState::Moving,
        }
    }

    /// Wire name used as the counter key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Downloading => "downloading",
            Self::Seeding => "seeding",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Resumed => "resumed",
            Self::Stalled => "stalled",
            Self::StalledUploading => "stalled_uploading",
            Self::StalledDownloading => "stalled_downloading",
            Self::Errored => "errored",
            Self::Checking => "checking",
            Self::Moving => "moving",
        }
    }

    /// Buckets reported in status counters (everything except `all`).
    pub(crate) const COUNTED: &'static [Self] = &[
        Self::Downloading,
        Self::Seeding,
        Self::Completed,
        Self::Stopped,
        Self::Active,
        Self::Inactive,
        Self::Stalled,
        Self::StalledUploading,
        Self::StalledDownloading,
        Self::Errored,
        Self::Checking,
        Self::Moving,
    ];
}

/// Tag dimension combination mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TagMatchMode {
    /// Any listed tag matches.
    #[default]
    Any,
    /// Every listed tag must be present.
    All,
}

/// Normalized filter over one snapshot's torrents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorrentFilter {
    /// Status buckets; empty means unrestricted.
    #[serde(default)]
    pub status: Vec<StatusFilter>,
    /// Categories; the empty string matches uncategorized torrents.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Tags; the empty string matches untagged torrents.
    #[serde(default)]
    pub tags: Vec<String>,
    /// How the tag list combines.
    #[serde(default)]
    pub tag_match_mode: TagMatchMode,
    /// Tracker registrable domains.
    #[serde(default)]
    pub trackers: Vec<String>,
    /// Expression filter in the rule-condition grammar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<RuleCondition>,
    /// Case-insensitive substring over name, hash, and category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// Per-torrent dimension match flags, computed once per torrent.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DimensionFlags {
    pub(crate) status: bool,
    pub(crate) category: bool,
    pub(crate) tags: bool,
    pub(crate) tracker: bool,
    pub(crate) rest: bool,
}

impl DimensionFlags {
    pub(crate) const fn all(self) -> bool {
        self.status && self.category && self.tags && self.tracker && self.rest
    }

    pub(crate) const fn except_status(self) -> bool {
        self.category && self.tags && self.tracker && self.rest
    }

    pub(crate) const fn except_category(self) -> bool {
        self.status && self.tags && self.tracker && self.rest
    }

    pub(crate) const fn except_tags(self) -> bool {
        self.status && self.category && self.tracker && self.rest
    }

    pub(crate) const fn except_tracker(self) -> bool {
        self.status && self.category && self.tags && self.rest
    }
}

/// A filter compiled for evaluation over many torrents.
pub(crate) struct CompiledFilter {
    filter: TorrentFilter,
    expr: Option<CompiledCondition>,
    search: Option<String>,
}

impl CompiledFilter {
    pub(crate) fn compile(filter: TorrentFilter) -> QueryResult<Self> {
        let expr = filter
            .expr
            .as_ref()
            .map(CompiledCondition::compile)
            .transpose()?;
        let search = filter
            .search
            .as_ref()
            .map(|needle| needle.trim().to_lowercase())
            .filter(|needle| !needle.is_empty());
        Ok(Self {
            filter,
            expr,
            search,
        })
    }

    pub(crate) fn flags(
        &self,
        view: &TorrentView,
        ctx: &EvalContext<'_>,
    ) -> DimensionFlags {
        let filter = &self.filter;
        let status = filter.status.is_empty()
            || filter.status.iter().any(|status| status.matches(view));
        let category = filter.categories.is_empty()
            || filter
                .categories
                .iter()
                .any(|category| view.category.eq_ignore_ascii_case(category));
        let tags = match (filter.tags.is_empty(), filter.tag_match_mode) {
            (true, _) => true,
            (false, TagMatchMode::Any) => filter.tags.iter().any(|tag| tag_matches(view, tag)),
            (false, TagMatchMode::All) => filter.tags.iter().all(|tag| tag_matches(view, tag)),
        };
        let tracker = filter.trackers.is_empty()
            || filter
                .trackers
                .iter()
                .any(|domain| view.tracker_domain.eq_ignore_ascii_case(domain));

        let expr_ok = self
            .expr
            .as_ref()
            .is_none_or(|condition| condition.matches(view, ctx));
        let search_ok = self.search.as_ref().is_none_or(|needle| {
            view.name.to_lowercase().contains(needle)
                || view.hash.contains(needle)
                || view.category.to_lowercase().contains(needle)
        });

        DimensionFlags {
            status,
            category,
            tags,
            tracker,
            rest: expr_ok && search_ok,
        }
    }
}

fn tag_matches(view: &TorrentView, tag: &str) -> bool {
    if tag.is_empty() {
        return view.tags.is_empty();
    }
    view.tags.iter().any(|candidate| candidate.eq_ignore_ascii_case(tag))
}

/// Evaluate a filter over a torrent iterator, producing the matched set
/// and the counter block in one pass.
pub(crate) fn evaluate<'a>(
    compiled: &CompiledFilter,
    torrents: impl Iterator<Item = &'a TorrentView>,
    now: i64,
    free_space: Option<i64>,
) -> (Vec<&'a TorrentView>, Counters) {
    let groups = GroupIndex::default();
    let ctx = EvalContext {
        now,
        free_space,
        groups: &groups,
    };

    let mut matched = Vec::new();
    let mut counters = Counters::default();

    for view in torrents {
        let flags = compiled.flags(view, &ctx);

        if flags.except_status() {
            for bucket in StatusFilter::COUNTED {
                if bucket.matches(view) {
                    bump(&mut counters.status, bucket.key());
                }
            }
        }
        if flags.except_category() {
            bump(&mut counters.categories, &view.category);
        }
        if flags.except_tags() {
            if view.tags.is_empty() {
                bump(&mut counters.tags, "");
            } else {
                for tag in &view.tags {
                    bump(&mut counters.tags, tag);
                }
            }
        }
        if flags.except_tracker() {
            bump(&mut counters.trackers, &view.tracker_domain);
        }

        if flags.all() {
            matched.push(view);
        }
    }

    (matched, counters)
}

fn bump(map: &mut HashMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_test_support::TorrentFixture;

    fn view(
        hash: &str,
        state: TorrentState,
        tags: &[&str],
        size: i64,
        category: &str,
    ) -> TorrentView {
        TorrentFixture::new(hash)
            .state(state)
            .tags(tags)
            .size(size)
            .category(category)
            .progress(0.5)
            .tracker("https://t.example.org/announce")
            .build()
    }

    fn mixed_views() -> Vec<TorrentView> {
        vec![
            view("h1", TorrentState::Downloading, &["a"], 1_000, ""),
            view("h2", TorrentState::StoppedUp, &["a", "b"], 2_000, ""),
            view("h3", TorrentState::StoppedDl, &[], 3_000, ""),
        ]
    }

    #[test]
    fn dimensions_and_combine_and_elements_or_combine() {
        let views = mixed_views();
        let compiled = CompiledFilter::compile(TorrentFilter {
            status: vec![StatusFilter::Completed, StatusFilter::Downloading],
            tags: vec!["a".to_string()],
            ..TorrentFilter::default()
        })
        .expect("compile");

        let (matched, counters) = evaluate(&compiled, views.iter(), 0, None);
        let hashes: Vec<&str> = matched.iter().map(|v| v.hash.as_str()).collect();
        assert_eq!(hashes, vec!["h1", "h2"]);

        // Status counters ignore the status filter but honor the tag
        // filter: h3 is untagged and drops out entirely.
        assert_eq!(counters.status.get("downloading"), Some(&1));
        assert_eq!(counters.status.get("completed"), Some(&1));
        assert_eq!(counters.status.get("stopped"), Some(&1));

        // Tag counters ignore the tag filter: all three count.
        assert_eq!(counters.tags.get("a"), Some(&2));
        assert_eq!(counters.tags.get("b"), Some(&1));
        assert_eq!(counters.tags.get(""), Some(&1));
    }

    #[test]
    fn empty_string_tag_matches_untagged() {
        let views = mixed_views();
        let compiled = CompiledFilter::compile(TorrentFilter {
            tags: vec![String::new()],
            ..TorrentFilter::default()
        })
        .expect("compile");
        let (matched, _) = evaluate(&compiled, views.iter(), 0, None);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].hash, "h3");
    }

    #[test]
    fn all_tag_mode_requires_every_tag() {
        let views = mixed_views();
        let compiled = CompiledFilter::compile(TorrentFilter {
            tags: vec!["a".to_string(), "b".to_string()],
            tag_match_mode: TagMatchMode::All,
            ..TorrentFilter::default()
        })
        .expect("compile");
        let (matched, _) = evaluate(&compiled, views.iter(), 0, None);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].hash, "h2");
    }

    #[test]
    fn search_applies_to_counters_on_every_axis() {
        let views = mixed_views();
        let compiled = CompiledFilter::compile(TorrentFilter {
            search: Some("torrent-h1".to_string()),
            ..TorrentFilter::default()
        })
        .expect("compile");
        let (matched, counters) = evaluate(&compiled, views.iter(), 0, None);
        assert_eq!(matched.len(), 1);
        assert_eq!(counters.tags.get("a"), Some(&1));
        assert_eq!(counters.tags.get("b"), None);
        assert_eq!(counters.status.get("downloading"), Some(&1));
    }

    #[test]
    fn expression_filter_uses_rule_grammar() {
        let views = mixed_views();
        let compiled = CompiledFilter::compile(TorrentFilter {
            expr: Some(
                serde_json::from_value(serde_json::json!({
                    "field": "size", "op": ">=", "value": 2000
                }))
                .expect("tree"),
            ),
            ..TorrentFilter::default()
        })
        .expect("compile");
        let (matched, _) = evaluate(&compiled, views.iter(), 0, None);
        let hashes: Vec<&str> = matched.iter().map(|v| v.hash.as_str()).collect();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains(&"h2"));
        assert!(hashes.contains(&"h3"));
    }

    #[test]
    fn counter_for_dimension_ignores_only_that_dimension() {
        // counter[D] equals the size of the set produced by
        // applying every dimension except D.
        let views = mixed_views();
        let compiled = CompiledFilter::compile(TorrentFilter {
            status: vec![StatusFilter::Downloading],
            tags: vec!["a".to_string()],
            ..TorrentFilter::default()
        })
        .expect("compile");
        let (_, counters) = evaluate(&compiled, views.iter(), 0, None);

        // Tag axis with status applied but tags ignored: only h1 is
        // downloading, carrying tag "a".
        assert_eq!(counters.tags.get("a"), Some(&1));
        assert_eq!(counters.tags.get("b"), None);

        // Status axis with tags applied but status ignored: h1 and h2.
        assert_eq!(counters.status.get("downloading"), Some(&1));
        assert_eq!(counters.status.get("completed"), Some(&1));
    }
}
