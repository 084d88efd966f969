//! Stable sorting of matched torrents.

use std::cmp::Ordering;

use flotilla_core::TorrentView;
use serde::{Deserialize, Serialize};

/// Sortable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Unix timestamp the torrent was added.
    #[default]
    AddedOn,
    /// Display name (case-insensitive).
    Name,
    /// Payload size.
    Size,
    /// Completion fraction.
    Progress,
    /// Share ratio.
    Ratio,
    /// Upload speed.
    Upspeed,
    /// Download speed.
    Downspeed,
    /// Accumulated seeding time.
    SeedingTime,
    /// Estimated completion time.
    Eta,
    /// Category name.
    Category,
    /// Tracker registrable domain.
    TrackerDomain,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Sort in place: stable by the requested key, ties broken by canonical
/// hash ascending regardless of direction.
pub(crate) fn sort_views(views: &mut [&TorrentView], key: SortKey, direction: SortDirection) {
    views.sort_by(|a, b| {
        let ordering = compare(a, b, key);
        let ordering = match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        ordering.then_with(|| a.hash.cmp(&b.hash))
    });
}

fn compare(a: &TorrentView, b: &TorrentView, key: SortKey) -> Ordering {
    match key {
        SortKey::AddedOn => a.added_on.cmp(&b.added_on),
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::Progress => total_cmp(a.progress, b.progress),
        SortKey::Ratio => total_cmp(a.ratio, b.ratio),
        SortKey::Upspeed => a.upspeed.cmp(&b.upspeed),
        SortKey::Downspeed => a.dlspeed.cmp(&b.dlspeed),
        SortKey::SeedingTime => a.seeding_time.cmp(&b.seeding_time),
        SortKey::Eta => a.eta.cmp(&b.eta),
        SortKey::Category => a.category.cmp(&b.category),
        SortKey::TrackerDomain => a.tracker_domain.cmp(&b.tracker_domain),
    }
}

fn total_cmp(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_test_support::TorrentFixture;

    fn view(hash: &str, name: &str, size: i64) -> TorrentView {
        TorrentFixture::new(hash).name(name).size(size).build()
    }

    #[test]
    fn sorts_by_key_with_hash_tiebreak() {
        let a = view("bb", "same", 100);
        let b = view("aa", "same", 100);
        let c = view("cc", "other", 50);
        let mut refs: Vec<&TorrentView> = vec![&a, &b, &c];
        sort_views(&mut refs, SortKey::Size, SortDirection::Asc);
        let hashes: Vec<&str> = refs.iter().map(|v| v.hash.as_str()).collect();
        assert_eq!(hashes, vec!["cc", "aa", "bb"]);
    }

    #[test]
    fn descending_reverses_key_but_not_tiebreak() {
        let a = view("bb", "x", 100);
        let b = view("aa", "x", 100);
        let c = view("cc", "x", 50);
        let mut refs: Vec<&TorrentView> = vec![&a, &b, &c];
        sort_views(&mut refs, SortKey::Size, SortDirection::Desc);
        let hashes: Vec<&str> = refs.iter().map(|v| v.hash.as_str()).collect();
        assert_eq!(hashes, vec!["aa", "bb", "cc"]);
    }

    #[test]
    fn name_sort_is_case_insensitive() {
        let a = view("aa", "alpha", 0);
        let b = view("bb", "BETA", 0);
        let mut refs: Vec<&TorrentView> = vec![&b, &a];
        sort_views(&mut refs, SortKey::Name, SortDirection::Asc);
        assert_eq!(refs[0].hash, "aa");
    }
}
