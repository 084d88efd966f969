//! Grouping partitions: equivalence classes of torrents used by
//! `group_size` and `is_grouped` conditions.
//!
//! Partitions are computed once per rule per tick and exposed to the
//! evaluator as O(1) lookups from hash to group size; the recursive walker
//! never scans the candidate set itself.

use std::collections::{HashMap, HashSet};

use flotilla_core::TorrentView;

use crate::condition::RuleCondition;

/// Buckets torrents sharing a normalized content path (cross-seeds).
pub(crate) const GROUP_CROSS_SEED: &str = "cross_seed.content_path";
/// Buckets torrents sharing a parsed release item (name stem).
pub(crate) const GROUP_RELEASE: &str = "release.item";
/// Buckets torrents sharing an on-disk (device, inode) signature.
pub(crate) const GROUP_HARDLINK: &str = "hardlink.signature";

/// Partitions keyed by group id, then bucket key, holding member hashes.
#[derive(Debug, Default)]
pub struct GroupIndex {
    partitions: HashMap<String, Partition>,
}

#[derive(Debug, Default)]
struct Partition {
    bucket_of: HashMap<String, String>,
    bucket_sizes: HashMap<String, usize>,
    members: HashMap<String, Vec<String>>,
}

impl GroupIndex {
    /// Group size for a hash under a group id; 0 when unbucketed.
    #[must_use]
    pub fn group_size(&self, group_id: &str, hash: &str) -> usize {
        self.partitions
            .get(group_id)
            .and_then(|partition| {
                let bucket = partition.bucket_of.get(hash)?;
                partition.bucket_sizes.get(bucket).copied()
            })
            .unwrap_or(0)
    }

    /// Hashes sharing a bucket with `hash` (itself included); empty when
    /// unbucketed.
    #[must_use]
    pub fn group_members(&self, group_id: &str, hash: &str) -> Vec<String> {
        self.partitions
            .get(group_id)
            .and_then(|partition| {
                let bucket = partition.bucket_of.get(hash)?;
                partition.members.get(bucket).cloned()
            })
            .unwrap_or_default()
    }

    /// Record one membership; exposed for tests and incremental builders.
    pub fn insert_member(&mut self, group_id: &str, bucket: &str, hash: &str) {
        let partition = self.partitions.entry(group_id.to_string()).or_default();
        partition
            .bucket_of
            .insert(hash.to_string(), bucket.to_string());
        *partition.bucket_sizes.entry(bucket.to_string()).or_insert(0) += 1;
        partition
            .members
            .entry(bucket.to_string())
            .or_default()
            .push(hash.to_string());
    }

    /// Build the partitions a rule needs over its candidate set.
    ///
    /// `allow_local_fs` gates the hardlink partition: without filesystem
    /// access the partition is simply absent and every lookup returns 0.
    #[must_use]
    pub fn build<'a>(
        group_ids: &HashSet<String>,
        candidates: impl Iterator<Item = &'a TorrentView> + Clone,
        allow_local_fs: bool,
    ) -> Self {
        let mut index = Self::default();
        for group_id in group_ids {
            match group_id.as_str() {
                GROUP_CROSS_SEED => {
                    for view in candidates.clone() {
                        let bucket = normalize_content_path(&view.content_path);
                        if !bucket.is_empty() {
                            index.insert_member(group_id, &bucket, &view.hash);
                        }
                    }
                }
                GROUP_RELEASE => {
                    for view in candidates.clone() {
                        let bucket = release_item(&view.name);
                        if !bucket.is_empty() {
                            index.insert_member(group_id, &bucket, &view.hash);
                        }
                    }
                }
                GROUP_HARDLINK => {
                    if !allow_local_fs {
                        continue;
                    }
                    for view in candidates.clone() {
                        if let Some(bucket) = hardlink_signature(&view.content_path) {
                            index.insert_member(group_id, &bucket, &view.hash);
                        }
                    }
                }
                _ => {}
            }
        }
        index
    }
}

/// Collect every group id referenced by the given condition trees plus a
/// delete action's explicit group.
#[must_use]
pub fn group_ids_referenced<'a>(
    trees: impl Iterator<Item = &'a RuleCondition>,
    extra: Option<&str>,
) -> HashSet<String> {
    let mut ids = HashSet::new();
    for tree in trees {
        collect_group_ids(tree, &mut ids);
    }
    if let Some(extra) = extra {
        ids.insert(extra.to_string());
    }
    ids
}

fn collect_group_ids(tree: &RuleCondition, ids: &mut HashSet<String>) {
    match tree {
        RuleCondition::Group { children, .. } => {
            for child in children {
                collect_group_ids(child, ids);
            }
        }
        RuleCondition::Leaf {
            field, group_id, ..
        } => {
            if field.is_grouped() {
                if let Some(group_id) = group_id {
                    ids.insert(group_id.clone());
                }
            }
        }
    }
}

fn normalize_content_path(path: &str) -> String {
    path.trim_end_matches('/').to_lowercase()
}

/// Reduce a torrent name to a release stem: lowercase, separators
/// unified, trailing edition/quality noise kept (two names differing only
/// in separators and case share a bucket).
fn release_item(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '.' } else { c })
        .collect::<String>()
        .split('.')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(unix)]
fn hardlink_signature(content_path: &str) -> Option<String> {
    use std::os::unix::fs::MetadataExt;

    if content_path.is_empty() {
        return None;
    }
    let metadata = std::fs::metadata(content_path).ok()?;
    Some(format!("{}:{}", metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn hardlink_signature(_content_path: &str) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_test_support::TorrentFixture;

    fn view(hash: &str, name: &str, content_path: &str) -> TorrentView {
        TorrentFixture::new(hash)
            .name(name)
            .paths("", content_path)
            .build()
    }

    #[test]
    fn cross_seed_partition_buckets_by_content_path() {
        let views = vec![
            view("aa", "Release-A", "/data/linux-iso"),
            view("bb", "Release-A-crossseed", "/data/linux-iso/"),
            view("cc", "Other", "/data/other"),
        ];
        let ids = HashSet::from([GROUP_CROSS_SEED.to_string()]);
        let index = GroupIndex::build(&ids, views.iter(), false);

        assert_eq!(index.group_size(GROUP_CROSS_SEED, "aa"), 2);
        assert_eq!(index.group_size(GROUP_CROSS_SEED, "bb"), 2);
        assert_eq!(index.group_size(GROUP_CROSS_SEED, "cc"), 1);
        let members = index.group_members(GROUP_CROSS_SEED, "aa");
        assert!(members.contains(&"bb".to_string()));
    }

    #[test]
    fn release_partition_ignores_separator_noise() {
        let views = vec![
            view("aa", "Some Release 2024", "/x"),
            view("bb", "some.release.2024", "/y"),
        ];
        let ids = HashSet::from([GROUP_RELEASE.to_string()]);
        let index = GroupIndex::build(&ids, views.iter(), false);
        assert_eq!(index.group_size(GROUP_RELEASE, "aa"), 2);
    }

    #[test]
    fn hardlink_partition_requires_local_fs() {
        let views = vec![view("aa", "x", "/definitely/missing/path")];
        let ids = HashSet::from([GROUP_HARDLINK.to_string()]);
        let index = GroupIndex::build(&ids, views.iter(), false);
        assert_eq!(index.group_size(GROUP_HARDLINK, "aa"), 0);
    }

    #[test]
    fn referenced_ids_are_collected_recursively() {
        let tree: RuleCondition = serde_json::from_value(serde_json::json!({
            "combinator": "and",
            "children": [
                { "field": "group_size", "op": ">=", "value": 2, "group_id": "cross_seed.content_path" },
                { "field": "ratio", "op": ">=", "value": 1.0 }
            ]
        }))
        .expect("tree");
        let ids = group_ids_referenced(std::iter::once(&tree), Some("hardlink.signature"));
        assert!(ids.contains("cross_seed.content_path"));
        assert!(ids.contains("hardlink.signature"));
        assert_eq!(ids.len(), 2);
    }
}
