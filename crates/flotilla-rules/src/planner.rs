//! Per-rule evaluation into planned actions, and cross-rule
//! reconciliation.

use std::collections::{BTreeMap, HashSet};

use flotilla_core::TorrentView;
use flotilla_sync::Snapshot;
use serde::Serialize;

use crate::condition::{CompiledCondition, EvalContext};
use crate::error::RuleResult;
use crate::grouping::{GROUP_CROSS_SEED, GROUP_HARDLINK, GroupIndex, group_ids_referenced};
use crate::model::{DeleteMode, Rule, TagMode, TrackerScope};

/// One side-effecting directive planned for a torrent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Apply share limits.
    SetShareLimit {
        /// Ratio limit; -2 global, -1 unlimited.
        ratio_limit: f64,
        /// Seeding time limit in minutes.
        seeding_time_limit: i64,
        /// Inactive seeding time limit in minutes.
        inactive_seeding_time_limit: i64,
    },
    /// Apply speed limits in bytes per second.
    SetSpeedLimits {
        /// Upload limit; `None` leaves the direction untouched.
        upload_bps: Option<i64>,
        /// Download limit; `None` leaves the direction untouched.
        download_bps: Option<i64>,
    },
    /// Stop the torrent.
    Pause,
    /// Start the torrent.
    Resume,
    /// Add tags.
    AddTags {
        /// Tags to add.
        tags: Vec<String>,
    },
    /// Replace the tag set.
    SetTags {
        /// Full replacement tag set.
        tags: Vec<String>,
    },
    /// Remove tags.
    RemoveTags {
        /// Tags to remove.
        tags: Vec<String>,
    },
    /// Assign a category.
    SetCategory {
        /// Category name.
        name: String,
    },
    /// Move storage.
    Move {
        /// New save path.
        save_path: String,
    },
    /// Delete the torrent.
    Delete {
        /// Data disposition after reconciliation.
        mode: DeleteMode,
    },
    /// Invoke a registered external program.
    RunProgram {
        /// Program id.
        program_id: i64,
    },
}

impl PlannedAction {
    /// Short label used in activity records.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SetShareLimit { .. } => "set_share_limit",
            Self::SetSpeedLimits { .. } => "set_speed_limits",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::AddTags { .. } => "add_tags",
            Self::SetTags { .. } => "set_tags",
            Self::RemoveTags { .. } => "remove_tags",
            Self::SetCategory { .. } => "set_category",
            Self::Move { .. } => "move",
            Self::Delete { .. } => "delete",
            Self::RunProgram { .. } => "run_program",
        }
    }

    /// Stable JSON fingerprint for batching and activity detail.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.label().to_string())
    }
}

/// One planned action bound to a torrent.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedItem {
    /// Canonical torrent hash.
    pub hash: String,
    /// Torrent name at planning time.
    pub name: String,
    /// The planned directive.
    pub action: PlannedAction,
}

/// Everything one rule planned in one tick.
#[derive(Debug, Clone, Serialize)]
pub struct RulePlan {
    /// Originating rule id (0 for previews of unsaved rules).
    pub rule_id: i64,
    /// Rule name.
    pub rule_name: String,
    /// Whether the rule is dry-run.
    pub dry_run: bool,
    /// Planned items in candidate order (stable by canonical hash).
    pub items: Vec<PlannedItem>,
}

/// Evaluate one rule against a snapshot.
///
/// Candidates are filtered by tracker scope via the snapshot's tracker
/// index, grouping partitions are computed once, every condition tree is
/// compiled once, and items emit in candidate-iteration order.
///
/// # Errors
///
/// Returns a validation error when a persisted condition fails to
/// compile.
#[allow(clippy::too_many_lines)]
pub fn plan_rule(
    rule: &Rule,
    snapshot: &Snapshot,
    free_space: Option<i64>,
    now: i64,
    allow_local_fs: bool,
) -> RuleResult<RulePlan> {
    // Candidate set, ordered by canonical hash for deterministic output.
    let candidates: BTreeMap<&String, &TorrentView> = match &rule.tracker_scope {
        TrackerScope::All => snapshot.torrents.iter().collect(),
        TrackerScope::Domains(domains) => {
            let mut selected = BTreeMap::new();
            for domain in domains {
                if let Some(members) = snapshot.trackers_index.get(domain) {
                    for hash in members {
                        if let Some((key, view)) = snapshot.torrents.get_key_value(hash) {
                            selected.insert(key, view);
                        }
                    }
                }
            }
            selected
        }
    };

    let conditions = &rule.conditions;
    let mut group_ids = group_ids_referenced(conditions.condition_trees().into_iter(), None);
    if let Some(delete) = &conditions.delete {
        if let Some(group_id) = &delete.group_id {
            group_ids.insert(group_id.clone());
        }
        if delete.include_hardlinks {
            group_ids.insert(GROUP_HARDLINK.to_string());
        }
        if matches!(
            delete.mode,
            DeleteMode::WithFilesPreserveCrossSeeds | DeleteMode::WithFilesIncludeCrossSeeds
        ) {
            group_ids.insert(GROUP_CROSS_SEED.to_string());
        }
    }
    let groups = GroupIndex::build(
        &group_ids,
        candidates.values().copied(),
        allow_local_fs,
    );
    let ctx = EvalContext {
        now,
        free_space,
        groups: &groups,
    };

    struct Gate {
        compiled: Option<CompiledCondition>,
    }
    impl Gate {
        fn matches(&self, view: &TorrentView, ctx: &EvalContext<'_>) -> bool {
            self.compiled
                .as_ref()
                .is_none_or(|condition| condition.matches(view, ctx))
        }
    }
    let gate = |condition: Option<&crate::condition::RuleCondition>| -> RuleResult<Gate> {
        Ok(Gate {
            compiled: condition.map(CompiledCondition::compile).transpose()?,
        })
    };

    let speed_gate = gate(conditions.speed_limits.as_ref().and_then(|a| a.condition.as_ref()))?;
    let share_gate = gate(conditions.share_limits.as_ref().and_then(|a| a.condition.as_ref()))?;
    let pause_gate = gate(conditions.pause.as_ref().and_then(|a| a.condition.as_ref()))?;
    let resume_gate = gate(conditions.resume.as_ref().and_then(|a| a.condition.as_ref()))?;
    let delete_gate = gate(conditions.delete.as_ref().and_then(|a| a.condition.as_ref()))?;
    let tag_gate = gate(conditions.tag.as_ref().and_then(|a| a.condition.as_ref()))?;
    let category_gate = gate(conditions.category.as_ref().and_then(|a| a.condition.as_ref()))?;
    let move_gate = gate(conditions.move_torrent.as_ref().and_then(|a| a.condition.as_ref()))?;
    let program_gate = gate(
        conditions
            .external_program
            .as_ref()
            .and_then(|a| a.condition.as_ref()),
    )?;

    let mut items = Vec::new();
    let mut delete_matched: Vec<String> = Vec::new();

    for (hash, view) in &candidates {
        let view: &TorrentView = view;
        if let Some(action) = &conditions.speed_limits {
            if speed_gate.matches(view, &ctx) {
                items.push(PlannedItem {
                    hash: (*hash).clone(),
                    name: view.name.clone(),
                    action: PlannedAction::SetSpeedLimits {
                        upload_bps: action.upload_kib.map(|kib| kib.saturating_mul(1024)),
                        download_bps: action.download_kib.map(|kib| kib.saturating_mul(1024)),
                    },
                });
            }
        }
        if let Some(action) = &conditions.share_limits {
            if share_gate.matches(view, &ctx) {
                items.push(PlannedItem {
                    hash: (*hash).clone(),
                    name: view.name.clone(),
                    action: PlannedAction::SetShareLimit {
                        ratio_limit: action.ratio_limit,
                        seeding_time_limit: action.seeding_time_limit,
                        inactive_seeding_time_limit: action.inactive_seeding_time_limit,
                    },
                });
            }
        }
        if conditions.pause.is_some() && !view.state.is_stopped() && pause_gate.matches(view, &ctx)
        {
            items.push(PlannedItem {
                hash: (*hash).clone(),
                name: view.name.clone(),
                action: PlannedAction::Pause,
            });
        }
        if conditions.resume.is_some() && view.state.is_stopped() && resume_gate.matches(view, &ctx)
        {
            items.push(PlannedItem {
                hash: (*hash).clone(),
                name: view.name.clone(),
                action: PlannedAction::Resume,
            });
        }
        if let Some(action) = &conditions.tag {
            let tags: Vec<String> = if action.use_tracker_as_tag {
                if view.tracker_domain.is_empty() {
                    Vec::new()
                } else {
                    vec![view.tracker_domain.clone()]
                }
            } else {
                action.tags.clone()
            };
            if !tags.is_empty() {
                if tag_gate.matches(view, &ctx) {
                    let planned = match action.mode {
                        TagMode::Add => PlannedAction::AddTags { tags },
                        TagMode::Set => PlannedAction::SetTags { tags },
                        TagMode::Remove => PlannedAction::RemoveTags { tags },
                    };
                    items.push(PlannedItem {
                        hash: (*hash).clone(),
                        name: view.name.clone(),
                        action: planned,
                    });
                } else if action.delete_on_remove && action.mode != TagMode::Remove {
                    // The torrent stopped matching; strip the rule's tags
                    // from it. Removing the last tag keeps the torrent.
                    let stale: Vec<String> = tags
                        .iter()
                        .filter(|tag| view.tags.contains(*tag))
                        .cloned()
                        .collect();
                    if !stale.is_empty() {
                        items.push(PlannedItem {
                            hash: (*hash).clone(),
                            name: view.name.clone(),
                            action: PlannedAction::RemoveTags { tags: stale },
                        });
                    }
                }
            }
        }
        if let Some(action) = &conditions.category {
            if view.category != action.name && category_gate.matches(view, &ctx) {
                items.push(PlannedItem {
                    hash: (*hash).clone(),
                    name: view.name.clone(),
                    action: PlannedAction::SetCategory {
                        name: action.name.clone(),
                    },
                });
            }
        }
        if let Some(action) = &conditions.move_torrent {
            if view.save_path != action.save_path && move_gate.matches(view, &ctx) {
                items.push(PlannedItem {
                    hash: (*hash).clone(),
                    name: view.name.clone(),
                    action: PlannedAction::Move {
                        save_path: action.save_path.clone(),
                    },
                });
            }
        }
        if let Some(action) = &conditions.external_program {
            if program_gate.matches(view, &ctx) {
                items.push(PlannedItem {
                    hash: (*hash).clone(),
                    name: view.name.clone(),
                    action: PlannedAction::RunProgram {
                        program_id: action.program_id,
                    },
                });
            }
        }
        if conditions.delete.is_some() && delete_gate.matches(view, &ctx) {
            delete_matched.push((*hash).clone());
        }
    }

    if let Some(action) = &conditions.delete {
        let expanded = expand_deletes(action, &delete_matched, &groups);
        for (hash, mode) in expanded {
            if let Some(view) = snapshot.torrents.get(&hash) {
                items.push(PlannedItem {
                    hash,
                    name: view.name.clone(),
                    action: PlannedAction::Delete { mode },
                });
            }
        }
    }

    Ok(RulePlan {
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        dry_run: rule.dry_run,
        items,
    })
}

/// Expand matched deletes across groups and resolve per-hash modes.
fn expand_deletes(
    action: &crate::model::DeleteAction,
    matched: &[String],
    groups: &GroupIndex,
) -> Vec<(String, DeleteMode)> {
    let mut selected: Vec<String> = matched.to_vec();

    // keep-files group deletes and include-cross-seeds pull in the whole
    // bucket; hardlink expansion pulls in torrents sharing inodes.
    let expansion_group = match (&action.group_id, action.mode) {
        (Some(group_id), DeleteMode::KeepFiles) => Some(group_id.as_str()),
        (_, DeleteMode::WithFilesIncludeCrossSeeds) => Some(GROUP_CROSS_SEED),
        _ => None,
    };
    if let Some(group_id) = expansion_group {
        let mut expanded: HashSet<String> = selected.iter().cloned().collect();
        for hash in matched {
            for member in groups.group_members(group_id, hash) {
                expanded.insert(member);
            }
        }
        selected = expanded.into_iter().collect();
        selected.sort_unstable();
    }
    if action.include_hardlinks {
        let mut expanded: HashSet<String> = selected.iter().cloned().collect();
        for hash in &selected.clone() {
            for member in groups.group_members(GROUP_HARDLINK, hash) {
                expanded.insert(member);
            }
        }
        selected = expanded.into_iter().collect();
        selected.sort_unstable();
    }

    let selected_set: HashSet<&String> = selected.iter().collect();
    selected
        .iter()
        .map(|hash| {
            let mode = match action.mode {
                DeleteMode::WithFilesPreserveCrossSeeds => {
                    // If any cross-seed sibling survives this delete, the
                    // payload must stay on disk.
                    let siblings = groups.group_members(GROUP_CROSS_SEED, hash);
                    let survivor = siblings
                        .iter()
                        .any(|sibling| !selected_set.contains(sibling));
                    if survivor {
                        DeleteMode::KeepFiles
                    } else {
                        DeleteMode::WithFiles
                    }
                }
                DeleteMode::WithFilesIncludeCrossSeeds => DeleteMode::WithFiles,
                mode => mode,
            };
            (hash.clone(), mode)
        })
        .collect()
}

/// Cross-rule reconciliation: deletes are deduplicated per canonical hash
/// (earliest plan wins) and later non-destructive actions on deleted
/// torrents are dropped.
pub fn reconcile(plans: &mut [RulePlan]) {
    let mut deleted: HashSet<String> = HashSet::new();
    for plan in plans.iter_mut() {
        plan.items.retain(|item| {
            if deleted.contains(&item.hash) {
                return false;
            }
            if matches!(item.action, PlannedAction::Delete { .. }) {
                deleted.insert(item.hash.clone());
            }
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ActionConditions, DeleteAction, PauseAction, ShareLimitsAction, TagAction,
    };
    use chrono::Utc;
    use flotilla_qbit::models::MainData;
    use std::time::Instant;

    fn snapshot(json: serde_json::Value) -> Snapshot {
        let data: MainData = serde_json::from_value(json).expect("maindata");
        Snapshot::default().apply_maindata(&data, Instant::now())
    }

    fn rule(conditions: ActionConditions) -> Rule {
        Rule {
            id: 1,
            instance_id: 1,
            name: "test".to_string(),
            enabled: true,
            dry_run: false,
            sort_order: 0,
            tracker_scope: TrackerScope::All,
            interval_seconds: 900,
            conditions,
            free_space_source: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn share_limit_rule_plans_only_matching_candidates() {
        let snapshot = snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "h1": { "name": "one", "state": "uploading", "tags": "freeleech", "ratio": 1.2 },
                "h2": { "name": "two", "state": "uploading", "tags": "", "ratio": 5.0 }
            }
        }));
        let conditions = ActionConditions {
            share_limits: Some(ShareLimitsAction {
                condition: Some(
                    serde_json::from_value(serde_json::json!({
                        "combinator": "and",
                        "children": [
                            { "field": "tags", "op": "contains", "value": "freeleech" },
                            { "field": "ratio", "op": ">=", "value": 1.0 }
                        ]
                    }))
                    .expect("tree"),
                ),
                ratio_limit: -1.0,
                seeding_time_limit: -1,
                inactive_seeding_time_limit: -2,
            }),
            ..ActionConditions::default()
        };

        let plan = plan_rule(&rule(conditions), &snapshot, None, 0, false).expect("plan");
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].hash, "h1");
        assert!(matches!(
            plan.items[0].action,
            PlannedAction::SetShareLimit { .. }
        ));
    }

    #[test]
    fn tracker_scope_restricts_candidates() {
        let snapshot = snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "h1": { "name": "one", "state": "stalledUP", "tracker": "https://a.example.org/x" },
                "h2": { "name": "two", "state": "stalledUP", "tracker": "https://other.net/x" }
            }
        }));
        let conditions = ActionConditions {
            pause: Some(PauseAction::default()),
            ..ActionConditions::default()
        };
        let mut scoped = rule(conditions);
        scoped.tracker_scope = TrackerScope::Domains(vec!["example.org".to_string()]);

        let plan = plan_rule(&scoped, &snapshot, None, 0, false).expect("plan");
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].hash, "h1");
    }

    #[test]
    fn pause_skips_already_stopped_torrents() {
        let snapshot = snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "h1": { "name": "one", "state": "stoppedUP" },
                "h2": { "name": "two", "state": "uploading" }
            }
        }));
        let conditions = ActionConditions {
            pause: Some(PauseAction::default()),
            ..ActionConditions::default()
        };
        let plan = plan_rule(&rule(conditions), &snapshot, None, 0, false).expect("plan");
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].hash, "h2");
    }

    #[test]
    fn items_emit_in_hash_order() {
        let snapshot = snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "zz": { "name": "last", "state": "uploading" },
                "aa": { "name": "first", "state": "uploading" },
                "mm": { "name": "middle", "state": "uploading" }
            }
        }));
        let conditions = ActionConditions {
            pause: Some(PauseAction::default()),
            ..ActionConditions::default()
        };
        let plan = plan_rule(&rule(conditions), &snapshot, None, 0, false).expect("plan");
        let hashes: Vec<&str> = plan.items.iter().map(|i| i.hash.as_str()).collect();
        assert_eq!(hashes, vec!["aa", "mm", "zz"]);
    }

    #[test]
    fn tag_delete_on_remove_strips_stale_tags() {
        let snapshot = snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "h1": { "name": "still", "state": "uploading", "ratio": 0.5, "tags": "lowratio" },
                "h2": { "name": "grown", "state": "uploading", "ratio": 2.0, "tags": "lowratio" }
            }
        }));
        let conditions = ActionConditions {
            tag: Some(TagAction {
                condition: Some(
                    serde_json::from_value(serde_json::json!({
                        "field": "ratio", "op": "<", "value": 1.0
                    }))
                    .expect("tree"),
                ),
                tags: vec!["lowratio".to_string()],
                mode: TagMode::Add,
                use_tracker_as_tag: false,
                delete_on_remove: true,
            }),
            ..ActionConditions::default()
        };
        let plan = plan_rule(&rule(conditions), &snapshot, None, 0, false).expect("plan");
        assert_eq!(plan.items.len(), 2);
        let by_hash: std::collections::HashMap<&str, &PlannedAction> = plan
            .items
            .iter()
            .map(|item| (item.hash.as_str(), &item.action))
            .collect();
        assert!(matches!(by_hash["h1"], PlannedAction::AddTags { .. }));
        assert!(matches!(by_hash["h2"], PlannedAction::RemoveTags { .. }));
    }

    #[test]
    fn preserve_cross_seeds_downgrades_to_keep_files() {
        let snapshot = snapshot(serde_json::json!({
            "rid": 1,
            "full_update": true,
            "torrents": {
                "h1": { "name": "a", "state": "uploading", "ratio": 9.0,
                        "content_path": "/data/shared" },
                "h2": { "name": "b", "state": "uploading", "ratio": 0.1,
                        "content_path": "/data/shared" },
                "h3": { "name": "c", "state": "uploading", "ratio": 9.0,
                        "content_path": "/data/solo" }
            }
        }));
        let conditions = ActionConditions {
            delete: Some(DeleteAction {
                condition: Some(
                    serde_json::from_value(serde_json::json!({
                        "field": "ratio", "op": ">=", "value": 5.0
                    }))
                    .expect("tree"),
                ),
                mode: DeleteMode::WithFilesPreserveCrossSeeds,
                include_hardlinks: false,
                group_id: None,
            }),
            ..ActionConditions::default()
        };
        let plan = plan_rule(&rule(conditions), &snapshot, None, 0, false).expect("plan");
        let by_hash: std::collections::HashMap<&str, &PlannedAction> = plan
            .items
            .iter()
            .map(|item| (item.hash.as_str(), &item.action))
            .collect();
        // h1 shares its payload with the surviving h2, so files stay.
        assert_eq!(
            by_hash["h1"],
            &PlannedAction::Delete {
                mode: DeleteMode::KeepFiles
            }
        );
        // h3 is alone in its bucket, so files go.
        assert_eq!(
            by_hash["h3"],
            &PlannedAction::Delete {
                mode: DeleteMode::WithFiles
            }
        );
    }

    #[test]
    fn reconcile_dedups_deletes_by_rule_order() {
        let delete = |hash: &str| PlannedItem {
            hash: hash.to_string(),
            name: hash.to_string(),
            action: PlannedAction::Delete {
                mode: DeleteMode::WithFiles,
            },
        };
        let pause = |hash: &str| PlannedItem {
            hash: hash.to_string(),
            name: hash.to_string(),
            action: PlannedAction::Pause,
        };
        let mut plans = vec![
            RulePlan {
                rule_id: 1,
                rule_name: "first".to_string(),
                dry_run: false,
                items: vec![delete("h1")],
            },
            RulePlan {
                rule_id: 2,
                rule_name: "second".to_string(),
                dry_run: false,
                items: vec![delete("h1"), delete("h2"), pause("h1"), pause("h3")],
            },
        ];
        reconcile(&mut plans);
        assert_eq!(plans[0].items.len(), 1);
        let second: Vec<&str> = plans[1].items.iter().map(|i| i.hash.as_str()).collect();
        // h1 is already deleted by rule 1: both its delete and pause drop.
        assert_eq!(second, vec!["h2", "h3"]);
    }
}
