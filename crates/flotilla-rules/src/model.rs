//! Rule and action-subtree models.

use chrono::{DateTime, Utc};
use flotilla_data::{NewRuleRow, RuleRow};
use serde::{Deserialize, Serialize};

use crate::condition::RuleCondition;
use crate::error::{RuleError, RuleResult};

/// Which torrents a rule may touch, keyed by tracker domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerScope {
    /// Every tracker.
    All,
    /// Only the listed registrable domains.
    Domains(Vec<String>),
}

impl TrackerScope {
    /// Parse the persisted form: `*` or a comma-joined domain list.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "*" || trimmed.is_empty() {
            return Self::All;
        }
        Self::Domains(
            trimmed
                .split(',')
                .map(str::trim)
                .filter(|domain| !domain.is_empty())
                .map(str::to_ascii_lowercase)
                .collect(),
        )
    }

    /// The persisted form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::All => "*".to_string(),
            Self::Domains(domains) => domains.join(","),
        }
    }

    /// Whether a torrent with this tracker domain is in scope.
    #[must_use]
    pub fn matches(&self, domain: &str) -> bool {
        match self {
            Self::All => true,
            Self::Domains(domains) => domains.iter().any(|d| d == domain),
        }
    }
}

/// How a delete action disposes of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeleteMode {
    /// Remove the torrent, keep the payload on disk.
    KeepFiles,
    /// Remove the torrent and its payload.
    WithFiles,
    /// Remove payload unless another torrent in the same content-path
    /// group still references it.
    WithFilesPreserveCrossSeeds,
    /// Remove the whole content-path group, payload included.
    WithFilesIncludeCrossSeeds,
}

/// How a tag action combines with existing tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TagMode {
    /// Add the listed tags.
    #[default]
    Add,
    /// Replace the full tag set.
    Set,
    /// Remove the listed tags.
    Remove,
}

/// Speed-limit action subtree. Rates are KiB/s on the wire and converted
/// to bytes per second at dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpeedLimitsAction {
    /// Condition gating the action; `None` matches every candidate.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Upload limit in KiB/s; 0 clears the limit.
    #[serde(default)]
    pub upload_kib: Option<i64>,
    /// Download limit in KiB/s; 0 clears the limit.
    #[serde(default)]
    pub download_kib: Option<i64>,
}

/// Share-limit action subtree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShareLimitsAction {
    /// Condition gating the action.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Ratio limit; -2 keeps the global limit, -1 removes it.
    #[serde(default = "default_unset_limit_f")]
    pub ratio_limit: f64,
    /// Seeding time limit in minutes; -2 global, -1 unlimited.
    #[serde(default = "default_unset_limit_i")]
    pub seeding_time_limit: i64,
    /// Inactive seeding time limit in minutes; -2 global, -1 unlimited.
    #[serde(default = "default_unset_limit_i")]
    pub inactive_seeding_time_limit: i64,
}

const fn default_unset_limit_i() -> i64 {
    -2
}

const fn default_unset_limit_f() -> f64 {
    -2.0
}

/// Pause action subtree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PauseAction {
    /// Condition gating the action.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
}

/// Resume action subtree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResumeAction {
    /// Condition gating the action.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
}

/// Delete action subtree. Must be the only action in its rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteAction {
    /// Condition gating the action.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Data disposition.
    pub mode: DeleteMode,
    /// Also delete torrents hard-linking the same payload.
    #[serde(default)]
    pub include_hardlinks: bool,
    /// Grouping key used with keep-files mode to delete whole groups.
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Tag action subtree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TagAction {
    /// Condition gating the action.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Tags to add, set, or remove.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Combination mode.
    #[serde(default)]
    pub mode: TagMode,
    /// Use the torrent's tracker domain as the tag.
    #[serde(default)]
    pub use_tracker_as_tag: bool,
    /// Delete the tags from the client when no longer matched.
    #[serde(default)]
    pub delete_on_remove: bool,
}

/// Category action subtree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CategoryAction {
    /// Condition gating the action.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Category to assign.
    #[serde(default)]
    pub name: String,
}

/// Move action subtree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MoveAction {
    /// Condition gating the action.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// New save path.
    #[serde(default)]
    pub save_path: String,
}

/// External-program action subtree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExternalProgramAction {
    /// Condition gating the action.
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    /// Registered program to invoke.
    #[serde(default)]
    pub program_id: i64,
}

/// The action subtrees carried by one rule.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionConditions {
    /// Speed-limit action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_limits: Option<SpeedLimitsAction>,
    /// Share-limit action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_limits: Option<ShareLimitsAction>,
    /// Pause action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause: Option<PauseAction>,
    /// Resume action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeAction>,
    /// Delete action (standalone).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<DeleteAction>,
    /// Tag action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagAction>,
    /// Category action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryAction>,
    /// Move action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_torrent: Option<MoveAction>,
    /// External-program action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_program: Option<ExternalProgramAction>,
}

impl ActionConditions {
    /// Count of populated action subtrees.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        let mut count = 0;
        if self.speed_limits.is_some() {
            count += 1;
        }
        if self.share_limits.is_some() {
            count += 1;
        }
        if self.pause.is_some() {
            count += 1;
        }
        if self.resume.is_some() {
            count += 1;
        }
        if self.delete.is_some() {
            count += 1;
        }
        if self.tag.is_some() {
            count += 1;
        }
        if self.category.is_some() {
            count += 1;
        }
        if self.move_torrent.is_some() {
            count += 1;
        }
        if self.external_program.is_some() {
            count += 1;
        }
        count
    }

    /// Every condition tree across the subtrees.
    #[must_use]
    pub fn condition_trees(&self) -> Vec<&RuleCondition> {
        let mut trees = Vec::new();
        let conditions = [
            self.speed_limits.as_ref().and_then(|a| a.condition.as_ref()),
            self.share_limits.as_ref().and_then(|a| a.condition.as_ref()),
            self.pause.as_ref().and_then(|a| a.condition.as_ref()),
            self.resume.as_ref().and_then(|a| a.condition.as_ref()),
            self.delete.as_ref().and_then(|a| a.condition.as_ref()),
            self.tag.as_ref().and_then(|a| a.condition.as_ref()),
            self.category.as_ref().and_then(|a| a.condition.as_ref()),
            self.move_torrent.as_ref().and_then(|a| a.condition.as_ref()),
            self.external_program
                .as_ref()
                .and_then(|a| a.condition.as_ref()),
        ];
        for condition in conditions.into_iter().flatten() {
            trees.push(condition);
        }
        trees
    }
}

/// Incoming rule payload, validated before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulePayload {
    /// Operator-facing name.
    pub name: String,
    /// Whether the scheduler evaluates the rule.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log planned actions without dispatching them.
    #[serde(default)]
    pub dry_run: bool,
    /// Evaluation order within the instance.
    #[serde(default)]
    pub sort_order: i64,
    /// `*` or a comma-joined domain list.
    #[serde(default = "default_scope")]
    pub tracker_scope: String,
    /// Seconds between scheduled evaluations; defaults to 15 minutes.
    #[serde(default)]
    pub interval_seconds: Option<i64>,
    /// Action subtrees.
    pub conditions: ActionConditions,
    /// `qbittorrent` (default) or `path:<absolute>`.
    #[serde(default)]
    pub free_space_source: Option<String>,
}

const fn default_true() -> bool {
    true
}

fn default_scope() -> String {
    "*".to_string()
}

/// A validated, persisted rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Rule id.
    pub id: i64,
    /// Owning instance.
    pub instance_id: i64,
    /// Operator-facing name.
    pub name: String,
    /// Whether the scheduler evaluates the rule.
    pub enabled: bool,
    /// Log planned actions without dispatching them.
    pub dry_run: bool,
    /// Evaluation order within the instance.
    pub sort_order: i64,
    /// Tracker scope.
    pub tracker_scope: TrackerScope,
    /// Seconds between scheduled evaluations.
    pub interval_seconds: i64,
    /// Action subtrees.
    pub conditions: ActionConditions,
    /// Free-space source override.
    pub free_space_source: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Decode a persisted row into a typed rule.
    ///
    /// # Errors
    ///
    /// Returns an error when the conditions column does not decode.
    pub fn from_row(row: RuleRow) -> RuleResult<Self> {
        let conditions: ActionConditions =
            serde_json::from_value(row.conditions).map_err(|err| {
                RuleError::invalid(format!("persisted conditions do not decode: {err}"))
            })?;
        Ok(Self {
            id: row.id,
            instance_id: row.instance_id,
            name: row.name,
            enabled: row.enabled,
            dry_run: row.dry_run,
            sort_order: row.sort_order,
            tracker_scope: TrackerScope::parse(&row.tracker_scope),
            interval_seconds: row.interval_seconds,
            conditions,
            free_space_source: row.free_space_source,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// Encode a validated payload into a row for persistence.
    ///
    /// # Errors
    ///
    /// Returns an error when the conditions fail to serialize.
    pub fn row_from_payload(
        instance_id: i64,
        payload: &RulePayload,
        default_interval: i64,
    ) -> RuleResult<NewRuleRow> {
        let conditions = serde_json::to_value(&payload.conditions)
            .map_err(|err| RuleError::invalid(format!("conditions do not serialize: {err}")))?;
        Ok(NewRuleRow {
            instance_id,
            name: payload.name.clone(),
            enabled: payload.enabled,
            dry_run: payload.dry_run,
            sort_order: payload.sort_order,
            tracker_scope: TrackerScope::parse(&payload.tracker_scope).encode(),
            interval_seconds: payload.interval_seconds.unwrap_or(default_interval),
            conditions,
            free_space_source: payload.free_space_source.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_scope_round_trips() {
        assert_eq!(TrackerScope::parse("*"), TrackerScope::All);
        let scope = TrackerScope::parse("Example.org, other.net");
        assert!(scope.matches("example.org"));
        assert!(scope.matches("other.net"));
        assert!(!scope.matches("elsewhere.org"));
        assert_eq!(scope.encode(), "example.org,other.net");
    }

    #[test]
    fn action_count_counts_populated_subtrees() {
        let mut conditions = ActionConditions::default();
        assert_eq!(conditions.action_count(), 0);
        conditions.pause = Some(PauseAction::default());
        conditions.tag = Some(TagAction::default());
        assert_eq!(conditions.action_count(), 2);
    }

    #[test]
    fn delete_mode_uses_kebab_case_wire_names() {
        let mode: DeleteMode = serde_json::from_str("\"with-files-preserve-cross-seeds\"")
            .expect("decode");
        assert_eq!(mode, DeleteMode::WithFilesPreserveCrossSeeds);
        assert_eq!(
            serde_json::to_string(&DeleteMode::KeepFiles).expect("encode"),
            "\"keep-files\""
        );
    }
}
