//! Eager rule validation; a payload that passes here can be evaluated
//! against any snapshot without panicking.

use flotilla_core::Instance;

use crate::condition::{CompiledCondition, Field, Operator, RuleCondition};
use crate::error::{RuleError, RuleResult};
use crate::model::{DeleteMode, RulePayload};

const MIN_INTERVAL_SECONDS: i64 = 60;

/// Validate a rule payload against its target instance.
///
/// Validation is all-or-nothing: the first failure is returned and
/// nothing is persisted.
///
/// # Errors
///
/// Returns [`RuleError::Invalid`] or [`RuleError::InvalidRegex`] naming
/// the offending field.
pub fn validate_payload(payload: &RulePayload, instance: &Instance) -> RuleResult<()> {
    if payload.name.trim().is_empty() {
        return Err(RuleError::invalid("name must not be empty"));
    }
    if payload.tracker_scope.trim().is_empty() {
        return Err(RuleError::invalid(
            "tracker scope must be \"*\" or a non-empty domain list",
        ));
    }
    if let Some(interval) = payload.interval_seconds {
        if interval < MIN_INTERVAL_SECONDS {
            return Err(RuleError::invalid(format!(
                "interval_seconds must be at least {MIN_INTERVAL_SECONDS}"
            )));
        }
    }

    let conditions = &payload.conditions;
    let action_count = conditions.action_count();
    if action_count == 0 {
        return Err(RuleError::invalid(
            "at least one action must be configured",
        ));
    }
    if conditions.delete.is_some() && action_count > 1 {
        return Err(RuleError::invalid(
            "a delete action cannot be combined with other actions",
        ));
    }

    if let Some(category) = &conditions.category {
        if category.name.trim().is_empty() {
            return Err(RuleError::invalid(
                "category action requires a category name",
            ));
        }
    }
    if let Some(move_torrent) = &conditions.move_torrent {
        if move_torrent.save_path.trim().is_empty() {
            return Err(RuleError::invalid("move action requires a save path"));
        }
    }
    if let Some(tag) = &conditions.tag {
        if tag.tags.is_empty() && !tag.use_tracker_as_tag {
            return Err(RuleError::invalid(
                "tag action requires tags or use_tracker_as_tag",
            ));
        }
        if tag.delete_on_remove && tag.use_tracker_as_tag {
            return Err(RuleError::invalid(
                "delete_on_remove requires explicit tags, not use_tracker_as_tag",
            ));
        }
    }
    if let Some(program) = &conditions.external_program {
        if program.program_id <= 0 {
            return Err(RuleError::invalid(
                "external program action requires a program id",
            ));
        }
    }

    // Compiling every tree validates operators, values, group ids, and
    // regexes in one pass.
    for tree in conditions.condition_trees() {
        CompiledCondition::compile(tree)?;
    }

    validate_local_fs_requirements(payload, instance)?;
    validate_delete(payload)?;
    validate_free_space_source(payload, instance)?;
    Ok(())
}

fn validate_local_fs_requirements(payload: &RulePayload, instance: &Instance) -> RuleResult<()> {
    if instance.has_local_filesystem_access {
        return Ok(());
    }
    for tree in payload.conditions.condition_trees() {
        if tree_references_local_fs(tree) {
            return Err(RuleError::invalid(
                "conditions referencing on-disk state require the instance's \
                 local filesystem access",
            ));
        }
    }
    if let Some(delete) = &payload.conditions.delete {
        if delete.include_hardlinks {
            return Err(RuleError::invalid(
                "include_hardlinks requires the instance's local filesystem access",
            ));
        }
    }
    Ok(())
}

fn tree_references_local_fs(tree: &RuleCondition) -> bool {
    match tree {
        RuleCondition::Group { children, .. } => children.iter().any(tree_references_local_fs),
        RuleCondition::Leaf {
            field, group_id, ..
        } => {
            field.needs_local_fs()
                || group_id
                    .as_deref()
                    .is_some_and(|id| id == crate::grouping::GROUP_HARDLINK)
        }
    }
}

fn validate_delete(payload: &RulePayload) -> RuleResult<()> {
    let Some(delete) = &payload.conditions.delete else {
        return Ok(());
    };
    if delete.group_id.is_some() && delete.mode != DeleteMode::KeepFiles {
        return Err(RuleError::invalid(
            "delete.group_id is only meaningful with keep-files mode",
        ));
    }
    if delete.mode == DeleteMode::KeepFiles {
        if let Some(condition) = &delete.condition {
            if tree_has_free_space_below(condition) {
                // keep-files never frees space, so the rule would match on
                // every tick forever.
                return Err(RuleError::invalid(
                    "a free_space condition cannot gate a keep-files delete: \
                     keep-files never frees space, so the rule would match \
                     indefinitely",
                ));
            }
        }
    }
    Ok(())
}

fn tree_has_free_space_below(tree: &RuleCondition) -> bool {
    match tree {
        RuleCondition::Group { children, .. } => children.iter().any(tree_has_free_space_below),
        RuleCondition::Leaf { field, op, .. } => {
            *field == Field::FreeSpace && matches!(op, Operator::Lt | Operator::Le)
        }
    }
}

fn validate_free_space_source(payload: &RulePayload, instance: &Instance) -> RuleResult<()> {
    let Some(source) = &payload.free_space_source else {
        return Ok(());
    };
    if source == "qbittorrent" {
        return Ok(());
    }
    let Some(path) = source.strip_prefix("path:") else {
        return Err(RuleError::invalid(format!(
            "free_space_source must be \"qbittorrent\" or \"path:<absolute>\", got {source:?}"
        )));
    };
    if cfg!(windows) {
        return Err(RuleError::invalid(
            "path free-space sources are not supported on Windows",
        ));
    }
    if !instance.has_local_filesystem_access {
        return Err(RuleError::invalid(
            "a path free-space source requires the instance's local filesystem access",
        ));
    }
    let path = std::path::Path::new(path);
    if !path.is_absolute() {
        return Err(RuleError::invalid(
            "free_space_source path must be absolute",
        ));
    }
    if path
        .components()
        .any(|component| matches!(component, std::path::Component::ParentDir))
    {
        return Err(RuleError::invalid(
            "free_space_source path must not contain \"..\"",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ActionConditions, CategoryAction, DeleteAction, PauseAction, TagAction,
    };
    use chrono::Utc;

    fn instance(local_fs: bool) -> Instance {
        Instance {
            id: 1,
            name: "box".to_string(),
            base_url: "http://localhost:8080".to_string(),
            username: "admin".to_string(),
            encrypted_password: "ct".to_string(),
            basic_username: None,
            encrypted_basic_password: None,
            tls_skip_verify: false,
            has_local_filesystem_access: local_fs,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payload(conditions: ActionConditions) -> RulePayload {
        RulePayload {
            name: "rule".to_string(),
            enabled: true,
            dry_run: false,
            sort_order: 0,
            tracker_scope: "*".to_string(),
            interval_seconds: None,
            conditions,
            free_space_source: None,
        }
    }

    fn pause_only() -> ActionConditions {
        ActionConditions {
            pause: Some(PauseAction::default()),
            ..ActionConditions::default()
        }
    }

    #[test]
    fn minimal_pause_rule_validates() {
        validate_payload(&payload(pause_only()), &instance(false)).expect("valid");
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut p = payload(pause_only());
        p.name = "  ".to_string();
        assert!(validate_payload(&p, &instance(false)).is_err());
    }

    #[test]
    fn empty_tracker_scope_is_rejected() {
        let mut p = payload(pause_only());
        p.tracker_scope = String::new();
        assert!(validate_payload(&p, &instance(false)).is_err());
    }

    #[test]
    fn actionless_rules_are_rejected() {
        let p = payload(ActionConditions::default());
        let err = validate_payload(&p, &instance(false)).expect_err("reject");
        assert!(err.to_string().contains("at least one action"));
    }

    #[test]
    fn sub_minute_intervals_are_rejected() {
        let mut p = payload(pause_only());
        p.interval_seconds = Some(30);
        assert!(validate_payload(&p, &instance(false)).is_err());
    }

    #[test]
    fn delete_must_be_standalone() {
        let conditions = ActionConditions {
            delete: Some(DeleteAction {
                condition: None,
                mode: DeleteMode::WithFiles,
                include_hardlinks: false,
                group_id: None,
            }),
            pause: Some(PauseAction::default()),
            ..ActionConditions::default()
        };
        let err = validate_payload(&payload(conditions), &instance(false)).expect_err("reject");
        assert!(err.to_string().contains("cannot be combined"));
    }

    #[test]
    fn category_action_requires_a_name() {
        let conditions = ActionConditions {
            category: Some(CategoryAction {
                condition: None,
                name: String::new(),
            }),
            ..ActionConditions::default()
        };
        assert!(validate_payload(&payload(conditions), &instance(false)).is_err());
    }

    #[test]
    fn bad_regex_surfaces_pattern_and_hint() {
        let conditions = ActionConditions {
            pause: Some(PauseAction {
                condition: Some(
                    serde_json::from_value(serde_json::json!({
                        "field": "name", "op": "matches", "value": "(?<=x)y"
                    }))
                    .expect("tree"),
                ),
            }),
            ..ActionConditions::default()
        };
        let err = validate_payload(&payload(conditions), &instance(false)).expect_err("reject");
        let message = err.to_string();
        assert!(message.contains("(?<=x)y"));
        assert!(message.contains("RE2"));
    }

    #[test]
    fn keep_files_delete_with_free_space_condition_is_rejected() {
        let conditions = ActionConditions {
            delete: Some(DeleteAction {
                condition: Some(
                    serde_json::from_value(serde_json::json!({
                        "field": "free_space", "op": "<", "value": "10GiB"
                    }))
                    .expect("tree"),
                ),
                mode: DeleteMode::KeepFiles,
                include_hardlinks: false,
                group_id: None,
            }),
            ..ActionConditions::default()
        };
        let err = validate_payload(&payload(conditions), &instance(false)).expect_err("reject");
        assert!(err.to_string().contains("never frees space"));
    }

    #[test]
    fn with_files_delete_may_use_free_space() {
        let conditions = ActionConditions {
            delete: Some(DeleteAction {
                condition: Some(
                    serde_json::from_value(serde_json::json!({
                        "field": "free_space", "op": "<", "value": "10GiB"
                    }))
                    .expect("tree"),
                ),
                mode: DeleteMode::WithFiles,
                include_hardlinks: false,
                group_id: None,
            }),
            ..ActionConditions::default()
        };
        validate_payload(&payload(conditions), &instance(false)).expect("valid");
    }

    #[test]
    fn delete_group_id_requires_keep_files() {
        let conditions = ActionConditions {
            delete: Some(DeleteAction {
                condition: None,
                mode: DeleteMode::WithFiles,
                include_hardlinks: false,
                group_id: Some("cross_seed.content_path".to_string()),
            }),
            ..ActionConditions::default()
        };
        assert!(validate_payload(&payload(conditions), &instance(false)).is_err());
    }

    #[test]
    fn hardlink_grouping_requires_local_fs() {
        let conditions = ActionConditions {
            pause: Some(PauseAction {
                condition: Some(
                    serde_json::from_value(serde_json::json!({
                        "field": "group_size", "op": ">=", "value": 2,
                        "group_id": "hardlink.signature"
                    }))
                    .expect("tree"),
                ),
            }),
            ..ActionConditions::default()
        };
        assert!(validate_payload(&payload(conditions.clone()), &instance(false)).is_err());
        validate_payload(&payload(conditions), &instance(true)).expect("valid with fs access");
    }

    #[test]
    fn tag_delete_on_remove_requires_explicit_tags() {
        let conditions = ActionConditions {
            tag: Some(TagAction {
                condition: None,
                tags: Vec::new(),
                mode: crate::model::TagMode::Add,
                use_tracker_as_tag: true,
                delete_on_remove: true,
            }),
            ..ActionConditions::default()
        };
        assert!(validate_payload(&payload(conditions), &instance(false)).is_err());
    }

    #[test]
    fn path_free_space_source_requires_local_fs_and_absolute_path() {
        let mut p = payload(pause_only());
        p.free_space_source = Some("path:/srv/data".to_string());
        assert!(validate_payload(&p, &instance(false)).is_err());
        validate_payload(&p, &instance(true)).expect("valid with fs access");

        p.free_space_source = Some("path:relative/data".to_string());
        assert!(validate_payload(&p, &instance(true)).is_err());

        p.free_space_source = Some("path:/srv/../etc".to_string());
        assert!(validate_payload(&p, &instance(true)).is_err());

        p.free_space_source = Some("nonsense".to_string());
        assert!(validate_payload(&p, &instance(true)).is_err());
    }
}
