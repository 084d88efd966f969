//! Rule CRUD, manual runs, preview, and activity handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use flotilla_data::ActivityQuery;
use flotilla_rules::{ActionConditions, Rule, RulePayload, RunSummary};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::ApiState;

/// Rule representation returned to callers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RuleBody {
    id: i64,
    instance_id: i64,
    name: String,
    enabled: bool,
    dry_run: bool,
    sort_order: i64,
    tracker_scope: String,
    interval_seconds: i64,
    conditions: ActionConditions,
    free_space_source: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Rule> for RuleBody {
    fn from(rule: Rule) -> Self {
        Self {
            id: rule.id,
            instance_id: rule.instance_id,
            name: rule.name,
            enabled: rule.enabled,
            dry_run: rule.dry_run,
            sort_order: rule.sort_order,
            tracker_scope: rule.tracker_scope.encode(),
            interval_seconds: rule.interval_seconds,
            conditions: rule.conditions,
            free_space_source: rule.free_space_source,
            created_at: rule.created_at,
            updated_at: rule.updated_at,
        }
    }
}

pub(crate) async fn list(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<RuleBody>>, ApiError> {
    let rules = state.engine.list_rules(id).await?;
    Ok(Json(rules.into_iter().map(RuleBody::from).collect()))
}

pub(crate) async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<RuleBody>, ApiError> {
    Ok(Json(state.engine.get_rule(id).await?.into()))
}

pub(crate) async fn create(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(payload): Json<RulePayload>,
) -> Result<(StatusCode, Json<RuleBody>), ApiError> {
    let rule = state.engine.create_rule(id, payload).await?;
    Ok((StatusCode::CREATED, Json(rule.into())))
}

pub(crate) async fn update(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(payload): Json<RulePayload>,
) -> Result<Json<RuleBody>, ApiError> {
    Ok(Json(state.engine.update_rule(id, payload).await?.into()))
}

pub(crate) async fn remove(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn apply(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<RunSummary>, ApiError> {
    Ok(Json(state.engine.apply_once(id, false).await?))
}

pub(crate) async fn dry_run(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<RunSummary>, ApiError> {
    Ok(Json(state.engine.apply_once(id, true).await?))
}

pub(crate) async fn apply_instance(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<RunSummary>, ApiError> {
    Ok(Json(state.engine.apply_instance(id).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreviewQuery {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_preview_limit")]
    limit: usize,
}

const fn default_preview_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub(crate) struct PreviewBody {
    data: Vec<flotilla_rules::PlannedItem>,
    total: usize,
}

pub(crate) async fn preview(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<PreviewQuery>,
    Json(payload): Json<RulePayload>,
) -> Result<Json<PreviewBody>, ApiError> {
    let (data, total) = state
        .engine
        .preview(id, payload, query.offset, query.limit)
        .await?;
    Ok(Json(PreviewBody { data, total }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidateRegexBody {
    pattern: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ValidateRegexResponse {
    valid: bool,
}

pub(crate) async fn validate_regex(
    Json(body): Json<ValidateRegexBody>,
) -> Result<Json<ValidateRegexResponse>, ApiError> {
    regex::Regex::new(&body.pattern).map_err(|err| {
        ApiError::bad_request(format!(
            "invalid regex {:?}: {err} (patterns use RE2 syntax; lookaround is not supported)",
            body.pattern
        ))
    })?;
    Ok(Json(ValidateRegexResponse { valid: true }))
}

/// Activity representation returned to callers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ActivityBody {
    id: i64,
    rule_id: Option<i64>,
    instance_id: i64,
    hash: String,
    torrent_name: String,
    action: String,
    outcome: String,
    detail: Option<String>,
    run_id: String,
    created_at: DateTime<Utc>,
}

impl From<flotilla_data::ActivityRecord> for ActivityBody {
    fn from(record: flotilla_data::ActivityRecord) -> Self {
        Self {
            id: record.id,
            rule_id: record.rule_id,
            instance_id: record.instance_id,
            hash: record.hash,
            torrent_name: record.torrent_name,
            action: record.action,
            outcome: record.outcome,
            detail: record.detail,
            run_id: record.run_id,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ActivityListQuery {
    #[serde(default)]
    rule_id: Option<i64>,
    #[serde(default)]
    instance_id: Option<i64>,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

pub(crate) async fn activity(
    State(state): State<ApiState>,
    Query(query): Query<ActivityListQuery>,
) -> Result<Json<Vec<ActivityBody>>, ApiError> {
    let records = state
        .db
        .activity()
        .list(&ActivityQuery {
            rule_id: query.rule_id,
            instance_id: query.instance_id,
            run_id: query.run_id,
            limit: query.limit.unwrap_or(100),
            offset: query.offset.unwrap_or(0),
        })
        .await?;
    Ok(Json(records.into_iter().map(ActivityBody::from).collect()))
}

pub(crate) async fn rule_activity(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<ActivityListQuery>,
) -> Result<Json<Vec<ActivityBody>>, ApiError> {
    let records = state
        .db
        .activity()
        .list(&ActivityQuery {
            rule_id: Some(id),
            instance_id: query.instance_id,
            run_id: query.run_id,
            limit: query.limit.unwrap_or(100),
            offset: query.offset.unwrap_or(0),
        })
        .await?;
    Ok(Json(records.into_iter().map(ActivityBody::from).collect()))
}

pub(crate) async fn activity_run(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ActivityBody>>, ApiError> {
    // Resolve the record, then return every record in its run.
    let anchor = state
        .db
        .activity()
        .list(&ActivityQuery {
            limit: 1000,
            ..ActivityQuery::default()
        })
        .await?
        .into_iter()
        .find(|record| record.id == id)
        .ok_or_else(|| ApiError::not_found(format!("activity {id} not found")))?;

    let records = state
        .db
        .activity()
        .list(&ActivityQuery {
            run_id: Some(anchor.run_id),
            limit: 1000,
            ..ActivityQuery::default()
        })
        .await?;
    Ok(Json(records.into_iter().map(ActivityBody::from).collect()))
}

#[derive(Debug, Deserialize)]
pub(crate) struct PruneQuery {
    older_than: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PruneResponse {
    deleted: u64,
}

pub(crate) async fn prune_activity(
    State(state): State<ApiState>,
    Query(query): Query<PruneQuery>,
) -> Result<Json<PruneResponse>, ApiError> {
    let days = query.older_than.unwrap_or(7);
    if days < 0 {
        return Err(ApiError::bad_request("older_than must not be negative"));
    }
    let deleted = state.db.activity().delete_older_than(days).await?;
    Ok(Json(PruneResponse { deleted }))
}
