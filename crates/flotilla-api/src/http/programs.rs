//! External program registry handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use flotilla_data::{NewProgram, ProgramPatch, ProgramRecord};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::ApiState;

const EXECUTION_MODES: &[&str] = &["background", "terminal", "start", "direct"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProgramBody {
    id: i64,
    name: String,
    path: String,
    args_template: String,
    execution_mode: String,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProgramRecord> for ProgramBody {
    fn from(record: ProgramRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            path: record.path,
            args_template: record.args_template,
            execution_mode: record.execution_mode,
            enabled: record.enabled,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateProgramBody {
    name: String,
    path: String,
    #[serde(default)]
    args_template: String,
    #[serde(default = "default_mode")]
    execution_mode: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_mode() -> String {
    "background".to_string()
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateProgramBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    args_template: Option<String>,
    #[serde(default)]
    execution_mode: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
}

fn validate_mode(mode: &str) -> Result<(), ApiError> {
    if EXECUTION_MODES.contains(&mode) {
        return Ok(());
    }
    Err(ApiError::bad_request(format!(
        "executionMode must be one of {EXECUTION_MODES:?}, got {mode:?}"
    )))
}

fn validate_path(path: &str) -> Result<(), ApiError> {
    let path = std::path::Path::new(path);
    if !path.is_absolute() {
        return Err(ApiError::bad_request("program path must be absolute"));
    }
    if path
        .components()
        .any(|component| matches!(component, std::path::Component::ParentDir))
    {
        return Err(ApiError::bad_request(
            "program path must not contain \"..\"",
        ));
    }
    Ok(())
}

pub(crate) async fn list(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ProgramBody>>, ApiError> {
    let programs = state.db.programs().list().await?;
    Ok(Json(programs.into_iter().map(ProgramBody::from).collect()))
}

pub(crate) async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<ProgramBody>, ApiError> {
    Ok(Json(state.db.programs().get(id).await?.into()))
}

pub(crate) async fn create(
    State(state): State<ApiState>,
    Json(body): Json<CreateProgramBody>,
) -> Result<(StatusCode, Json<ProgramBody>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    validate_path(&body.path)?;
    validate_mode(&body.execution_mode)?;
    let record = state
        .db
        .programs()
        .create(NewProgram {
            name: body.name,
            path: body.path,
            args_template: body.args_template,
            execution_mode: body.execution_mode,
            enabled: body.enabled,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(record.into())))
}

pub(crate) async fn update(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateProgramBody>,
) -> Result<Json<ProgramBody>, ApiError> {
    if let Some(path) = &body.path {
        validate_path(path)?;
    }
    if let Some(mode) = &body.execution_mode {
        validate_mode(mode)?;
    }
    let record = state
        .db
        .programs()
        .update(
            id,
            ProgramPatch {
                name: body.name,
                path: body.path,
                args_template: body.args_template,
                execution_mode: body.execution_mode,
                enabled: body.enabled,
            },
        )
        .await?;
    Ok(Json(record.into()))
}

pub(crate) async fn remove(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db.programs().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
