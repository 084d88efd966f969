//! Instance registry handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use flotilla_data::{InstancePatch, NewInstance};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::ApiState;

/// Instance representation returned to callers; credentials never leave
/// the server.
#[derive(Debug, Serialize)]
pub(crate) struct InstanceBody {
    id: i64,
    name: String,
    #[serde(rename = "baseUrl")]
    base_url: String,
    username: String,
    #[serde(rename = "basicUsername")]
    basic_username: Option<String>,
    #[serde(rename = "tlsSkipVerify")]
    tls_skip_verify: bool,
    #[serde(rename = "hasLocalFilesystemAccess")]
    has_local_filesystem_access: bool,
    enabled: bool,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    updated_at: DateTime<Utc>,
}

impl From<flotilla_core::Instance> for InstanceBody {
    fn from(instance: flotilla_core::Instance) -> Self {
        Self {
            id: instance.id,
            name: instance.name,
            base_url: instance.base_url,
            username: instance.username,
            basic_username: instance.basic_username,
            tls_skip_verify: instance.tls_skip_verify,
            has_local_filesystem_access: instance.has_local_filesystem_access,
            enabled: instance.enabled,
            created_at: instance.created_at,
            updated_at: instance.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateInstanceBody {
    name: String,
    base_url: String,
    username: String,
    password: String,
    #[serde(default)]
    basic_username: Option<String>,
    #[serde(default)]
    basic_password: Option<String>,
    #[serde(default)]
    tls_skip_verify: bool,
    #[serde(default)]
    has_local_filesystem_access: bool,
    #[serde(default = "default_true")]
    enabled: bool,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateInstanceBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    basic_username: Option<Option<String>>,
    #[serde(default)]
    basic_password: Option<Option<String>>,
    #[serde(default)]
    tls_skip_verify: Option<bool>,
    #[serde(default)]
    has_local_filesystem_access: Option<bool>,
    #[serde(default)]
    enabled: Option<bool>,
}

pub(crate) async fn list(
    State(state): State<ApiState>,
) -> Result<Json<Vec<InstanceBody>>, ApiError> {
    let instances = state.db.instances().list().await?;
    Ok(Json(instances.into_iter().map(InstanceBody::from).collect()))
}

pub(crate) async fn get_one(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<InstanceBody>, ApiError> {
    let instance = state.db.instances().get(id).await?;
    Ok(Json(instance.into()))
}

pub(crate) async fn create(
    State(state): State<ApiState>,
    Json(body): Json<CreateInstanceBody>,
) -> Result<(StatusCode, Json<InstanceBody>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    if body.base_url.trim().is_empty() {
        return Err(ApiError::bad_request("baseUrl must not be empty"));
    }

    let crypter = state.pool.crypter();
    let encrypted_password = crypter.encrypt(&body.password)?;
    let encrypted_basic_password = body
        .basic_password
        .as_deref()
        .map(|password| crypter.encrypt(password))
        .transpose()?;

    let instance = state
        .db
        .instances()
        .create(NewInstance {
            name: body.name,
            base_url: body.base_url,
            username: body.username,
            encrypted_password,
            basic_username: body.basic_username,
            encrypted_basic_password,
            tls_skip_verify: body.tls_skip_verify,
            has_local_filesystem_access: body.has_local_filesystem_access,
            enabled: body.enabled,
        })
        .await?;
    info!(instance_id = instance.id, "instance registered");
    Ok((StatusCode::CREATED, Json(instance.into())))
}

pub(crate) async fn update(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateInstanceBody>,
) -> Result<Json<InstanceBody>, ApiError> {
    let crypter = state.pool.crypter();
    let encrypted_password = body
        .password
        .as_deref()
        .map(|password| crypter.encrypt(password))
        .transpose()?;
    let encrypted_basic_password = match body.basic_password {
        Some(Some(password)) => Some(Some(crypter.encrypt(&password)?)),
        Some(None) => Some(None),
        None => None,
    };

    let connection_changed = encrypted_password.is_some()
        || encrypted_basic_password.is_some()
        || body.base_url.is_some()
        || body.username.is_some()
        || body.tls_skip_verify.is_some();

    let instance = state
        .db
        .instances()
        .update(
            id,
            InstancePatch {
                name: body.name,
                base_url: body.base_url,
                username: body.username,
                encrypted_password,
                basic_username: body.basic_username,
                encrypted_basic_password,
                tls_skip_verify: body.tls_skip_verify,
                has_local_filesystem_access: body.has_local_filesystem_access,
                enabled: body.enabled,
            },
        )
        .await?;

    // Connection edits drop the cached session and snapshot so the next
    // use reconnects with the new settings.
    if connection_changed {
        state.sync.forget_instance(id).await;
    } else if body.enabled == Some(false) {
        state.pool.invalidate(id).await;
    }
    Ok(Json(instance.into()))
}

pub(crate) async fn remove(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db.instances().delete(id).await?;
    state.sync.forget_instance(id).await;
    info!(instance_id = id, "instance deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub(crate) struct TestConnectionBody {
    ok: bool,
    version: Option<String>,
}

pub(crate) async fn test_connection(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<TestConnectionBody>, ApiError> {
    let handle = state.pool.get_client(id).await?;
    let version = handle.client().version().await;
    Ok(Json(TestConnectionBody { ok: true, version }))
}
