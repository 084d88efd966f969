//! Torrent listing, mutation, and detail handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use flotilla_qbit::{AddTorrentOptions, AddTorrentPayload, BulkVerb};
use flotilla_query::{CrossListResponse, FieldSelector, ListResponse};
use flotilla_sync::DetailEndpoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::ApiError;
use crate::http::ListQuery;
use crate::state::ApiState;

fn data_source_header(fresh: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "X-Data-Source",
        HeaderValue::from_static(if fresh { "fresh" } else { "stale" }),
    );
    headers
}

pub(crate) async fn list(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<(HeaderMap, Json<ListResponse>), ApiError> {
    let request = query.into_request()?;
    let response = state.listing.list(id, request).await?;
    Ok((data_source_header(response.fresh), Json(response)))
}

pub(crate) async fn cross_instance(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<CrossListResponse>, ApiError> {
    let ids = match query.instance_ids()? {
        Some(ids) => ids,
        None => {
            // Default priority: ascending id, so the lowest id wins dedup.
            let mut ids: Vec<i64> = state
                .db
                .instances()
                .list()
                .await?
                .into_iter()
                .filter(|instance| instance.enabled)
                .map(|instance| instance.id)
                .collect();
            ids.sort_unstable();
            ids
        }
    };
    let request = query.into_request()?;
    let response = state.listing.list_cross(ids, request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub(crate) struct FieldQuery {
    field: FieldSelector,
}

pub(crate) async fn field_values(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(field): Query<FieldQuery>,
    Query(list): Query<ListQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let request = list.into_request()?;
    let values = state
        .listing
        .field_values(id, field.field, request.filter)
        .await?;
    Ok(Json(values))
}

#[derive(Debug, Serialize, Default)]
pub(crate) struct AddTorrentResponse {
    added: usize,
    failed: usize,
    #[serde(rename = "failedFiles")]
    failed_files: Vec<String>,
    #[serde(rename = "failedURLs")]
    failed_urls: Vec<String>,
}

pub(crate) async fn add(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<AddTorrentResponse>), ApiError> {
    let mut urls: Vec<String> = Vec::new();
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    let mut options = AddTorrentOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("bad multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "torrents" => {
                let filename = field
                    .file_name()
                    .unwrap_or("upload.torrent")
                    .to_string();
                let bytes = field.bytes().await.map_err(|err| {
                    ApiError::payload_too_large(format!("upload too large: {err}"))
                })?;
                files.push((filename, bytes.to_vec()));
            }
            "urls" => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::bad_request(format!("bad urls field: {err}")))?;
                urls.extend(
                    text.lines()
                        .map(str::trim)
                        .filter(|line| !line.is_empty())
                        .map(str::to_string),
                );
            }
            other => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| ApiError::bad_request(format!("bad field {other}: {err}")))?;
                apply_add_option(&mut options, other, &value)?;
            }
        }
    }

    if urls.is_empty() && files.is_empty() {
        return Err(ApiError::bad_request(
            "request must carry torrent files or urls",
        ));
    }

    let mut response = AddTorrentResponse::default();
    for (filename, bytes) in files {
        let payload = AddTorrentPayload {
            urls: Vec::new(),
            files: vec![(filename.clone(), bytes)],
            options: options.clone(),
        };
        match state.sync.add_torrent(id, payload).await {
            Ok(()) => response.added += 1,
            Err(err) => {
                debug!(instance_id = id, file = %filename, error = %err, "add failed");
                response.failed += 1;
                response.failed_files.push(filename);
            }
        }
    }
    for url in urls {
        let payload = AddTorrentPayload {
            urls: vec![url.clone()],
            files: Vec::new(),
            options: options.clone(),
        };
        match state.sync.add_torrent(id, payload).await {
            Ok(()) => response.added += 1,
            Err(err) => {
                debug!(instance_id = id, url = %url, error = %err, "add failed");
                response.failed += 1;
                response.failed_urls.push(url);
            }
        }
    }
    Ok((StatusCode::CREATED, Json(response)))
}

fn apply_add_option(
    options: &mut AddTorrentOptions,
    name: &str,
    value: &str,
) -> Result<(), ApiError> {
    let parse_bool = |raw: &str| raw == "true" || raw == "1";
    match name {
        "savepath" => options.save_path = Some(value.to_string()),
        "category" => options.category = Some(value.to_string()),
        "tags" => {
            options.tags = value
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect();
        }
        "skip_checking" => options.skip_checking = parse_bool(value),
        "stopped" | "paused" => options.stopped = parse_bool(value),
        "autoTMM" => options.auto_tmm = Some(parse_bool(value)),
        "sequentialDownload" => options.sequential = parse_bool(value),
        "firstLastPiecePrio" => options.first_last_piece_prio = parse_bool(value),
        "upLimitKib" => {
            let kib: i64 = value
                .parse()
                .map_err(|_| ApiError::bad_request("bad upLimitKib"))?;
            options.up_limit = Some(kib.saturating_mul(1024));
        }
        "dlLimitKib" => {
            let kib: i64 = value
                .parse()
                .map_err(|_| ApiError::bad_request("bad dlLimitKib"))?;
            options.dl_limit = Some(kib.saturating_mul(1024));
        }
        "ratioLimit" => {
            options.ratio_limit = Some(
                value
                    .parse()
                    .map_err(|_| ApiError::bad_request("bad ratioLimit"))?,
            );
        }
        "seedingTimeLimit" => {
            options.seeding_time_limit = Some(
                value
                    .parse()
                    .map_err(|_| ApiError::bad_request("bad seedingTimeLimit"))?,
            );
        }
        "rename" => options.rename = Some(value.to_string()),
        "contentLayout" => options.content_layout = Some(value.to_string()),
        other => {
            return Err(ApiError::bad_request(format!(
                "unknown add option {other:?}"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BulkBody {
    hashes: Vec<String>,
    action: String,
    #[serde(default)]
    delete_files: bool,
    #[serde(default)]
    enable: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    ratio_limit: Option<f64>,
    #[serde(default)]
    seeding_time_limit: Option<i64>,
    #[serde(default)]
    inactive_seeding_time_limit: Option<i64>,
    #[serde(default)]
    upload_limit_kib: Option<i64>,
    #[serde(default)]
    download_limit_kib: Option<i64>,
}

pub(crate) async fn bulk(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<BulkBody>,
) -> Result<StatusCode, ApiError> {
    if body.hashes.is_empty() {
        return Err(ApiError::bad_request("hashes must not be empty"));
    }
    let hashes = body.hashes.clone();
    match body.action.as_str() {
        "stop" | "pause" => state.sync.bulk_action(id, BulkVerb::Stop, hashes).await?,
        "start" | "resume" => state.sync.bulk_action(id, BulkVerb::Start, hashes).await?,
        "forceStart" => {
            state
                .sync
                .bulk_action(id, BulkVerb::ForceStart, hashes)
                .await?;
        }
        "recheck" => state.sync.bulk_action(id, BulkVerb::Recheck, hashes).await?,
        "reannounce" => {
            state
                .sync
                .bulk_action(id, BulkVerb::Reannounce, hashes)
                .await?;
        }
        "topPrio" => {
            state
                .sync
                .bulk_action(id, BulkVerb::TopPriority, hashes)
                .await?;
        }
        "bottomPrio" => {
            state
                .sync
                .bulk_action(id, BulkVerb::BottomPriority, hashes)
                .await?;
        }
        "increasePrio" => {
            state
                .sync
                .bulk_action(id, BulkVerb::IncreasePriority, hashes)
                .await?;
        }
        "decreasePrio" => {
            state
                .sync
                .bulk_action(id, BulkVerb::DecreasePriority, hashes)
                .await?;
        }
        "toggleSequential" => {
            state
                .sync
                .bulk_action(id, BulkVerb::ToggleSequential, hashes)
                .await?;
        }
        "toggleFirstLastPiecePrio" => {
            state
                .sync
                .bulk_action(id, BulkVerb::ToggleFirstLastPiece, hashes)
                .await?;
        }
        "setAutoManagement" => {
            state
                .sync
                .bulk_action(id, BulkVerb::SetAutoManagement(body.enable), hashes)
                .await?;
        }
        "setSuperSeeding" => {
            state
                .sync
                .bulk_action(id, BulkVerb::SetSuperSeeding(body.enable), hashes)
                .await?;
        }
        "delete" => {
            state
                .sync
                .bulk_action(
                    id,
                    BulkVerb::Delete {
                        delete_files: body.delete_files,
                    },
                    hashes,
                )
                .await?;
        }
        "addTags" => state.sync.add_tags(id, hashes, body.tags).await?,
        "removeTags" => state.sync.remove_tags(id, hashes, body.tags).await?,
        "setTags" => state.sync.set_tags(id, hashes, body.tags).await?,
        "setCategory" => {
            let category = body
                .category
                .ok_or_else(|| ApiError::bad_request("setCategory requires category"))?;
            state.sync.set_category(id, hashes, category).await?;
        }
        "setLocation" => {
            let location = body
                .location
                .ok_or_else(|| ApiError::bad_request("setLocation requires location"))?;
            state.sync.set_location(id, hashes, location).await?;
        }
        "setShareLimits" => {
            state
                .sync
                .set_share_limits(
                    id,
                    hashes,
                    body.ratio_limit.unwrap_or(-2.0),
                    body.seeding_time_limit.unwrap_or(-2),
                    body.inactive_seeding_time_limit.unwrap_or(-2),
                )
                .await?;
        }
        "setSpeedLimits" => {
            // Rates arrive in KiB/s and dispatch upstream in bytes/s.
            state
                .sync
                .set_speed_limits(
                    id,
                    hashes,
                    body.upload_limit_kib.map(|kib| kib.saturating_mul(1024)),
                    body.download_limit_kib.map(|kib| kib.saturating_mul(1024)),
                )
                .await?;
        }
        other => {
            return Err(ApiError::bad_request(format!(
                "unknown bulk action {other:?}"
            )));
        }
    }
    Ok(StatusCode::OK)
}

async fn detail(
    state: &ApiState,
    id: i64,
    hash: &str,
    endpoint: DetailEndpoint,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.sync.torrent_detail(id, hash, endpoint).await?))
}

pub(crate) async fn properties(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
) -> Result<Json<Value>, ApiError> {
    detail(&state, id, &hash, DetailEndpoint::Properties).await
}

pub(crate) async fn files(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
) -> Result<Json<Value>, ApiError> {
    detail(&state, id, &hash, DetailEndpoint::Files).await
}

pub(crate) async fn trackers(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
) -> Result<Json<Value>, ApiError> {
    detail(&state, id, &hash, DetailEndpoint::Trackers).await
}

pub(crate) async fn peers(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
) -> Result<Json<Value>, ApiError> {
    detail(&state, id, &hash, DetailEndpoint::Peers).await
}

pub(crate) async fn webseeds(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
) -> Result<Json<Value>, ApiError> {
    detail(&state, id, &hash, DetailEndpoint::WebSeeds).await
}

pub(crate) async fn piece_states(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
) -> Result<Json<Value>, ApiError> {
    detail(&state, id, &hash, DetailEndpoint::PieceStates).await
}

#[derive(Debug, Deserialize)]
pub(crate) struct RenameBody {
    name: String,
}

pub(crate) async fn rename(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
    Json(body): Json<RenameBody>,
) -> Result<StatusCode, ApiError> {
    state.sync.rename_torrent(id, hash, body.name).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenamePathBody {
    old_path: String,
    new_path: String,
}

pub(crate) async fn rename_file(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
    Json(body): Json<RenamePathBody>,
) -> Result<StatusCode, ApiError> {
    let handle = state.pool.get_client(id).await?;
    let result = handle
        .client()
        .rename_file(&hash.to_ascii_lowercase(), &body.old_path, &body.new_path)
        .await;
    handle.observe(&result);
    result?;
    Ok(StatusCode::OK)
}

pub(crate) async fn rename_folder(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
    Json(body): Json<RenamePathBody>,
) -> Result<StatusCode, ApiError> {
    let handle = state.pool.get_client(id).await?;
    let result = handle
        .client()
        .rename_folder(&hash.to_ascii_lowercase(), &body.old_path, &body.new_path)
        .await;
    handle.observe(&result);
    result?;
    Ok(StatusCode::OK)
}

pub(crate) async fn export(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
) -> Result<Response, ApiError> {
    let bytes = state.sync.export_torrent(id, &hash).await?;
    let read = state.sync.read(id).await?;
    let name = read
        .snapshot
        .torrents
        .get(&hash.to_ascii_lowercase())
        .map_or_else(|| hash.clone(), |view| view.name.clone());
    let filename = sanitize_filename(&name);

    let mut response = (StatusCode::OK, bytes).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-bittorrent"),
    );
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}.torrent\""))
    {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

/// Strip control characters, quotes, and path separators from a
/// user-controlled name before embedding it in a header.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '"' | '\\' | '/' | ';') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "torrent".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DownloadQuery {
    index: i64,
}

pub(crate) async fn download_file(
    State(state): State<ApiState>,
    Path((id, hash)): Path<(i64, String)>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let instance = state.db.instances().get(id).await?;
    if !instance.has_local_filesystem_access {
        return Err(ApiError::forbidden(
            "this instance has no local filesystem access",
        ));
    }

    let read = state.sync.read(id).await?;
    let view = read
        .snapshot
        .torrents
        .get(&hash.to_ascii_lowercase())
        .ok_or_else(|| ApiError::not_found(format!("torrent {hash} not found")))?;
    let save_path = view.save_path.clone();
    drop(read);

    let files = state
        .sync
        .torrent_detail(id, &hash, DetailEndpoint::Files)
        .await?;
    let entries = files
        .as_array()
        .ok_or_else(|| ApiError::internal("unexpected files payload"))?;
    let entry = entries
        .iter()
        .find(|entry| entry.get("index").and_then(Value::as_i64) == Some(query.index))
        .ok_or_else(|| ApiError::not_found(format!("file index {} not found", query.index)))?;
    let relative = entry
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::internal("file entry has no name"))?;

    // Traversal-safe resolution: the canonical target must stay under the
    // canonical save path.
    let root = std::path::Path::new(&save_path)
        .canonicalize()
        .map_err(|err| ApiError::not_found(format!("save path unavailable: {err}")))?;
    let target = root
        .join(relative)
        .canonicalize()
        .map_err(|err| ApiError::not_found(format!("file unavailable: {err}")))?;
    if !target.starts_with(&root) {
        return Err(ApiError::forbidden("file path escapes the save path"));
    }

    let file = tokio::fs::File::open(&target)
        .await
        .map_err(|err| ApiError::not_found(format!("cannot open file: {err}")))?;
    let stream = ReaderStream::new(file);
    let filename = sanitize_filename(
        target
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("download"),
    );

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
    {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

pub(crate) async fn list_categories(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let read = state.sync.read(id).await?;
    let value = serde_json::to_value(&read.snapshot.categories)
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CategoryBody {
    name: String,
    #[serde(default)]
    save_path: String,
}

pub(crate) async fn create_category(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<CategoryBody>,
) -> Result<StatusCode, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("category name must not be empty"));
    }
    state
        .sync
        .create_category(id, body.name, body.save_path)
        .await?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EditCategoryBody {
    #[serde(default)]
    save_path: String,
}

pub(crate) async fn edit_category(
    State(state): State<ApiState>,
    Path((id, name)): Path<(i64, String)>,
    Json(body): Json<EditCategoryBody>,
) -> Result<StatusCode, ApiError> {
    state.sync.edit_category(id, name, body.save_path).await?;
    Ok(StatusCode::OK)
}

pub(crate) async fn remove_category(
    State(state): State<ApiState>,
    Path((id, name)): Path<(i64, String)>,
) -> Result<StatusCode, ApiError> {
    state.sync.remove_categories(id, vec![name]).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_tags(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<String>>, ApiError> {
    let read = state.sync.read(id).await?;
    Ok(Json(read.snapshot.tags.iter().cloned().collect()))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTagsBody {
    tags: Vec<String>,
}

pub(crate) async fn create_tags(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<CreateTagsBody>,
) -> Result<StatusCode, ApiError> {
    if body.tags.is_empty() {
        return Err(ApiError::bad_request("tags must not be empty"));
    }
    state.sync.create_tags(id, body.tags).await?;
    Ok(StatusCode::CREATED)
}

pub(crate) async fn delete_tag(
    State(state): State<ApiState>,
    Path((id, tag)): Path<(i64, String)>,
) -> Result<StatusCode, ApiError> {
    state.sync.delete_tags(id, vec![tag]).await?;
    Ok(StatusCode::NO_CONTENT)
}
