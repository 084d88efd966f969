//! Router composition and shared request parsing.

mod instances;
mod programs;
mod rules;
mod torrents;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::ApiState;

/// Uploads above this bound are refused with 413.
const MAX_ADD_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Build the full API router over the shared state.
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/instances", get(instances::list).post(instances::create))
        .route(
            "/api/instances/{id}",
            get(instances::get_one)
                .put(instances::update)
                .delete(instances::remove),
        )
        .route("/api/instances/{id}/test", post(instances::test_connection))
        .route(
            "/api/instances/{id}/torrents",
            get(torrents::list)
                .post(torrents::add)
                .layer(DefaultBodyLimit::max(MAX_ADD_BODY_BYTES)),
        )
        .route("/api/instances/{id}/torrents/bulk", post(torrents::bulk))
        .route(
            "/api/instances/{id}/torrents/fields",
            get(torrents::field_values),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/properties",
            get(torrents::properties),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/files",
            get(torrents::files),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/trackers",
            get(torrents::trackers),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/peers",
            get(torrents::peers),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/webseeds",
            get(torrents::webseeds),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/pieceStates",
            get(torrents::piece_states),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/rename",
            post(torrents::rename),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/renameFile",
            post(torrents::rename_file),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/renameFolder",
            post(torrents::rename_folder),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/export",
            get(torrents::export),
        )
        .route(
            "/api/instances/{id}/torrents/{hash}/files/download",
            get(torrents::download_file),
        )
        .route(
            "/api/instances/{id}/categories",
            get(torrents::list_categories).post(torrents::create_category),
        )
        .route(
            "/api/instances/{id}/categories/{name}",
            put(torrents::edit_category).delete(torrents::remove_category),
        )
        .route(
            "/api/instances/{id}/tags",
            get(torrents::list_tags).post(torrents::create_tags),
        )
        .route("/api/instances/{id}/tags/{tag}", delete(torrents::delete_tag))
        .route("/api/torrents", get(torrents::cross_instance))
        .route(
            "/api/instances/{id}/rules",
            get(rules::list).post(rules::create),
        )
        .route("/api/instances/{id}/rules/preview", post(rules::preview))
        .route("/api/instances/{id}/rules/apply", post(rules::apply_instance))
        .route(
            "/api/rules/{id}",
            get(rules::get_one).put(rules::update).delete(rules::remove),
        )
        .route("/api/rules/{id}/apply", post(rules::apply))
        .route("/api/rules/{id}/dryrun", post(rules::dry_run))
        .route("/api/rules/{id}/activity", get(rules::rule_activity))
        .route("/api/rules/validate-regex", post(rules::validate_regex))
        .route(
            "/api/activity",
            get(rules::activity).delete(rules::prune_activity),
        )
        .route("/api/activity/{id}/run", get(rules::activity_run))
        .route(
            "/api/programs",
            get(programs::list).post(programs::create),
        )
        .route(
            "/api/programs/{id}",
            get(programs::get_one)
                .put(programs::update)
                .delete(programs::remove),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Query-string form of a list request; comma-joined multi-value fields.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    pub(crate) status: Option<String>,
    pub(crate) categories: Option<String>,
    pub(crate) tags: Option<String>,
    pub(crate) tags_match: Option<String>,
    pub(crate) trackers: Option<String>,
    pub(crate) search: Option<String>,
    /// Expression filter as a JSON-encoded condition tree.
    pub(crate) expr: Option<String>,
    pub(crate) sort: Option<String>,
    pub(crate) direction: Option<String>,
    pub(crate) limit: Option<usize>,
    pub(crate) offset: Option<usize>,
    pub(crate) instance_ids: Option<String>,
}

impl ListQuery {
    pub(crate) fn into_request(self) -> Result<flotilla_query::ListRequest, ApiError> {
        use flotilla_query::{SortDirection, SortKey, StatusFilter, TagMatchMode, TorrentFilter};

        let parse_list = |raw: &Option<String>| -> Vec<String> {
            raw.as_deref()
                .map(|joined| {
                    joined
                        .split(',')
                        .map(str::trim)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let status = self
            .status
            .as_deref()
            .map(|joined| {
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| {
                        serde_json::from_value::<StatusFilter>(serde_json::Value::String(
                            item.to_string(),
                        ))
                        .map_err(|_| {
                            ApiError::bad_request(format!("unknown status filter {item:?}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let tag_match_mode = match self.tags_match.as_deref() {
            None | Some("any") => TagMatchMode::Any,
            Some("all") => TagMatchMode::All,
            Some(other) => {
                return Err(ApiError::bad_request(format!(
                    "tagsMatch must be \"any\" or \"all\", got {other:?}"
                )));
            }
        };

        let expr = self
            .expr
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| ApiError::bad_request(format!("bad expr filter: {err}")))?;

        let sort = self
            .sort
            .as_deref()
            .map(|raw| {
                serde_json::from_value::<SortKey>(serde_json::Value::String(raw.to_string()))
                    .map_err(|_| ApiError::bad_request(format!("unknown sort key {raw:?}")))
            })
            .transpose()?
            .unwrap_or_default();

        let direction = match self.direction.as_deref() {
            None | Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            Some(other) => {
                return Err(ApiError::bad_request(format!(
                    "direction must be \"asc\" or \"desc\", got {other:?}"
                )));
            }
        };

        Ok(flotilla_query::ListRequest {
            filter: TorrentFilter {
                status,
                categories: parse_list(&self.categories),
                tags: parse_list(&self.tags),
                tag_match_mode,
                trackers: parse_list(&self.trackers),
                expr,
                search: self.search.clone(),
            },
            sort,
            direction,
            limit: self.limit.unwrap_or(0),
            offset: self.offset.unwrap_or(0),
        })
    }

    pub(crate) fn instance_ids(&self) -> Result<Option<Vec<i64>>, ApiError> {
        self.instance_ids
            .as_deref()
            .map(|joined| {
                joined
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| {
                        item.parse::<i64>().map_err(|_| {
                            ApiError::bad_request(format!("bad instance id {item:?}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_lists_parse_into_dimensions() {
        let query = ListQuery {
            status: Some("completed,downloading".to_string()),
            tags: Some("a".to_string()),
            sort: Some("size".to_string()),
            limit: Some(10),
            ..ListQuery::default()
        };
        let request = query.into_request().expect("parse");
        assert_eq!(request.filter.status.len(), 2);
        assert_eq!(request.filter.tags, vec!["a".to_string()]);
        assert_eq!(request.limit, 10);
    }

    #[test]
    fn unknown_status_is_a_bad_request() {
        let query = ListQuery {
            status: Some("meditating".to_string()),
            ..ListQuery::default()
        };
        assert!(query.into_request().is_err());
    }

    #[test]
    fn instance_ids_parse_in_order() {
        let query = ListQuery {
            instance_ids: Some("3,1,2".to_string()),
            ..ListQuery::default()
        };
        assert_eq!(query.instance_ids().expect("parse"), Some(vec![3, 1, 2]));
    }
}
