//! The single error-to-status mapping for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use flotilla_core::{ErrorKind, Kinded};
use serde::Serialize;

/// Wire error body: a stable code plus a human-readable message.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Structured API error; every handler failure flows through here.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// 400 with a validation message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 403 for local-filesystem and path-policy refusals.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    /// 404 for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// 409 for conflicting state.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    /// 413 for oversize uploads.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", message)
    }

    /// 500 for internal defects.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    /// Map a classified error from any lower layer.
    pub fn from_kinded(err: &(impl Kinded + std::fmt::Display)) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::UpstreamDisabled | ErrorKind::UpstreamTransient => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::UpstreamPermanent => StatusCode::BAD_GATEWAY,
            ErrorKind::UnsupportedVersion => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, kind.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Kinded + std::fmt::Display,
{
    fn from(err: E) -> Self {
        Self::from_kinded(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_qbit::QbitError;

    #[test]
    fn disabled_upstreams_map_to_service_unavailable() {
        let err = flotilla_pool::PoolError::InstanceDisabled { id: 3 };
        let api = ApiError::from_kinded(&err);
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.code, "upstream_disabled");
    }

    #[test]
    fn unsupported_version_maps_to_not_implemented() {
        let err = QbitError::UnsupportedVersion {
            version: "v4.6.7".to_string(),
            operation: "creator_add_task",
        };
        let api = ApiError::from_kinded(&err);
        assert_eq!(api.status, StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn conflict_keeps_the_upstream_detail() {
        let err = QbitError::Conflict {
            detail: "move already in progress".to_string(),
        };
        let api = ApiError::from_kinded(&err);
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert!(api.message.contains("move already in progress"));
    }
}
