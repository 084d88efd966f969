//! Error classification for upstream qBittorrent responses.

use flotilla_core::{ErrorKind, Kinded};
use thiserror::Error;

/// Convenience alias for upstream call results.
pub type QbitResult<T> = Result<T, QbitError>;

/// Failure surfaced by an upstream qBittorrent call.
#[derive(Debug, Error)]
pub enum QbitError {
    /// The session cookie was rejected and re-login did not recover it.
    #[error("upstream rejected authentication")]
    Unauthorized,
    /// The referenced torrent, category, or task does not exist upstream.
    #[error("upstream resource not found")]
    NotFound,
    /// The upstream reported a state conflict.
    #[error("upstream conflict: {detail}")]
    Conflict {
        /// Upstream-provided explanation.
        detail: String,
    },
    /// The upstream version does not support the requested operation.
    #[error("upstream version {version} does not support {operation}")]
    UnsupportedVersion {
        /// Version string recorded at login.
        version: String,
        /// Operation identifier.
        operation: &'static str,
    },
    /// A network fault or upstream 5xx; the retry window is exhausted.
    #[error("transient upstream failure: {detail}")]
    Transient {
        /// Short failure description.
        detail: String,
    },
    /// A 4xx the proxy cannot interpret or repair.
    #[error("permanent upstream failure ({status}): {detail}")]
    Permanent {
        /// Upstream status code, retained for diagnostics only.
        status: u16,
        /// Upstream-provided body, truncated.
        detail: String,
    },
    /// The configured base URL is not usable.
    #[error("invalid upstream base url")]
    BaseUrl(#[from] url::ParseError),
    /// The response body could not be decoded into the expected shape.
    #[error("failed to decode upstream response")]
    Decode(#[source] serde_json::Error),
}

impl Kinded for QbitError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::NotFound => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Self::Transient { .. } => ErrorKind::UpstreamTransient,
            Self::Permanent { .. } | Self::BaseUrl(_) | Self::Decode(_) => {
                ErrorKind::UpstreamPermanent
            }
        }
    }
}

impl QbitError {
    /// Whether a retry of the same request could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the failure indicates a rejected session.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

const BODY_SNIPPET_LIMIT: usize = 256;

/// Fold an upstream HTTP status and body into a [`QbitError`].
///
/// This is the only place upstream status codes are interpreted; qBittorrent
/// signals a missing or expired session with 403, missing resources with
/// 404, and state conflicts with 409.
#[must_use]
pub fn classify(status: u16, body: &str) -> QbitError {
    let detail = snippet(body);
    match status {
        401 | 403 => QbitError::Unauthorized,
        404 => QbitError::NotFound,
        409 => QbitError::Conflict { detail },
        code if code >= 500 => QbitError::Transient {
            detail: format!("upstream returned {code}: {detail}"),
        },
        code => QbitError::Permanent {
            status: code,
            detail,
        },
    }
}

/// Fold a transport-level failure into a [`QbitError`].
#[must_use]
pub(crate) fn classify_transport(err: &reqwest::Error) -> QbitError {
    QbitError::Transient {
        detail: if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection failed".to_string()
        } else {
            err.to_string()
        },
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= BODY_SNIPPET_LIMIT {
        trimmed.to_string()
    } else {
        let mut end = BODY_SNIPPET_LIMIT;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        trimmed[..end].to_string()
    }
}
