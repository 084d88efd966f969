//! Stable error classification shared by every crate in the workspace.

use serde::{Deserialize, Serialize};

/// Classification for every failure the proxy can surface.
///
/// The HTTP boundary maps each kind to exactly one status code; nothing
/// below that boundary is allowed to leak raw upstream status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller input failed validation.
    BadRequest,
    /// The caller's own session was rejected.
    Unauthorized,
    /// A referenced resource does not exist.
    NotFound,
    /// The request conflicts with current state.
    Conflict,
    /// The target instance is disabled or its credentials are unusable.
    UpstreamDisabled,
    /// The upstream failed transiently and the retry window is exhausted.
    UpstreamTransient,
    /// The upstream rejected the request in a way the proxy cannot repair.
    UpstreamPermanent,
    /// The upstream version does not support the requested operation.
    UnsupportedVersion,
    /// A defect inside the proxy itself.
    Internal,
}

impl ErrorKind {
    /// Stable wire code used in error response bodies.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::UpstreamDisabled => "upstream_disabled",
            Self::UpstreamTransient => "upstream_transient",
            Self::UpstreamPermanent => "upstream_permanent",
            Self::UnsupportedVersion => "unsupported_version",
            Self::Internal => "internal",
        }
    }

    /// Whether retrying the same call later could succeed without operator
    /// intervention.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::UpstreamTransient)
    }
}

/// Implemented by every crate-level error enum so callers can classify
/// failures without matching concrete variants.
pub trait Kinded {
    /// The stable classification of this error.
    fn kind(&self) -> ErrorKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_snake_case_and_unique() {
        let kinds = [
            ErrorKind::BadRequest,
            ErrorKind::Unauthorized,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::UpstreamDisabled,
            ErrorKind::UpstreamTransient,
            ErrorKind::UpstreamPermanent,
            ErrorKind::UnsupportedVersion,
            ErrorKind::Internal,
        ];
        let mut seen = std::collections::HashSet::new();
        for kind in kinds {
            assert!(seen.insert(kind.code()), "duplicate code {}", kind.code());
            assert_eq!(kind.code(), kind.code().to_ascii_lowercase());
        }
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(ErrorKind::UpstreamTransient.is_retryable());
        assert!(!ErrorKind::UpstreamPermanent.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }
}
