//! # Error Taxonomy
//!
//! One classification shared by every surface. HTTP handlers map a
//! [`CoreError`] to a status code and a `{success:false, error, detail?}`
//! body; the consumer runtime maps it to a retry/DLQ decision.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The wire-visible error kind strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    PayloadTooLarge,
    Conflict,
    Transient,
    Permanent,
    Poison,
    CircuitOpen,
}

impl ErrorKind {
    /// Canonical snake_case name, as used in response bodies and DLQ rows.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Poison => "poison",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

/// Errors crossing component boundaries in the core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Input failed schema/range validation. Never retried.
    #[error("validation failed at {field}: {detail}")]
    Validation { field: String, detail: String },

    /// Missing or revoked credential.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated but out of scope (e.g. miner not in key's site).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Sliding-window quota exceeded.
    #[error("rate limited; retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Body or record count over the configured cap.
    #[error("payload too large: {detail}")]
    PayloadTooLarge { detail: String },

    /// Idempotency/nonce conflict. Safe to treat as success when the
    /// resource is already in the target state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Recoverable infrastructure failure; retry with backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// Unrecoverable failure (schema, foreign key); goes straight to DLQ.
    #[error("permanent: {0}")]
    Permanent(String),

    /// Repeated unexplained failure; parked for operator intervention.
    #[error("poison: {0}")]
    Poison(String),

    /// Downstream circuit is open; stop producing load.
    #[error("circuit open: {0}")]
    CircuitOpen(String),
}

impl CoreError {
    /// The taxonomy bucket for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::Poison(_) => ErrorKind::Poison,
            Self::CircuitOpen(_) => ErrorKind::CircuitOpen,
        }
    }

    /// HTTP status for user-visible surfaces.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Unauthorized => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::PayloadTooLarge { .. } => 413,
            Self::RateLimited { .. } => 429,
            Self::Transient(_) | Self::CircuitOpen(_) => 503,
            Self::Permanent(_) | Self::Poison(_) => 500,
        }
    }

    /// Whether the caller should retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }
}

/// The structured error body every HTTP error response carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        let detail = match err {
            // Never leak internals on auth failures.
            CoreError::Unauthorized => None,
            other => Some(other.to_string()),
        };
        Self {
            success: false,
            error: err.kind(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = CoreError::Validation {
            field: "records[3].hashrate_ghs".into(),
            detail: "expected number".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.http_status(), 400);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(CoreError::Transient("db timeout".into()).is_retryable());
        assert!(CoreError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(!CoreError::Permanent("fk violation".into()).is_retryable());
    }

    #[test]
    fn test_http_statuses() {
        assert_eq!(CoreError::Unauthorized.http_status(), 401);
        assert_eq!(CoreError::Forbidden("scope".into()).http_status(), 403);
        assert_eq!(
            CoreError::PayloadTooLarge { detail: "11MiB".into() }.http_status(),
            413
        );
        assert_eq!(
            CoreError::RateLimited { retry_after_secs: 1 }.http_status(),
            429
        );
        assert_eq!(CoreError::Conflict("replay".into()).http_status(), 409);
    }

    #[test]
    fn test_error_body_hides_auth_detail() {
        let body = ErrorBody::from(&CoreError::Unauthorized);
        assert!(!body.success);
        assert_eq!(body.error, ErrorKind::Unauthorized);
        assert!(body.detail.is_none());

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "unauthorized");
        assert!(json.get("detail").is_none());
    }
}
