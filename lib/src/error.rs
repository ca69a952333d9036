//! Crate-wide error type and its mapping onto HTTP status codes.
//!
//! Mirrors the error kinds enumerated for the appliance: validation, RBAC,
//! not-found/not-ready, state-machine conflicts, quota, storage inconsistency,
//! processing failures, and OAuth2 errors coded per RFC 6749.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// An RFC 6749 OAuth2 error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuth2ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidScope,
    UnsupportedGrantType,
    UnsupportedResponseType,
    UnauthorizedClient,
}

impl OAuth2ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidScope => "invalid_scope",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::UnauthorizedClient => "unauthorized_client",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl std::fmt::Display for OAuth2ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or semantically invalid input.
    #[error("validation error: {0}")]
    Validation(String),

    /// No principal could be resolved from the request.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A principal was resolved but lacks the required role or scope.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested entity does not exist (or RBAC denial on a GET, which
    /// must not leak existence).
    #[error("not found: {0}")]
    NotFound(String),

    /// The entity exists but the artifact being requested has not finished
    /// processing yet. Distinct from `NotFound` only in message.
    #[error("not ready: {0}")]
    NotReady(String),

    /// A state-machine transition lost a race or is otherwise illegal from
    /// the entity's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Commit would push workspace usage over its configured quota.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A `File` row exists but its bytes could not be located in storage.
    #[error("storage inconsistency: {0}")]
    StorageInconsistency(String),

    /// A background job failed; carries the message recorded on the
    /// `ModelVersion`.
    #[error("processing failure: {0}")]
    Processing(String),

    /// Underlying persistence failure not classified above.
    #[error("database error: {0}")]
    Database(String),

    /// Underlying storage-provider failure not classified above.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An OAuth2 protocol error, coded per RFC 6749.
    #[error("oauth2 error {code}: {description}")]
    OAuth2 {
        code: OAuth2ErrorCode,
        description: String,
    },

    #[error("internal server error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn oauth2(code: OAuth2ErrorCode, description: impl Into<String>) -> Self {
        Self::OAuth2 {
            code,
            description: description.into(),
        }
    }
}

/// Read paths must not leak resource existence to a caller who fails an RBAC
/// check (spec.md §6: "GETs return 404 when RBAC denies, write operations
/// return 403"). Write paths call the RBAC-gated service method directly and
/// let `Forbidden` surface as-is; read paths fold it into `NotFound` with
/// this combinator.
pub trait NotFoundOnForbidden<T> {
    fn or_not_found(self) -> Result<T>;
}

impl<T> NotFoundOnForbidden<T> for Result<T> {
    fn or_not_found(self) -> Result<T> {
        self.map_err(|e| match e {
            Error::Forbidden(_) => Error::NotFound("not found".to_string()),
            other => other,
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Error::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation", "message": msg }),
            ),
            Error::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "unauthorized", "message": msg }),
            ),
            Error::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                json!({ "error": "forbidden", "message": msg }),
            ),
            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "notFound", "message": msg }),
            ),
            Error::NotReady(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "notReady", "message": msg }),
            ),
            Error::Conflict(msg) => (
                StatusCode::CONFLICT,
                json!({ "error": "conflict", "message": msg }),
            ),
            Error::QuotaExceeded(msg) => (
                StatusCode::FORBIDDEN,
                json!({ "error": "quotaExceeded", "message": msg }),
            ),
            Error::StorageInconsistency(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "storageInconsistency", "message": msg }),
            ),
            Error::Processing(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "processingFailure", "message": msg }),
            ),
            Error::Database(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "database", "message": msg }),
            ),
            Error::Storage(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "storage", "message": msg }),
            ),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "config", "message": msg }),
            ),
            Error::OAuth2 { code, description } => (
                code.status(),
                json!({ "error": code.as_str(), "error_description": description }),
            ),
            Error::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal", "message": "internal error" }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        Error::Database(e.to_string())
    }
}
