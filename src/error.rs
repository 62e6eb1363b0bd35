use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Failures surfaced by the call lifecycle operations.  HTTP mapping lives in the
/// `IntoResponse` impl below so the engine never deals in status codes.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid call status: {0}")]
    InvalidStatus(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("access denied to this {0}")]
    Forbidden(&'static str),
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error("voice provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CallError {
    pub fn code(&self) -> &'static str {
        match self {
            CallError::Validation(_) => "VALIDATION_ERROR",
            CallError::InvalidStatus(_) => "INVALID_STATUS",
            CallError::NotFound(_) => "NOT_FOUND",
            CallError::Forbidden(_) => "FORBIDDEN",
            CallError::InvalidSignature => "INVALID_SIGNATURE",
            CallError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            CallError::ProviderUnavailable(_) => "PROVIDER_ERROR",
            CallError::Persistence(_) => "DATABASE_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CallError::Validation(_)
            | CallError::InvalidStatus(_)
            | CallError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            CallError::InvalidSignature => StatusCode::UNAUTHORIZED,
            CallError::Forbidden(_) => StatusCode::FORBIDDEN,
            CallError::NotFound(_) => StatusCode::NOT_FOUND,
            CallError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            CallError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CallError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error=%self, "request failed");
        }
        // Storage details stay in the logs.
        let message = match &self {
            CallError::Persistence(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        let body = json!({ "code": self.code(), "message": message });
        (status, Json(body)).into_response()
    }
}

/// Failures reported by a voice provider implementation.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("provider request failed: {0}")]
    Unavailable(String),
    #[error("provider has no record of {0}")]
    NotFound(String),
}

impl From<ProviderError> for CallError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::InvalidSignature => CallError::InvalidSignature,
            ProviderError::MalformedPayload(msg) => CallError::MalformedPayload(msg),
            ProviderError::Unavailable(msg) => CallError::ProviderUnavailable(msg),
            ProviderError::NotFound(what) => CallError::NotFound(what),
        }
    }
}

/// Failures reported by a `CallStore`.  `NotFound` is kept apart from the rest so callers
/// can tell a missing row from a broken database.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// A unique key (call id or vendor session id) is already taken.
    #[error("{0} already exists")]
    Conflict(String),
}

impl From<StoreError> for CallError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => CallError::NotFound(what),
            other => CallError::Persistence(other.to_string()),
        }
    }
}

/// Startup failures; these end the process.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("provider setup error: {0}")]
    Provider(#[from] ProviderError),
    #[error("server error: {0}")]
    Server(#[from] hyper::Error),
    #[error("logging setup error: {0}")]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),
}
