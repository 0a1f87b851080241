//! Application error taxonomy.
//!
//! Recoverable provider-side failures (transient HTTP, malformed payloads)
//! are logged and swallowed inside the provider boundary and never cross the
//! public lookup API; the variants here exist for the places that do
//! propagate: startup, auth, and the cache/object-store plumbing.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// No provider enable-set was complete at startup. Fatal.
    #[error("configuration insufficient: {0}")]
    ConfigurationInsufficient(String),

    /// Credentials could not be loaded or parsed (bad PEM, empty key file).
    #[error("auth configuration invalid for {provider}: {message}")]
    AuthConfigInvalid { provider: String, message: String },

    /// The token endpoint stayed unreachable after retries.
    #[error("auth unavailable for {provider}: {message}")]
    AuthUnavailable { provider: String, message: String },

    /// HTTP 5xx, timeout, connect failure, or 429 after retry budget.
    #[error("transient provider failure: {0}")]
    ProviderTransient(String),

    /// Response body did not parse or lacked required fields.
    #[error("malformed provider response: {0}")]
    ProviderMalformed(String),

    /// Cache tier cannot be reached; the facade degrades to pass-through.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Update-in-place raced with record removal; caller evicts and recreates.
    #[error("object store record disappeared: {pointer}")]
    ObjectStoreConflict { pointer: String },

    #[error("object store error: {0}")]
    ObjectStore(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            AppError::ConfigurationInsufficient(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
