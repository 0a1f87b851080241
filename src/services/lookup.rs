//! The common lookup contract every provider implements.
//!
//! Four entry points, all optional-returning: not-found and recoverable
//! remote failures both surface as `Ok(None)`. The only errors that cross
//! this boundary are credential failures (the aggregator then treats the
//! provider as disabled for the request) and cancellation.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::cancel::CancelSignal;
use crate::error::{AppError, Result};
use crate::models::{ProviderId, ProviderResult};
use crate::services::http::TransportClient;

pub type LookupOutcome = Result<Option<ProviderResult>>;

#[async_trait]
pub trait ProviderLookup: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Static capability: providers without identifier search endpoints
    /// return `Ok(None)` from `by_isrc`/`by_upc` without network I/O.
    fn supports_identifier_lookup(&self) -> bool {
        true
    }

    /// Track lookup by ISRC.
    async fn by_isrc(&self, isrc: &str, cancel: &CancelSignal) -> LookupOutcome;

    /// Album lookup by UPC. The identifier is passed to the provider
    /// verbatim; leading zeros are preserved.
    async fn by_upc(&self, upc: &str, cancel: &CancelSignal) -> LookupOutcome;

    /// Search cascade: artist search, then that artist's albums by sanitized
    /// album title, then album tracks by sanitized song title.
    async fn by_title_artist(&self, title: &str, artist: &str, cancel: &CancelSignal)
        -> LookupOutcome;

    /// Resolve a share URL this provider owns. The returned entry carries
    /// `is_primary = true`.
    async fn by_url(&self, url: &str, cancel: &CancelSignal) -> LookupOutcome;
}

/// Authenticated GET at the provider boundary. Transient and malformed
/// failures are logged and suppressed to `Ok(None)`; credential rejections
/// and cancellation propagate.
pub(crate) async fn provider_get(
    http: &TransportClient,
    provider: ProviderId,
    url: &str,
    auth: &str,
    cancel: &CancelSignal,
) -> Result<Option<Value>> {
    match http.get_json(url, Some(auth), cancel).await {
        Ok(response) if response.is_success() => Ok(Some(response.body)),
        Ok(response) if response.status == reqwest::StatusCode::NOT_FOUND => Ok(None),
        Ok(response)
            if matches!(
                response.status,
                reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN
            ) =>
        {
            Err(AppError::AuthUnavailable {
                provider: provider.to_string(),
                message: format!("API rejected credentials: HTTP {}", response.status),
            })
        }
        Ok(response) => {
            warn!(provider = %provider, url, status = %response.status, "unexpected provider status");
            Ok(None)
        }
        Err(AppError::Cancelled) => Err(AppError::Cancelled),
        Err(AppError::ProviderMalformed(message)) => {
            error!(provider = %provider, url, %message, "malformed provider response");
            Ok(None)
        }
        Err(e) => {
            warn!(provider = %provider, url, error = %e, "provider request failed");
            Ok(None)
        }
    }
}
