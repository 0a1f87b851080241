//! Credential sources for provider APIs.
//!
//! Two shapes cover every configured provider: an ES256 JWT source for
//! developer-token APIs (Apple Music) and an OAuth client-credentials source
//! for token-endpoint APIs (Spotify, Tidal). Both cache the minted token and
//! serialize refresh so concurrent callers share one round-trip.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::error::{AppError, Result};
use crate::models::ProviderId;
use crate::services::http::TransportClient;

/// Tokens are reissued this long before nominal expiry.
const EXPIRY_MARGIN_SECS: i64 = 30;

#[derive(Debug, Clone)]
struct CachedToken {
    header_value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at > Utc::now() + ChronoDuration::seconds(EXPIRY_MARGIN_SECS)
    }
}

#[derive(Debug, Serialize)]
struct DeveloperTokenClaims {
    iss: String,
    iat: i64,
    exp: i64,
}

/// Self-signed ES256 developer tokens from a PEM-encoded P-256 key.
///
/// Signing is cheap, so tokens are short-lived (1 hour) and reissued from a
/// small cache rather than per request.
pub struct JwtTokenSource {
    provider: ProviderId,
    team_id: String,
    key_id: String,
    encoding_key: EncodingKey,
    cached: RwLock<Option<CachedToken>>,
}

impl JwtTokenSource {
    pub fn new(provider: ProviderId, team_id: &str, key_id: &str, pem: &str) -> Result<Self> {
        if pem.trim().is_empty() {
            return Err(AppError::AuthConfigInvalid {
                provider: provider.to_string(),
                message: "private key is empty".to_string(),
            });
        }
        let encoding_key =
            EncodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| AppError::AuthConfigInvalid {
                provider: provider.to_string(),
                message: format!("parsing EC private key: {e}"),
            })?;
        Ok(Self {
            provider,
            team_id: team_id.to_string(),
            key_id: key_id.to_string(),
            encoding_key,
            cached: RwLock::new(None),
        })
    }

    /// Authorization header value (`Bearer <jwt>`).
    pub async fn header_value(&self) -> Result<String> {
        {
            let cache = self.cached.read().await;
            if let Some(token) = cache.as_ref().filter(|t| t.is_fresh()) {
                return Ok(token.header_value.clone());
            }
        }

        let now = Utc::now();
        let expires_at = now + ChronoDuration::hours(1);
        let claims = DeveloperTokenClaims {
            iss: self.team_id.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let header = Header {
            alg: Algorithm::ES256,
            kid: Some(self.key_id.clone()),
            ..Default::default()
        };
        let token = encode(&header, &claims, &self.encoding_key).map_err(|e| {
            AppError::AuthConfigInvalid {
                provider: self.provider.to_string(),
                message: format!("signing developer token: {e}"),
            }
        })?;

        let cached = CachedToken {
            header_value: format!("Bearer {token}"),
            expires_at,
        };
        let header_value = cached.header_value.clone();
        *self.cached.write().await = Some(cached);
        debug!(provider = %self.provider, "minted developer token");
        Ok(header_value)
    }
}

/// OAuth client-credentials grant against a token endpoint.
///
/// The cached token is reused until shortly before `expires_in`; refresh
/// runs under a single-flight mutex so concurrent callers during expiry
/// share one round-trip. Reads of a still-fresh token take only the read
/// half of the cache lock.
pub struct ClientCredentialsTokenSource {
    provider: ProviderId,
    token_url: String,
    client_id: String,
    client_secret: String,
    http: TransportClient,
    cached: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl ClientCredentialsTokenSource {
    pub fn new(
        provider: ProviderId,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        http: TransportClient,
    ) -> Self {
        Self {
            provider,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            http,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// Authorization header value (`Bearer <access token>`).
    pub async fn header_value(&self, cancel: &CancelSignal) -> Result<String> {
        {
            let cache = self.cached.read().await;
            if let Some(token) = cache.as_ref().filter(|t| t.is_fresh()) {
                return Ok(token.header_value.clone());
            }
        }

        let _flight = self.refresh.lock().await;
        // Another caller may have refreshed while we waited on the mutex.
        {
            let cache = self.cached.read().await;
            if let Some(token) = cache.as_ref().filter(|t| t.is_fresh()) {
                return Ok(token.header_value.clone());
            }
        }

        let token = self.fetch_token(cancel).await?;
        let header_value = token.header_value.clone();
        *self.cached.write().await = Some(token);
        Ok(header_value)
    }

    async fn fetch_token(&self, cancel: &CancelSignal) -> Result<CachedToken> {
        let basic = format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", self.client_id, self.client_secret))
        );
        let response = self
            .http
            .post_form_with_retry(
                &self.token_url,
                &[("grant_type", "client_credentials")],
                Some(&basic),
                cancel,
            )
            .await
            .map_err(|e| match e {
                AppError::Cancelled => AppError::Cancelled,
                other => AppError::AuthUnavailable {
                    provider: self.provider.to_string(),
                    message: other.to_string(),
                },
            })?;

        if matches!(
            response.status,
            reqwest::StatusCode::BAD_REQUEST
                | reqwest::StatusCode::UNAUTHORIZED
                | reqwest::StatusCode::FORBIDDEN
        ) {
            return Err(AppError::AuthConfigInvalid {
                provider: self.provider.to_string(),
                message: format!("token endpoint rejected credentials: HTTP {}", response.status),
            });
        }
        if !response.is_success() {
            return Err(AppError::AuthUnavailable {
                provider: self.provider.to_string(),
                message: format!("token endpoint returned HTTP {}", response.status),
            });
        }

        let access_token = response.body["access_token"].as_str().unwrap_or_default();
        let expires_in = response.body["expires_in"].as_i64().unwrap_or(0);
        if access_token.is_empty() || expires_in <= 0 {
            warn!(provider = %self.provider, "token endpoint returned unusable payload");
            return Err(AppError::AuthUnavailable {
                provider: self.provider.to_string(),
                message: "token response missing access_token/expires_in".to_string(),
            });
        }

        debug!(provider = %self.provider, expires_in, "refreshed access token");
        Ok(CachedToken {
            header_value: format!("Bearer {access_token}"),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
        })
    }
}
