//! songbridge — music link translation service.
//!
//! Given free-form text containing streaming links, or an ISRC/UPC/title
//! identifier, resolves the equivalent track or album on every configured
//! provider and returns one unified record per underlying recording.
//! Results are cached through a local SQLite link index backed by a durable
//! Bluesky PDS record store.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod cancel;
pub mod config;
pub mod error;
pub mod handlers;
pub mod links;
pub mod models;
pub mod sanitize;
pub mod services;

pub use config::{AppConfig, Cli};
pub use error::{AppError, Result};

use services::{
    Aggregator, AppleMusicLookup, CacheFacade, CacheIndex, CacheTier, ClientCredentialsTokenSource,
    JwtTokenSource, ObjectStore, ProviderLookup, RetryPolicy, SpotifyLookup, TidalLookup,
    TransportClient,
};

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<CacheFacade>,
    pub enabled_providers: Vec<&'static str>,
}

/// Build the lookup pipeline from configuration: provider registry,
/// aggregator, and (when the object store is configured) the cache tier.
pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    let http = TransportClient::new(RetryPolicy::default())?;

    let mut providers: Vec<Arc<dyn ProviderLookup>> = Vec::new();
    if let Some(apple) = &config.apple {
        let token = JwtTokenSource::new(
            models::ProviderId::AppleMusic,
            &apple.team_id,
            &apple.key_id,
            &apple.private_key,
        )?;
        providers.push(Arc::new(AppleMusicLookup::new(token, http.clone())));
    }
    if let Some(spotify) = &config.spotify {
        let token = ClientCredentialsTokenSource::new(
            models::ProviderId::Spotify,
            services::spotify::TOKEN_URL,
            &spotify.client_id,
            &spotify.client_secret,
            http.clone(),
        );
        providers.push(Arc::new(SpotifyLookup::new(token, http.clone())));
    }
    if let Some(tidal) = &config.tidal {
        let token = ClientCredentialsTokenSource::new(
            models::ProviderId::Tidal,
            services::tidal::TOKEN_URL,
            &tidal.client_id,
            &tidal.client_secret,
            http.clone(),
        );
        providers.push(Arc::new(TidalLookup::new(token, http.clone())));
    }

    let mut aggregator =
        Aggregator::new(providers).with_parallel_id_lookup(config.parallel_id_lookup);
    if let Some(cap) = config.lookup_concurrency {
        aggregator = aggregator.with_concurrency_cap(cap);
    }
    let aggregator = Arc::new(aggregator);

    let tier = match &config.bluesky {
        Some(bluesky) => {
            // Object store traffic gets a wider total budget than provider
            // lookups.
            let store_http = TransportClient::new(RetryPolicy {
                total_timeout: std::time::Duration::from_secs(30),
                ..RetryPolicy::default()
            })?;
            match CacheIndex::open(&config.cache_db_path).await {
                Ok(index) => {
                    let store = Arc::new(ObjectStore::new(
                        store_http,
                        &bluesky.pds_url,
                        &bluesky.identifier,
                        &bluesky.password,
                    ));
                    info!(db = %config.cache_db_path, days = config.cache_days, "cache tier enabled");
                    Some(CacheTier {
                        index,
                        store,
                        window: chrono::Duration::days(config.cache_days),
                    })
                }
                Err(e) => {
                    // Lookups still work without the cache tier.
                    let e = AppError::CacheUnavailable(e.to_string());
                    warn!(db = %config.cache_db_path, error = %e, "cache disabled, degrading to pass-through");
                    None
                }
            }
        }
        None => {
            info!("no object store configured, running without cache");
            None
        }
    };

    Ok(AppState {
        facade: Arc::new(CacheFacade::new(aggregator, tier)),
        enabled_providers: config.enabled_providers(),
    })
}

/// Assemble the HTTP router over the lookup core.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/lookup", get(handlers::lookup_text_handler))
        .route("/lookup/title-artist", get(handlers::lookup_title_artist_handler))
        .route("/lookup/isrc/:isrc", get(handlers::lookup_isrc_handler))
        .route("/lookup/upc/:upc", get(handlers::lookup_upc_handler));

    Router::new()
        .route("/health", get(handlers::health_handler))
        .nest("/api/v1", api)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
