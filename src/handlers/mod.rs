//! HTTP handlers: the thin adapter between the router and the lookup core.
//!
//! The text path streams newline-delimited JSON so consumers see each
//! unified result as soon as its fan-out finishes; identifier paths return
//! a single JSON document or 404.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cancel::CancelSignal;
use crate::models::{LookupRecord, RecordEntry, UnifiedResult};
use crate::AppState;

/// Wire shape for one unified result.
#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub results: Vec<RecordEntry>,
    pub links: Vec<String>,
    #[serde(rename = "lookedUpAt")]
    pub looked_up_at: chrono::DateTime<chrono::Utc>,
}

impl From<UnifiedResult> for LookupResponse {
    fn from(unified: UnifiedResult) -> Self {
        let record = LookupRecord::from_unified(&unified);
        Self {
            results: record.results,
            links: unified.links,
            looked_up_at: record.looked_up_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TextQuery {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TitleArtistQuery {
    pub title: String,
    pub artist: String,
}

/// `GET /api/v1/lookup?text=` — NDJSON stream of unified results.
pub async fn lookup_text_handler(
    State(state): State<AppState>,
    Query(query): Query<TextQuery>,
) -> Response {
    let rx = state.facade.lookup_by_text(&query.text, CancelSignal::none());
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let unified = rx.recv().await?;
        let mut line = serde_json::to_vec(&LookupResponse::from(unified)).unwrap_or_default();
        line.push(b'\n');
        Some((Ok::<_, std::convert::Infallible>(line), rx))
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// `GET /api/v1/lookup/title-artist?title=&artist=`
pub async fn lookup_title_artist_handler(
    State(state): State<AppState>,
    Query(query): Query<TitleArtistQuery>,
) -> Response {
    let found = state
        .facade
        .lookup_by_title_artist(&query.title, &query.artist, &CancelSignal::none())
        .await;
    optional_response(found)
}

/// `GET /api/v1/lookup/isrc/{isrc}`
pub async fn lookup_isrc_handler(
    State(state): State<AppState>,
    Path(isrc): Path<String>,
) -> Response {
    let found = state.facade.lookup_by_isrc(&isrc, &CancelSignal::none()).await;
    optional_response(found)
}

/// `GET /api/v1/lookup/upc/{upc}`
pub async fn lookup_upc_handler(
    State(state): State<AppState>,
    Path(upc): Path<String>,
) -> Response {
    let found = state.facade.lookup_by_upc(&upc, &CancelSignal::none()).await;
    optional_response(found)
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "providers": state.enabled_providers,
        "cache": state.facade.cache_enabled(),
    }))
}

fn optional_response(found: Option<UnifiedResult>) -> Response {
    match found {
        Some(unified) => Json(LookupResponse::from(unified)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Not Found", "message": "no provider matched the input"})),
        )
            .into_response(),
    }
}
