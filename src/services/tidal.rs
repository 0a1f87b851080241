//! Tidal catalog lookups.
//!
//! Uses the Tidal Open API (v2), which speaks JSON:API: entities live under
//! `data` with related resources under `included`, cross-referenced through
//! `relationships`. Artist names and album artwork for a track therefore
//! come from the `included` side of the same document.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::error::Result;
use crate::links::tidal::DEFAULT_COUNTRY;
use crate::links::TidalLinks;
use crate::models::{EntityKind, ProviderId, ProviderResult};
use crate::sanitize;
use crate::services::auth::ClientCredentialsTokenSource;
use crate::services::http::TransportClient;
use crate::services::json_scan::{all_entities, first_entity, str_field};
use crate::services::lookup::{provider_get, LookupOutcome, ProviderLookup};

pub const API_BASE: &str = "https://openapi.tidal.com";
pub const TOKEN_URL: &str = "https://auth.tidal.com/v1/oauth2/token";

const MAX_ARTIST_CANDIDATES: usize = 5;

pub struct TidalLookup {
    links: TidalLinks,
    token: ClientCredentialsTokenSource,
    http: TransportClient,
    api_base: String,
}

impl TidalLookup {
    pub fn new(token: ClientCredentialsTokenSource, http: TransportClient) -> Self {
        Self::with_base(token, http, API_BASE)
    }

    pub fn with_base(
        token: ClientCredentialsTokenSource,
        http: TransportClient,
        api_base: &str,
    ) -> Self {
        Self {
            links: TidalLinks,
            token,
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str, cancel: &CancelSignal) -> Result<Option<Value>> {
        let auth = self.token.header_value(cancel).await?;
        let url = format!("{}{}", self.api_base, path);
        provider_get(&self.http, ProviderId::Tidal, &url, &auth, cancel).await
    }

    fn is_track(node: &Value) -> bool {
        str_field(node, "type") == "tracks" && node.get("attributes").is_some()
    }

    fn is_album(node: &Value) -> bool {
        str_field(node, "type") == "albums" && node.get("attributes").is_some()
    }

    fn is_artist(node: &Value) -> bool {
        str_field(node, "type") == "artists" && node.get("attributes").is_some()
    }

    /// Artist display name from the document's `included` resources, joined
    /// with " & " when the entity credits several artists.
    fn artists_from_document(document: &Value) -> String {
        all_entities(document, &Self::is_artist)
            .iter()
            .map(|artist| str_field(&artist["attributes"], "name"))
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(" & ")
    }

    fn share_url(node: &Value, kind: &str) -> String {
        let external = node["attributes"]
            .get("externalLinks")
            .and_then(Value::as_array)
            .and_then(|links| links.first())
            .map(|link| str_field(link, "href").to_string())
            .unwrap_or_default();
        if !external.is_empty() {
            return external;
        }
        format!("https://tidal.com/browse/{}/{}", kind, str_field(node, "id"))
    }

    fn first_image(node: &Value) -> String {
        node["attributes"]
            .get("imageLinks")
            .and_then(Value::as_array)
            .and_then(|links| links.first())
            .map(|link| str_field(link, "href").to_string())
            .unwrap_or_default()
    }

    fn track_result(node: &Value, document: &Value, market: &str) -> ProviderResult {
        let attributes = &node["attributes"];
        let art_url = all_entities(document, &Self::is_album)
            .first()
            .map(|album| Self::first_image(album))
            .unwrap_or_default();
        ProviderResult {
            provider: ProviderId::Tidal,
            artist: Self::artists_from_document(document),
            title: str_field(attributes, "title").to_string(),
            url: Self::share_url(node, "track"),
            market_region: market.to_string(),
            external_id: str_field(attributes, "isrc").to_string(),
            art_url,
            is_album: Some(false),
            is_primary: false,
        }
    }

    fn album_result(node: &Value, document: &Value, market: &str) -> ProviderResult {
        let attributes = &node["attributes"];
        ProviderResult {
            provider: ProviderId::Tidal,
            artist: Self::artists_from_document(document),
            title: str_field(attributes, "title").to_string(),
            url: Self::share_url(node, "album"),
            market_region: market.to_string(),
            external_id: str_field(attributes, "barcodeId").to_string(),
            art_url: Self::first_image(node),
            is_album: Some(true),
            is_primary: false,
        }
    }

    async fn track_by_id(&self, market: &str, track_id: &str, cancel: &CancelSignal) -> LookupOutcome {
        let Some(body) = self.get(&self.links.track_path(market, track_id), cancel).await? else {
            return Ok(None);
        };
        Ok(first_entity(&body, &Self::is_track).map(|node| Self::track_result(node, &body, market)))
    }

    async fn album_by_id(&self, market: &str, album_id: &str, cancel: &CancelSignal) -> LookupOutcome {
        let Some(body) = self.get(&self.links.album_path(market, album_id), cancel).await? else {
            return Ok(None);
        };
        Ok(first_entity(&body, &Self::is_album).map(|node| Self::album_result(node, &body, market)))
    }

    /// Included albums from the artist document sometimes carry their
    /// barcode already; matches without one are re-fetched by id.
    async fn search_artist_catalog(
        &self,
        artist_id: &str,
        title: &str,
        cancel: &CancelSignal,
    ) -> LookupOutcome {
        let market = DEFAULT_COUNTRY;
        let Some(albums_body) =
            self.get(&self.links.artist_albums_path(market, artist_id), cancel).await?
        else {
            return Ok(None);
        };
        let album_ids: Vec<String> = all_entities(&albums_body, &Self::is_album)
            .iter()
            .map(|album| str_field(album, "id").to_string())
            .filter(|id| !id.is_empty())
            .collect();

        for album in all_entities(&albums_body, &Self::is_album) {
            let album_title = str_field(&album["attributes"], "title");
            if sanitize::album_titles_match(album_title, title) {
                let barcode = str_field(&album["attributes"], "barcodeId");
                if !barcode.is_empty() {
                    return Ok(Some(Self::album_result(album, &albums_body, market)));
                }
                let album_id = str_field(album, "id");
                if let Some(found) = self.album_by_id(market, album_id, cancel).await? {
                    return Ok(Some(found));
                }
            }
        }

        for album_id in &album_ids {
            let Some(tracks_body) =
                self.get(&self.links.album_tracks_path(market, album_id), cancel).await?
            else {
                continue;
            };
            for track in all_entities(&tracks_body, &Self::is_track) {
                let track_title = str_field(&track["attributes"], "title");
                if sanitize::song_titles_match(track_title, title) {
                    let isrc = str_field(&track["attributes"], "isrc");
                    let track_id = str_field(track, "id");
                    if !isrc.is_empty() {
                        // Re-fetch anyway: the album-items listing has no
                        // artist resources to name the result from.
                        if let Some(found) = self.track_by_id(market, track_id, cancel).await? {
                            return Ok(Some(found));
                        }
                        return Ok(Some(Self::track_result(track, &tracks_body, market)));
                    }
                    if let Some(found) = self.track_by_id(market, track_id, cancel).await? {
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ProviderLookup for TidalLookup {
    fn id(&self) -> ProviderId {
        ProviderId::Tidal
    }

    async fn by_isrc(&self, isrc: &str, cancel: &CancelSignal) -> LookupOutcome {
        let path = self.links.isrc_path(DEFAULT_COUNTRY, isrc);
        let Some(body) = self.get(&path, cancel).await? else {
            return Ok(None);
        };
        Ok(first_entity(&body, &Self::is_track)
            .map(|node| Self::track_result(node, &body, DEFAULT_COUNTRY)))
    }

    async fn by_upc(&self, upc: &str, cancel: &CancelSignal) -> LookupOutcome {
        let path = self.links.upc_path(DEFAULT_COUNTRY, upc);
        let Some(body) = self.get(&path, cancel).await? else {
            return Ok(None);
        };
        Ok(first_entity(&body, &Self::is_album)
            .map(|node| Self::album_result(node, &body, DEFAULT_COUNTRY)))
    }

    async fn by_title_artist(&self, title: &str, artist: &str, cancel: &CancelSignal) -> LookupOutcome {
        let path = self.links.artist_search_path(DEFAULT_COUNTRY, artist);
        let Some(body) = self.get(&path, cancel).await? else {
            return Ok(None);
        };
        let candidates: Vec<String> = all_entities(&body, &Self::is_artist)
            .iter()
            .map(|artist| str_field(artist, "id").to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if candidates.is_empty() {
            debug!(artist, "no artist candidates");
            return Ok(None);
        }
        for artist_id in candidates.iter().take(MAX_ARTIST_CANDIDATES) {
            if let Some(found) = self.search_artist_catalog(artist_id, title, cancel).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn by_url(&self, url: &str, cancel: &CancelSignal) -> LookupOutcome {
        let parsed = self.links.parse(url);
        if !parsed.recognized {
            return Ok(None);
        }
        let result = match parsed.kind {
            EntityKind::Track => self.track_by_id(DEFAULT_COUNTRY, &parsed.key, cancel).await?,
            EntityKind::Album => self.album_by_id(DEFAULT_COUNTRY, &parsed.key, cancel).await?,
            _ => None,
        };
        Ok(result.map(|mut r| {
            r.is_primary = true;
            r
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn lookup_for(server: &MockServer) -> TidalLookup {
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tidal-token",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
        let token = ClientCredentialsTokenSource::new(
            ProviderId::Tidal,
            &format!("{}/v1/oauth2/token", server.uri()),
            "client",
            "secret",
            TransportClient::with_defaults().unwrap(),
        );
        TidalLookup::with_base(token, TransportClient::with_defaults().unwrap(), &server.uri())
    }

    fn track_document() -> serde_json::Value {
        serde_json::json!({
            "data": [{
                "id": "77646168",
                "type": "tracks",
                "attributes": {
                    "title": "Bohemian Rhapsody",
                    "isrc": "GBUM71029604",
                    "externalLinks": [{"href": "https://tidal.com/browse/track/77646168"}]
                },
                "relationships": {"artists": {"data": [{"id": "10665", "type": "artists"}]}}
            }],
            "included": [
                {"id": "10665", "type": "artists", "attributes": {"name": "Queen"}},
                {"id": "77646164", "type": "albums", "attributes": {
                    "title": "A Night at the Opera",
                    "imageLinks": [{"href": "https://resources.tidal.com/images/cover.jpg"}]
                }}
            ]
        })
    }

    #[tokio::test]
    async fn by_isrc_reads_jsonapi_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/tracks"))
            .and(query_param("filter[isrc]", "GBUM71029604"))
            .respond_with(ResponseTemplate::new(200).set_body_json(track_document()))
            .mount(&server)
            .await;

        let lookup = lookup_for(&server).await;
        let result = lookup
            .by_isrc("GBUM71029604", &CancelSignal::none())
            .await
            .unwrap()
            .expect("track found");
        assert_eq!(result.artist, "Queen");
        assert_eq!(result.title, "Bohemian Rhapsody");
        assert_eq!(result.url, "https://tidal.com/browse/track/77646168");
        assert_eq!(result.art_url, "https://resources.tidal.com/images/cover.jpg");
        assert_eq!(result.market_region, "US");
        assert_eq!(result.is_album, Some(false));
    }

    #[tokio::test]
    async fn by_upc_reads_album_with_barcode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/albums"))
            .and(query_param("filter[barcodeId]", "00602547202307"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "id": "77646164",
                    "type": "albums",
                    "attributes": {
                        "title": "A Night at the Opera",
                        "barcodeId": "00602547202307",
                        "imageLinks": [{"href": "https://resources.tidal.com/images/cover.jpg"}]
                    }
                }],
                "included": [{"id": "10665", "type": "artists", "attributes": {"name": "Queen"}}]
            })))
            .mount(&server)
            .await;

        let lookup = lookup_for(&server).await;
        let result = lookup
            .by_upc("00602547202307", &CancelSignal::none())
            .await
            .unwrap()
            .expect("album found");
        assert_eq!(result.external_id, "00602547202307");
        assert_eq!(result.is_album, Some(true));
        assert_eq!(result.url, "https://tidal.com/browse/album/77646164");
    }

    #[tokio::test]
    async fn by_url_parses_browse_links_and_marks_primary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/tracks/77646168"))
            .respond_with(ResponseTemplate::new(200).set_body_json(track_document()))
            .mount(&server)
            .await;

        let lookup = lookup_for(&server).await;
        let result = lookup
            .by_url("https://tidal.com/browse/track/77646168", &CancelSignal::none())
            .await
            .unwrap()
            .expect("track found");
        assert!(result.is_primary);
    }

    #[tokio::test]
    async fn empty_document_yields_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/tracks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": [], "included": []})),
            )
            .mount(&server)
            .await;

        let lookup = lookup_for(&server).await;
        let result = lookup.by_isrc("INVALID12345", &CancelSignal::none()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn title_artist_cascade_uses_included_albums() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/searchResults/Queen"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"id": "Queen", "type": "searchResults"},
                "included": [{"id": "10665", "type": "artists", "attributes": {"name": "Queen"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/artists/10665"))
            .and(query_param("include", "albums"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"id": "10665", "type": "artists", "attributes": {"name": "Queen"}},
                "included": [{
                    "id": "77646164",
                    "type": "albums",
                    "attributes": {
                        "title": "A Night at the Opera",
                        "barcodeId": "00602547202307",
                        "externalLinks": [{"href": "https://tidal.com/browse/album/77646164"}]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let lookup = lookup_for(&server).await;
        let result = lookup
            .by_title_artist("A Night at the Opera (Deluxe Edition)", "Queen", &CancelSignal::none())
            .await
            .unwrap()
            .expect("album found");
        assert_eq!(result.external_id, "00602547202307");
        assert_eq!(result.is_album, Some(true));
    }
}
