//! Spotify catalog lookups.
//!
//! Uses the Web API with a client-credentials token. Search responses wrap
//! entities in type-named containers (`tracks.items`, `albums.items`);
//! entity objects carry a `type` discriminator. `spotify.link` short links
//! are resolved with a single non-following redirect read, then re-parsed.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::cancel::CancelSignal;
use crate::error::Result;
use crate::links::spotify::DEFAULT_MARKET;
use crate::links::SpotifyLinks;
use crate::models::{EntityKind, ProviderId, ProviderResult};
use crate::sanitize;
use crate::services::auth::ClientCredentialsTokenSource;
use crate::services::http::TransportClient;
use crate::services::json_scan::{all_entities, first_entity, str_field};
use crate::services::lookup::{provider_get, LookupOutcome, ProviderLookup};

pub const API_BASE: &str = "https://api.spotify.com";
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

const MAX_ARTIST_CANDIDATES: usize = 5;

pub struct SpotifyLookup {
    links: SpotifyLinks,
    token: ClientCredentialsTokenSource,
    http: TransportClient,
    api_base: String,
}

impl SpotifyLookup {
    pub fn new(token: ClientCredentialsTokenSource, http: TransportClient) -> Self {
        Self::with_base(token, http, API_BASE)
    }

    pub fn with_base(
        token: ClientCredentialsTokenSource,
        http: TransportClient,
        api_base: &str,
    ) -> Self {
        Self {
            links: SpotifyLinks,
            token,
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str, cancel: &CancelSignal) -> Result<Option<Value>> {
        let auth = self.token.header_value(cancel).await?;
        let url = format!("{}{}", self.api_base, path);
        provider_get(&self.http, ProviderId::Spotify, &url, &auth, cancel).await
    }

    fn is_track(node: &Value) -> bool {
        str_field(node, "type") == "track"
    }

    fn is_album(node: &Value) -> bool {
        str_field(node, "type") == "album"
    }

    fn is_artist(node: &Value) -> bool {
        str_field(node, "type") == "artist"
    }

    fn joined_artists(node: &Value) -> String {
        node.get("artists")
            .and_then(Value::as_array)
            .map(|artists| {
                artists
                    .iter()
                    .map(|a| str_field(a, "name"))
                    .filter(|name| !name.is_empty())
                    .collect::<Vec<_>>()
                    .join(" & ")
            })
            .unwrap_or_default()
    }

    fn first_image(node: &Value) -> String {
        node.get("images")
            .and_then(Value::as_array)
            .and_then(|images| images.first())
            .map(|image| str_field(image, "url").to_string())
            .unwrap_or_default()
    }

    fn track_result(node: &Value, market: &str) -> ProviderResult {
        ProviderResult {
            provider: ProviderId::Spotify,
            artist: Self::joined_artists(node),
            title: str_field(node, "name").to_string(),
            url: str_field(&node["external_urls"], "spotify").to_string(),
            market_region: market.to_string(),
            external_id: str_field(&node["external_ids"], "isrc").to_string(),
            art_url: Self::first_image(&node["album"]),
            is_album: Some(false),
            is_primary: false,
        }
    }

    fn album_result(node: &Value, market: &str) -> ProviderResult {
        ProviderResult {
            provider: ProviderId::Spotify,
            artist: Self::joined_artists(node),
            title: str_field(node, "name").to_string(),
            url: str_field(&node["external_urls"], "spotify").to_string(),
            market_region: market.to_string(),
            external_id: str_field(&node["external_ids"], "upc").to_string(),
            art_url: Self::first_image(node),
            is_album: Some(true),
            is_primary: false,
        }
    }

    async fn track_by_id(&self, market: &str, track_id: &str, cancel: &CancelSignal) -> LookupOutcome {
        let Some(body) = self.get(&self.links.track_path(market, track_id), cancel).await? else {
            return Ok(None);
        };
        Ok(first_entity(&body, &Self::is_track).map(|node| Self::track_result(node, market)))
    }

    async fn album_by_id(&self, market: &str, album_id: &str, cancel: &CancelSignal) -> LookupOutcome {
        let Some(body) = self.get(&self.links.album_path(market, album_id), cancel).await? else {
            return Ok(None);
        };
        Ok(first_entity(&body, &Self::is_album).map(|node| Self::album_result(node, market)))
    }

    /// Albums from `/artists/{id}/albums` are simplified objects without
    /// `external_ids`; matches are re-fetched by id so the UPC/ISRC is
    /// populated for cross-provider matching.
    async fn search_artist_catalog(
        &self,
        artist_id: &str,
        title: &str,
        cancel: &CancelSignal,
    ) -> LookupOutcome {
        let market = DEFAULT_MARKET;
        let Some(albums_body) =
            self.get(&self.links.artist_albums_path(market, artist_id), cancel).await?
        else {
            return Ok(None);
        };
        let albums = all_entities(&albums_body, &Self::is_album);

        for album in &albums {
            if sanitize::album_titles_match(str_field(album, "name"), title) {
                let album_id = str_field(album, "id");
                if let Some(found) = self.album_by_id(market, album_id, cancel).await? {
                    return Ok(Some(found));
                }
            }
        }

        for album in &albums {
            let album_id = str_field(album, "id");
            let Some(tracks_body) =
                self.get(&self.links.album_tracks_path(market, album_id), cancel).await?
            else {
                continue;
            };
            for track in all_entities(&tracks_body, &Self::is_track) {
                if sanitize::song_titles_match(str_field(track, "name"), title) {
                    let track_id = str_field(track, "id");
                    if let Some(found) = self.track_by_id(market, track_id, cancel).await? {
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }

    /// One-hop redirect resolution for `spotify.link` URLs. Fails soft: any
    /// non-redirect response yields an unrecognized parse.
    async fn resolve_short_link(&self, url: &str, cancel: &CancelSignal) -> Option<String> {
        let location = self.http.redirect_location(url, cancel).await?;
        debug!(short = url, resolved = %location, "resolved short link");
        Some(location)
    }
}

#[async_trait]
impl ProviderLookup for SpotifyLookup {
    fn id(&self) -> ProviderId {
        ProviderId::Spotify
    }

    async fn by_isrc(&self, isrc: &str, cancel: &CancelSignal) -> LookupOutcome {
        let path = self.links.isrc_path(DEFAULT_MARKET, isrc);
        let Some(body) = self.get(&path, cancel).await? else {
            return Ok(None);
        };
        Ok(first_entity(&body, &Self::is_track).map(|node| Self::track_result(node, DEFAULT_MARKET)))
    }

    async fn by_upc(&self, upc: &str, cancel: &CancelSignal) -> LookupOutcome {
        let path = self.links.upc_path(DEFAULT_MARKET, upc);
        let Some(body) = self.get(&path, cancel).await? else {
            return Ok(None);
        };
        // The UPC search returns simplified albums; re-fetch for external_ids.
        let Some(album_id) =
            first_entity(&body, &Self::is_album).map(|node| str_field(node, "id").to_string())
        else {
            return Ok(None);
        };
        let full = self.album_by_id(DEFAULT_MARKET, &album_id, cancel).await?;
        Ok(full.map(|mut album| {
            if album.external_id.is_empty() {
                album.external_id = upc.to_string();
            }
            album
        }))
    }

    async fn by_title_artist(&self, title: &str, artist: &str, cancel: &CancelSignal) -> LookupOutcome {
        let path = self.links.artist_search_path(DEFAULT_MARKET, artist);
        let Some(body) = self.get(&path, cancel).await? else {
            return Ok(None);
        };
        let candidates = all_entities(&body, &Self::is_artist);
        if candidates.is_empty() {
            debug!(artist, "no artist candidates");
            return Ok(None);
        }
        for candidate in candidates.into_iter().take(MAX_ARTIST_CANDIDATES) {
            let artist_id = str_field(candidate, "id");
            if artist_id.is_empty() {
                continue;
            }
            if let Some(found) = self.search_artist_catalog(artist_id, title, cancel).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn by_url(&self, url: &str, cancel: &CancelSignal) -> LookupOutcome {
        let mut parsed = self.links.parse(url);
        if !parsed.recognized && self.links.is_short_link(url) {
            if let Some(target) = self.resolve_short_link(url, cancel).await {
                parsed = self.links.parse(&target);
            }
        }
        if !parsed.recognized {
            return Ok(None);
        }
        let result = match parsed.kind {
            EntityKind::Track => self.track_by_id(&parsed.market, &parsed.key, cancel).await?,
            EntityKind::Album => self.album_by_id(&parsed.market, &parsed.key, cancel).await?,
            _ => None,
        };
        Ok(result.map(|mut r| {
            r.is_primary = true;
            if r.market_region.is_empty() {
                r.market_region = DEFAULT_MARKET.to_string();
            }
            r
        }))
    }
}
