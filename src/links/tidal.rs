//! Tidal share-link recognition and Open API endpoint paths.

use crate::links::{split_link, ParsedLink};
use crate::models::EntityKind;

const HOSTS: [&str; 2] = ["tidal.com", "listen.tidal.com"];

/// Country code used when a link or identifier lookup carries no region.
pub const DEFAULT_COUNTRY: &str = "US";

/// Recognizes `tidal.com/[browse/]{track|album|artist}/{id}` share URLs and
/// builds Tidal Open API (v2, JSON:API) paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct TidalLinks;

impl TidalLinks {
    pub fn parse(&self, link: &str) -> ParsedLink {
        let Some((host, segments, _)) = split_link(link) else {
            return ParsedLink::unknown();
        };
        if !HOSTS.contains(&host.as_str()) {
            return ParsedLink::unknown();
        }

        let rest = match segments.first() {
            Some(first) if first == "browse" => &segments[1..],
            _ => &segments[..],
        };
        let (Some(kind), Some(id)) = (rest.first(), rest.get(1)) else {
            return ParsedLink::unknown();
        };
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return ParsedLink::unknown();
        }

        match kind.as_str() {
            "track" => ParsedLink::new(EntityKind::Track, id.clone(), ""),
            "album" => ParsedLink::new(EntityKind::Album, id.clone(), ""),
            "artist" => ParsedLink::new(EntityKind::Artist, id.clone(), ""),
            _ => ParsedLink::unknown(),
        }
    }

    fn country(market: &str) -> String {
        if market.is_empty() {
            DEFAULT_COUNTRY.to_string()
        } else {
            market.to_uppercase()
        }
    }

    pub fn isrc_path(&self, market: &str, isrc: &str) -> String {
        format!(
            "/v2/tracks?countryCode={}&include=artists,albums&filter[isrc]={}",
            Self::country(market),
            urlencoding::encode(isrc)
        )
    }

    pub fn upc_path(&self, market: &str, upc: &str) -> String {
        format!(
            "/v2/albums?countryCode={}&include=artists&filter[barcodeId]={}",
            Self::country(market),
            urlencoding::encode(upc)
        )
    }

    pub fn artist_search_path(&self, market: &str, artist: &str) -> String {
        format!(
            "/v2/searchResults/{}?countryCode={}&include=artists",
            urlencoding::encode(artist),
            Self::country(market)
        )
    }

    pub fn artist_albums_path(&self, market: &str, artist_id: &str) -> String {
        format!("/v2/artists/{}?countryCode={}&include=albums", artist_id, Self::country(market))
    }

    pub fn artist_tracks_path(&self, market: &str, artist_id: &str) -> String {
        format!("/v2/artists/{}?countryCode={}&include=tracks", artist_id, Self::country(market))
    }

    pub fn album_path(&self, market: &str, album_id: &str) -> String {
        format!("/v2/albums/{}?countryCode={}&include=artists", album_id, Self::country(market))
    }

    pub fn album_tracks_path(&self, market: &str, album_id: &str) -> String {
        format!("/v2/albums/{}?countryCode={}&include=items", album_id, Self::country(market))
    }

    pub fn track_path(&self, market: &str, track_id: &str) -> String {
        format!(
            "/v2/tracks/{}?countryCode={}&include=artists,albums",
            track_id,
            Self::country(market)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_browse_and_bare_paths() {
        let browse = TidalLinks.parse("https://tidal.com/browse/track/77646168");
        assert_eq!(browse.kind, EntityKind::Track);
        assert_eq!(browse.key, "77646168");

        let bare = TidalLinks.parse("https://tidal.com/album/77646164");
        assert_eq!(bare.kind, EntityKind::Album);

        let listen = TidalLinks.parse("https://listen.tidal.com/artist/10665");
        assert_eq!(listen.kind, EntityKind::Artist);
    }

    #[test]
    fn market_is_absent_from_tidal_links() {
        let parsed = TidalLinks.parse("https://tidal.com/browse/track/77646168");
        assert!(parsed.market.is_empty());
    }

    #[test]
    fn foreign_and_malformed_links_yield_unknown() {
        assert!(!TidalLinks.parse("https://open.spotify.com/track/abc").recognized);
        assert!(!TidalLinks.parse("https://tidal.com/browse/mix/0abc").recognized);
        assert!(!TidalLinks.parse("https://tidal.com/track/notdigits").recognized);
        assert!(!TidalLinks.parse("https://tidal.com").recognized);
    }

    #[test]
    fn endpoint_paths_carry_country_code() {
        assert_eq!(
            TidalLinks.isrc_path("", "GBUM71029604"),
            "/v2/tracks?countryCode=US&include=artists,albums&filter[isrc]=GBUM71029604"
        );
        assert_eq!(
            TidalLinks.upc_path("de", "00602547202307"),
            "/v2/albums?countryCode=DE&include=artists&filter[barcodeId]=00602547202307"
        );
    }
}
