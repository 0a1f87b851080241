//! Spotify share-link recognition and Web API endpoint paths.

use crate::links::{split_link, ParsedLink};
use crate::models::EntityKind;

const HOST: &str = "open.spotify.com";

/// Hostname of Spotify's short-link redirector. Resolution requires a network
/// round-trip and is handled by the lookup service, not the parser.
pub const SHORT_LINK_HOST: &str = "spotify.link";

/// Market used when a link carries no `intl-xx` hint.
pub const DEFAULT_MARKET: &str = "US";

/// Recognizes `open.spotify.com/{track|album|artist}/{id}` share URLs
/// (optionally prefixed with an `intl-xx` locale segment) and builds Spotify
/// Web API paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpotifyLinks;

impl SpotifyLinks {
    pub fn parse(&self, link: &str) -> ParsedLink {
        let Some((host, segments, pairs)) = split_link(link) else {
            return ParsedLink::unknown();
        };
        if host != HOST {
            return ParsedLink::unknown();
        }

        // `intl-de` style segments carry the user's locale, not the entity.
        let (market, rest) = match segments.first() {
            Some(first) if first.starts_with("intl-") => (
                first.trim_start_matches("intl-").to_uppercase(),
                &segments[1..],
            ),
            _ => (String::new(), &segments[..]),
        };
        let (Some(kind), Some(id)) = (rest.first(), rest.get(1)) else {
            return ParsedLink::unknown();
        };
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return ParsedLink::unknown();
        }

        match kind.as_str() {
            "track" => ParsedLink::new(EntityKind::Track, id.clone(), market),
            "album" => {
                // `highlight=spotify:track:<id>` marks a track embedded in an
                // album page; the track outranks its container.
                if let Some((_, highlight)) = pairs.iter().find(|(k, _)| k == "highlight") {
                    if let Some(track_id) = highlight.strip_prefix("spotify:track:") {
                        if !track_id.is_empty() && track_id.chars().all(|c| c.is_ascii_alphanumeric()) {
                            return ParsedLink::new(EntityKind::Track, track_id, market);
                        }
                    }
                }
                ParsedLink::new(EntityKind::Album, id.clone(), market)
            }
            "artist" => ParsedLink::new(EntityKind::Artist, id.clone(), market),
            _ => ParsedLink::unknown(),
        }
    }

    /// Whether the link points at the short-link redirector and needs a
    /// redirect resolution round-trip before parsing.
    pub fn is_short_link(&self, link: &str) -> bool {
        matches!(split_link(link), Some((host, _, _)) if host == SHORT_LINK_HOST)
    }

    fn market(market: &str) -> String {
        if market.is_empty() {
            DEFAULT_MARKET.to_string()
        } else {
            market.to_uppercase()
        }
    }

    pub fn isrc_path(&self, market: &str, isrc: &str) -> String {
        format!(
            "/v1/search?type=track&limit=1&market={}&q={}",
            Self::market(market),
            urlencoding::encode(&format!("isrc:{isrc}"))
        )
    }

    pub fn upc_path(&self, market: &str, upc: &str) -> String {
        format!(
            "/v1/search?type=album&limit=1&market={}&q={}",
            Self::market(market),
            urlencoding::encode(&format!("upc:{upc}"))
        )
    }

    pub fn artist_search_path(&self, market: &str, artist: &str) -> String {
        format!(
            "/v1/search?type=artist&limit=10&market={}&q={}",
            Self::market(market),
            urlencoding::encode(artist)
        )
    }

    pub fn artist_albums_path(&self, market: &str, artist_id: &str) -> String {
        format!(
            "/v1/artists/{}/albums?include_groups=album,single&limit=50&market={}",
            artist_id,
            Self::market(market)
        )
    }

    pub fn artist_tracks_path(&self, market: &str, artist_id: &str) -> String {
        format!("/v1/artists/{}/top-tracks?market={}", artist_id, Self::market(market))
    }

    pub fn album_path(&self, market: &str, album_id: &str) -> String {
        format!("/v1/albums/{}?market={}", album_id, Self::market(market))
    }

    pub fn album_tracks_path(&self, market: &str, album_id: &str) -> String {
        format!("/v1/albums/{}/tracks?limit=50&market={}", album_id, Self::market(market))
    }

    pub fn track_path(&self, market: &str, track_id: &str) -> String {
        format!("/v1/tracks/{}?market={}", track_id, Self::market(market))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_album_artist_links() {
        let track = SpotifyLinks.parse("https://open.spotify.com/track/4u7EnebtmKWzUH433cf5Qv");
        assert_eq!(track.kind, EntityKind::Track);
        assert_eq!(track.key, "4u7EnebtmKWzUH433cf5Qv");
        assert!(track.market.is_empty());

        let album = SpotifyLinks.parse("https://open.spotify.com/album/1GbtB4zTqAsyfZEsm1RZfx");
        assert_eq!(album.kind, EntityKind::Album);

        let artist = SpotifyLinks.parse("https://open.spotify.com/artist/1dfeR4HaWDbWqFHLkxsg1d");
        assert_eq!(artist.kind, EntityKind::Artist);
    }

    #[test]
    fn intl_segment_becomes_market_hint() {
        let parsed = SpotifyLinks.parse("https://open.spotify.com/intl-de/track/4u7EnebtmKWzUH433cf5Qv");
        assert_eq!(parsed.kind, EntityKind::Track);
        assert_eq!(parsed.market, "DE");
    }

    #[test]
    fn highlighted_track_outranks_album_container() {
        let parsed = SpotifyLinks.parse(
            "https://open.spotify.com/album/1GbtB4zTqAsyfZEsm1RZfx?highlight=spotify%3Atrack%3A4u7EnebtmKWzUH433cf5Qv",
        );
        assert_eq!(parsed.kind, EntityKind::Track);
        assert_eq!(parsed.key, "4u7EnebtmKWzUH433cf5Qv");
    }

    #[test]
    fn short_links_are_flagged_not_parsed() {
        assert!(SpotifyLinks.is_short_link("https://spotify.link/AbCdEf"));
        assert!(!SpotifyLinks.parse("https://spotify.link/AbCdEf").recognized);
    }

    #[test]
    fn foreign_and_malformed_links_yield_unknown() {
        assert!(!SpotifyLinks.parse("https://music.apple.com/us/album/x/1").recognized);
        assert!(!SpotifyLinks.parse("https://open.spotify.com/playlist/xyz").recognized);
        assert!(!SpotifyLinks.parse("https://open.spotify.com/track/").recognized);
    }

    #[test]
    fn identifier_queries_are_encoded() {
        assert_eq!(
            SpotifyLinks.isrc_path("", "GBUM71029604"),
            "/v1/search?type=track&limit=1&market=US&q=isrc%3AGBUM71029604"
        );
        assert_eq!(
            SpotifyLinks.upc_path("de", "00602547202307"),
            "/v1/search?type=album&limit=1&market=DE&q=upc%3A00602547202307"
        );
    }
}
