//! Apple Music share-link recognition and catalog endpoint paths.

use crate::links::{split_link, ParsedLink};
use crate::models::EntityKind;

const HOSTS: [&str; 2] = ["music.apple.com", "geo.music.apple.com"];

/// Storefront used when a link or identifier lookup carries no region.
pub const DEFAULT_STOREFRONT: &str = "us";

/// Recognizes `music.apple.com/{storefront}/{album|song|artist}/{slug}/{id}`
/// share URLs and builds Apple Music API v1 catalog paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppleMusicLinks;

impl AppleMusicLinks {
    pub fn parse(&self, link: &str) -> ParsedLink {
        let Some((host, segments, pairs)) = split_link(link) else {
            return ParsedLink::unknown();
        };
        if !HOSTS.contains(&host.as_str()) {
            return ParsedLink::unknown();
        }

        // Expected shape: [storefront, kind, slug..., id]. The storefront is
        // a two-letter code; links without one start directly at the kind.
        let (storefront, rest) = match segments.first() {
            Some(first) if first.len() == 2 => (first.to_lowercase(), &segments[1..]),
            Some(_) => (String::new(), &segments[..]),
            None => return ParsedLink::unknown(),
        };
        let (Some(kind), Some(id)) = (rest.first(), rest.last()) else {
            return ParsedLink::unknown();
        };
        if rest.len() < 2 || !id.chars().all(|c| c.is_ascii_digit()) {
            return ParsedLink::unknown();
        }

        match kind.as_str() {
            "album" => {
                // An `i` query parameter addresses a track embedded in the
                // album page; the track outranks its container.
                if let Some((_, track_id)) = pairs.iter().find(|(k, _)| k == "i") {
                    if !track_id.is_empty() && track_id.chars().all(|c| c.is_ascii_digit()) {
                        return ParsedLink::new(EntityKind::Track, track_id.clone(), storefront);
                    }
                }
                ParsedLink::new(EntityKind::Album, id.clone(), storefront)
            }
            "song" => ParsedLink::new(EntityKind::Track, id.clone(), storefront),
            "artist" => ParsedLink::new(EntityKind::Artist, id.clone(), storefront),
            _ => ParsedLink::unknown(),
        }
    }

    fn storefront(market: &str) -> String {
        if market.is_empty() {
            DEFAULT_STOREFRONT.to_string()
        } else {
            market.to_lowercase()
        }
    }

    pub fn isrc_path(&self, market: &str, isrc: &str) -> String {
        format!(
            "/v1/catalog/{}/songs?filter[isrc]={}",
            Self::storefront(market),
            urlencoding::encode(isrc)
        )
    }

    pub fn upc_path(&self, market: &str, upc: &str) -> String {
        format!(
            "/v1/catalog/{}/albums?filter[upc]={}",
            Self::storefront(market),
            urlencoding::encode(upc)
        )
    }

    pub fn artist_search_path(&self, market: &str, artist: &str) -> String {
        format!(
            "/v1/catalog/{}/search?types=artists&limit=10&term={}",
            Self::storefront(market),
            urlencoding::encode(artist)
        )
    }

    pub fn artist_albums_path(&self, market: &str, artist_id: &str) -> String {
        format!("/v1/catalog/{}/artists/{}/albums?limit=100", Self::storefront(market), artist_id)
    }

    pub fn artist_tracks_path(&self, market: &str, artist_id: &str) -> String {
        format!("/v1/catalog/{}/artists/{}/view/top-songs", Self::storefront(market), artist_id)
    }

    pub fn album_path(&self, market: &str, album_id: &str) -> String {
        format!("/v1/catalog/{}/albums/{}", Self::storefront(market), album_id)
    }

    pub fn album_tracks_path(&self, market: &str, album_id: &str) -> String {
        format!("/v1/catalog/{}/albums/{}/tracks?limit=300", Self::storefront(market), album_id)
    }

    pub fn track_path(&self, market: &str, track_id: &str) -> String {
        format!("/v1/catalog/{}/songs/{}", Self::storefront(market), track_id)
    }
}
