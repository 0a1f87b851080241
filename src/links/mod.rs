//! Provider link recognition and API endpoint construction.
//!
//! Parsers are total and never suspend: any input they do not own yields an
//! unrecognized [`ParsedLink`]. Short-link redirect resolution needs network
//! I/O and therefore lives in the provider lookup services, which re-parse
//! the redirect target.

pub mod apple_music;
pub mod spotify;
pub mod tidal;

use std::sync::OnceLock;

use regex::Regex;

use crate::models::EntityKind;

pub use apple_music::AppleMusicLinks;
pub use spotify::SpotifyLinks;
pub use tidal::TidalLinks;

/// Outcome of parsing one candidate link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    pub kind: EntityKind,
    /// Provider-native entity id; opaque to callers.
    pub key: String,
    /// Storefront or country hint from the URL; empty when absent.
    pub market: String,
    pub recognized: bool,
}

impl ParsedLink {
    pub fn unknown() -> Self {
        Self {
            kind: EntityKind::Unknown,
            key: String::new(),
            market: String::new(),
            recognized: false,
        }
    }

    fn new(kind: EntityKind, key: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            market: market.into(),
            recognized: true,
        }
    }
}

/// Extract all `http(s)://` substrings from free-form text, preserving order.
/// Permissive by design; the per-provider parsers reject what they do not own.
pub fn extract_links(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("link regex"));
    re.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', '!', '?', ')', ']']).to_string())
        .collect()
}

/// Canonical cache key for a link: trimmed, scheme and trailing slash
/// stripped, lowercased.
pub fn normalize_link(link: &str) -> String {
    let trimmed = link.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    without_scheme.trim_end_matches('/').to_lowercase()
}

/// Split a URL into (host, path segments, query pairs) without allocating a
/// full URL parser. Host comparison downstream is case-insensitive.
pub(crate) fn split_link(link: &str) -> Option<(String, Vec<String>, Vec<(String, String)>)> {
    let trimmed = link.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))?;
    let (location, query) = match rest.split_once('?') {
        Some((location, query)) => (location, query),
        None => (rest, ""),
    };
    let location = location.split('#').next().unwrap_or(location);
    let mut parts = location.split('/');
    let host = parts.next()?.to_lowercase();
    if host.is_empty() {
        return None;
    }
    let segments: Vec<String> = parts.filter(|s| !s.is_empty()).map(str::to_string).collect();
    let pairs = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (
                k.to_string(),
                urlencoding::decode(v).map(|v| v.into_owned()).unwrap_or_else(|_| v.to_string()),
            ),
            None => (pair.to_string(), String::new()),
        })
        .collect();
    Some((host, segments, pairs))
}
