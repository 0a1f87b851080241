use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sanitize;

/// Streaming catalogs the bridge can translate between.
///
/// Declaration order is the stable iteration order for provider entries in a
/// [`UnifiedResult`]; presentation consumers rely on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProviderId {
    #[serde(rename = "appleMusic")]
    AppleMusic,
    #[serde(rename = "spotify")]
    Spotify,
    #[serde(rename = "tidal")]
    Tidal,
}

impl ProviderId {
    /// All providers in registry order.
    pub const ALL: [ProviderId; 3] = [ProviderId::AppleMusic, ProviderId::Spotify, ProviderId::Tidal];

    /// Short stable name used in persisted records.
    pub fn short_name(&self) -> &'static str {
        match self {
            ProviderId::AppleMusic => "appleMusic",
            ProviderId::Spotify => "spotify",
            ProviderId::Tidal => "tidal",
        }
    }

    pub fn from_short_name(name: &str) -> Option<Self> {
        match name {
            "appleMusic" => Some(ProviderId::AppleMusic),
            "spotify" => Some(ProviderId::Spotify),
            "tidal" => Some(ProviderId::Tidal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Kind of catalog entity a link points at.
///
/// Only tracks and albums are first-class in lookups; artists appear as an
/// intermediate step of the title/artist search cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Track,
    Album,
    Artist,
    Unknown,
}

impl EntityKind {
    pub fn is_album(&self) -> Option<bool> {
        match self {
            EntityKind::Track => Some(false),
            EntityKind::Album => Some(true),
            _ => None,
        }
    }
}

/// One provider's view of one recording or release.
///
/// Immutable after construction except for [`ProviderResult::is_primary`],
/// which the aggregator sets when wrapping the entry that matched the
/// user-supplied input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: ProviderId,
    /// Display artist; multiple artists are joined with " & ".
    pub artist: String,
    pub title: String,
    /// Canonical share URL.
    pub url: String,
    /// ISO 3166-1 alpha-2 region or provider storefront; empty when unknown.
    pub market_region: String,
    /// ISRC for tracks, UPC for albums; empty when the provider omits it.
    pub external_id: String,
    pub art_url: String,
    /// None when the provider response did not say either way.
    pub is_album: Option<bool>,
    pub is_primary: bool,
}

impl ProviderResult {
    /// Whether two results describe the same underlying entity, ignoring the
    /// primary flag. Used for aggregation-level deduplication.
    pub fn same_entity(&self, other: &ProviderResult) -> bool {
        if self.provider != other.provider {
            return false;
        }
        if !self.url.is_empty() && self.url == other.url {
            return true;
        }
        if !self.external_id.is_empty() && self.external_id == other.external_id {
            return true;
        }
        sanitize::eq_ignore_case(&self.title, &other.title)
            && sanitize::eq_ignore_case(&self.artist, &other.artist)
    }

    /// Whether `other` is the same recording/release seen from any provider:
    /// equal non-empty external id, or sanitized title+artist equality.
    pub fn matches_cross_provider(&self, other: &ProviderResult) -> bool {
        if !self.external_id.is_empty() && self.external_id == other.external_id {
            return true;
        }
        sanitize::eq_ignore_case(&self.title, &other.title)
            && sanitize::eq_ignore_case(&self.artist, &other.artist)
    }
}

/// Equivalent entries for one recording or release across every provider that
/// answered, plus the input links that produced it.
///
/// Invariants: at most one entry per provider, at most one entry with
/// `is_primary = true`, entries iterate in [`ProviderId`] declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedResult {
    pub entries: BTreeMap<ProviderId, ProviderResult>,
    /// Input links that resolved to this result, in observation order.
    /// Never persisted to the object store.
    pub links: Vec<String>,
    pub looked_up_at: Option<DateTime<Utc>>,
}

impl UnifiedResult {
    /// Seed a result from the entry that matched the user-supplied input.
    pub fn from_primary(mut primary: ProviderResult) -> Self {
        primary.is_primary = true;
        let mut entries = BTreeMap::new();
        entries.insert(primary.provider, primary);
        Self {
            entries,
            links: Vec::new(),
            looked_up_at: Some(Utc::now()),
        }
    }

    pub fn primary(&self) -> Option<&ProviderResult> {
        self.entries.values().find(|r| r.is_primary)
    }

    /// Attach a secondary entry. A provider already present wins; the primary
    /// flag on the incoming entry is cleared.
    pub fn attach(&mut self, mut entry: ProviderResult) {
        entry.is_primary = false;
        self.entries.entry(entry.provider).or_insert(entry);
    }

    pub fn contains_provider(&self, provider: ProviderId) -> bool {
        self.entries.contains_key(&provider)
    }

    /// Record an input link, preserving first-seen order without duplicates.
    pub fn push_link(&mut self, link: &str) {
        if !self.links.iter().any(|l| l == link) {
            self.links.push(link.to_string());
        }
    }

    /// Duplicate detection: two unified results are the same when they share
    /// at least one provider entry describing the same entity.
    pub fn overlaps(&self, entry: &ProviderResult) -> bool {
        self.entries.values().any(|r| r.same_entity(entry))
    }
}
