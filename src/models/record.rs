use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::provider::{ProviderId, ProviderResult, UnifiedResult};

/// Durable record schema for one unified lookup, as written to the object
/// store. Input links are deliberately absent: they live only in the local
/// cache index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupRecord {
    pub results: Vec<RecordEntry>,
    #[serde(rename = "lookedUpAt")]
    pub looked_up_at: DateTime<Utc>,
}

/// One provider entry in the persisted record.
///
/// `provider` is the short stable name; readers skip entries whose provider
/// they do not recognize rather than rejecting the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordEntry {
    pub provider: String,
    pub artist: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "marketRegion", default)]
    pub market_region: String,
    #[serde(rename = "externalId", default, skip_serializing_if = "String::is_empty")]
    pub external_id: String,
    #[serde(rename = "artUrl", default, skip_serializing_if = "String::is_empty")]
    pub art_url: String,
    #[serde(rename = "isAlbum", default, skip_serializing_if = "Option::is_none")]
    pub is_album: Option<bool>,
    #[serde(rename = "isPrimary", default)]
    pub is_primary: bool,
}

impl LookupRecord {
    pub fn from_unified(unified: &UnifiedResult) -> Self {
        Self {
            results: unified
                .entries
                .values()
                .map(|entry| RecordEntry {
                    provider: entry.provider.short_name().to_string(),
                    artist: entry.artist.clone(),
                    title: entry.title.clone(),
                    url: entry.url.clone(),
                    market_region: entry.market_region.clone(),
                    external_id: entry.external_id.clone(),
                    art_url: entry.art_url.clone(),
                    is_album: entry.is_album,
                    is_primary: entry.is_primary,
                })
                .collect(),
            looked_up_at: unified.looked_up_at.unwrap_or_else(Utc::now),
        }
    }

    /// Rehydrate a unified result. Entries naming providers this build does
    /// not know are skipped.
    pub fn into_unified(self) -> UnifiedResult {
        let mut unified = UnifiedResult {
            looked_up_at: Some(self.looked_up_at),
            ..Default::default()
        };
        for entry in self.results {
            let Some(provider) = ProviderId::from_short_name(&entry.provider) else {
                tracing::debug!(provider = %entry.provider, "skipping unknown provider in stored record");
                continue;
            };
            let result = ProviderResult {
                provider,
                artist: entry.artist,
                title: entry.title,
                url: entry.url,
                market_region: entry.market_region,
                external_id: entry.external_id,
                art_url: entry.art_url,
                is_album: entry.is_album,
                is_primary: entry.is_primary,
            };
            unified.entries.insert(provider, result);
        }
        unified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_unified() -> UnifiedResult {
        let mut entries = BTreeMap::new();
        entries.insert(
            ProviderId::Spotify,
            ProviderResult {
                provider: ProviderId::Spotify,
                artist: "Queen".to_string(),
                title: "Bohemian Rhapsody".to_string(),
                url: "https://open.spotify.com/track/4u7EnebtmKWzUH433cf5Qv".to_string(),
                market_region: "us".to_string(),
                external_id: "GBUM71029604".to_string(),
                art_url: String::new(),
                is_album: Some(false),
                is_primary: true,
            },
        );
        UnifiedResult {
            entries,
            links: vec!["https://open.spotify.com/track/4u7EnebtmKWzUH433cf5Qv".to_string()],
            looked_up_at: Some(Utc::now()),
        }
    }

    #[test]
    fn serialized_record_contains_no_input_links() {
        let record = LookupRecord::from_unified(&sample_unified());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"provider\":\"spotify\""));
        assert!(json.contains("lookedUpAt"));
        assert!(!json.contains("links"));
    }

    #[test]
    fn empty_external_id_is_omitted_on_the_wire() {
        let mut unified = sample_unified();
        unified.entries.get_mut(&ProviderId::Spotify).unwrap().external_id = String::new();
        let json = serde_json::to_string(&LookupRecord::from_unified(&unified)).unwrap();
        assert!(!json.contains("externalId"));
    }

    #[test]
    fn unknown_providers_are_skipped_on_read() {
        let json = serde_json::json!({
            "results": [
                {"provider": "spotify", "artist": "Queen", "title": "Bohemian Rhapsody",
                 "url": "https://open.spotify.com/track/x", "marketRegion": "us", "isPrimary": true},
                {"provider": "pandora", "artist": "Queen", "title": "Bohemian Rhapsody",
                 "url": "https://pandora.example/x"}
            ],
            "lookedUpAt": "2024-05-01T12:00:00Z"
        });
        let record: LookupRecord = serde_json::from_value(json).unwrap();
        let unified = record.into_unified();
        assert_eq!(unified.entries.len(), 1);
        assert!(unified.contains_provider(ProviderId::Spotify));
    }

    #[test]
    fn record_round_trips_through_json() {
        let unified = sample_unified();
        let record = LookupRecord::from_unified(&unified);
        let json = serde_json::to_string(&record).unwrap();
        let back: LookupRecord = serde_json::from_str(&json).unwrap();
        let rehydrated = back.into_unified();
        assert_eq!(rehydrated.entries[&ProviderId::Spotify], unified.entries[&ProviderId::Spotify]);
        assert!(rehydrated.links.is_empty());
    }
}
