//! Two-tier read-through/write-through cache over the aggregator.
//!
//! Only the text path is cached: links are stable keys, identifier and
//! title input are not. Reads consult the local index first, then the
//! object store; misses and stale hits fall through to a fresh aggregator
//! fan-out whose results are written back (update-in-place for stale
//! pointers, create for new ones). Any cache-tier failure degrades the
//! request to pass-through; the aggregator still runs.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::links::{extract_links, normalize_link};
use crate::models::{LookupRecord, UnifiedResult};
use crate::services::aggregator::Aggregator;
use crate::services::cache_index::CacheIndex;
use crate::services::object_store::ObjectStore;

const CHANNEL_CAPACITY: usize = 8;

/// A stale index hit: the pointer to refresh once the fresh fan-out for its
/// link completes.
struct StaleSlot {
    pointer_id: i64,
    uri: String,
    norm: String,
}

pub struct CacheTier {
    pub index: CacheIndex,
    pub store: Arc<ObjectStore>,
    /// Freshness window; entries older than this trigger a refresh.
    pub window: ChronoDuration,
}

pub struct CacheFacade {
    aggregator: Arc<Aggregator>,
    tier: Option<CacheTier>,
}

impl CacheFacade {
    pub fn new(aggregator: Arc<Aggregator>, tier: Option<CacheTier>) -> Self {
        Self { aggregator, tier }
    }

    pub fn cache_enabled(&self) -> bool {
        self.tier.is_some()
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Resolve free-form text through the cache. Hits are yielded
    /// immediately; misses and stale links go through one aggregator pass.
    pub fn lookup_by_text(
        self: &Arc<Self>,
        text: &str,
        cancel: CancelSignal,
    ) -> mpsc::Receiver<UnifiedResult> {
        if self.tier.is_none() {
            return self.aggregator.lookup_by_text(text, cancel);
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let facade = Arc::clone(self);
        let text = text.to_string();
        tokio::spawn(async move {
            facade.run_cached_lookup(&text, cancel, tx).await;
        });
        rx
    }

    /// Identifier and title lookups have no stable link key and bypass the
    /// cache entirely.
    pub async fn lookup_by_title_artist(
        &self,
        title: &str,
        artist: &str,
        cancel: &CancelSignal,
    ) -> Option<UnifiedResult> {
        self.aggregator.lookup_by_title_artist(title, artist, cancel).await
    }

    pub async fn lookup_by_isrc(&self, isrc: &str, cancel: &CancelSignal) -> Option<UnifiedResult> {
        self.aggregator.lookup_by_isrc(isrc, cancel).await
    }

    pub async fn lookup_by_upc(&self, upc: &str, cancel: &CancelSignal) -> Option<UnifiedResult> {
        self.aggregator.lookup_by_upc(upc, cancel).await
    }

    async fn run_cached_lookup(
        &self,
        text: &str,
        cancel: CancelSignal,
        tx: mpsc::Sender<UnifiedResult>,
    ) {
        let tier = self.tier.as_ref().expect("cached lookup requires a tier");

        let mut links: Vec<String> = Vec::new();
        for link in extract_links(text) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
        if links.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut fresh_lookup: Vec<String> = Vec::new();
        let mut stale_slots: Vec<StaleSlot> = Vec::new();
        // Results already served from cache this request, so a fresh lookup
        // that resolves to the same entity coalesces instead of re-emitting.
        let mut served: Vec<(i64, String, UnifiedResult)> = Vec::new();

        for link in &links {
            if cancel.is_cancelled() {
                return;
            }
            let norm = normalize_link(link);
            let row = match tier.index.get(&norm).await {
                Ok(row) => row,
                Err(e) => {
                    warn!(link = %link, error = %e, "cache index unavailable, passing through");
                    fresh_lookup.push(link.clone());
                    continue;
                }
            };
            let Some(row) = row else {
                fresh_lookup.push(link.clone());
                continue;
            };

            if now - row.last_looked_up_at < tier.window {
                match tier.store.get(&row.uri, &cancel).await {
                    Ok(Some(record)) => {
                        let mut unified = record.into_unified();
                        unified.push_link(link);
                        served.push((row.id, row.uri.clone(), unified.clone()));
                        if tx.send(unified).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        // Tombstone: the record is gone, evict and re-look-up.
                        debug!(uri = %row.uri, "evicting index row for missing record");
                        let _ = tier.index.remove_pointer(row.id).await;
                        fresh_lookup.push(link.clone());
                    }
                    Err(crate::error::AppError::Cancelled) => return,
                    Err(e) => {
                        warn!(uri = %row.uri, error = %e, "object store unavailable, passing through");
                        fresh_lookup.push(link.clone());
                    }
                }
            } else {
                stale_slots.push(StaleSlot {
                    pointer_id: row.id,
                    uri: row.uri.clone(),
                    norm,
                });
                fresh_lookup.push(link.clone());
            }
        }

        if fresh_lookup.is_empty() {
            return;
        }

        let mut results = self.aggregator.lookup_by_text(&fresh_lookup.join(" "), cancel.clone());
        while let Some(unified) = results.recv().await {
            let norm_links: Vec<String> =
                unified.links.iter().map(|l| normalize_link(l)).collect();
            let record = LookupRecord::from_unified(&unified);

            if let Some(position) =
                stale_slots.iter().position(|slot| norm_links.contains(&slot.norm))
            {
                let slot = stale_slots.remove(position);
                self.refresh_pointer(tier, &slot, &record, &norm_links, &cancel).await;
            } else if let Some((pointer_id, uri)) = served
                .iter()
                .find(|(_, _, prior)| unified.entries.values().any(|entry| prior.overlaps(entry)))
                .map(|(id, uri, _)| (*id, uri.clone()))
            {
                // Same entity as a result already served this request: fold
                // the new links onto its pointer rather than emit twice.
                if let Err(e) = tier.index.add_links(pointer_id, &norm_links).await {
                    warn!(error = %e, "coalescing links failed");
                }
                let _ = tier.store.update_in_place(&uri, &record, &cancel).await;
                let _ = tier.index.touch_pointer(pointer_id).await;
                continue;
            } else {
                self.store_new(tier, &record, &norm_links, &cancel).await;
            }

            if tx.send(unified).await.is_err() {
                return;
            }
        }
    }

    async fn refresh_pointer(
        &self,
        tier: &CacheTier,
        slot: &StaleSlot,
        record: &LookupRecord,
        norm_links: &[String],
        cancel: &CancelSignal,
    ) {
        match tier.store.update_in_place(&slot.uri, record, cancel).await {
            Ok(true) => {
                if let Err(e) = tier.index.touch_pointer(slot.pointer_id).await {
                    warn!(error = %e, "touching pointer failed");
                }
                if let Err(e) = tier.index.add_links(slot.pointer_id, norm_links).await {
                    warn!(error = %e, "appending links failed");
                }
            }
            Ok(false) => {
                // The record vanished under us; evict and recreate.
                warn!(uri = %slot.uri, "pointer conflict, recreating record");
                let _ = tier.index.remove_pointer(slot.pointer_id).await;
                self.store_new(tier, record, norm_links, cancel).await;
            }
            Err(e) => {
                warn!(uri = %slot.uri, error = %e, "update-in-place failed, result not cached");
            }
        }
    }

    async fn store_new(
        &self,
        tier: &CacheTier,
        record: &LookupRecord,
        norm_links: &[String],
        cancel: &CancelSignal,
    ) {
        let uri = match tier.store.create(record, cancel).await {
            Ok(uri) => uri,
            Err(e) => {
                warn!(error = %e, "object store create failed, result not cached");
                return;
            }
        };
        match tier.index.create_pointer(&uri).await {
            Ok(pointer_id) => {
                if let Err(e) = tier.index.add_links(pointer_id, norm_links).await {
                    warn!(error = %e, "inserting link rows failed");
                }
            }
            Err(e) => warn!(uri = %uri, error = %e, "inserting pointer row failed"),
        }
    }
}
