//! Cross-provider aggregation.
//!
//! Text input fans out every extracted link to every configured provider in
//! parallel, groups the answers by primary result, fills the remaining
//! providers by identifier (falling back to title/artist search), and
//! streams each unified result as soon as its fan-out finishes. Identifier
//! and title input query providers sequentially in registry order until one
//! answers, then run the same fill.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::error::AppError;
use crate::links::extract_links;
use crate::models::{ProviderId, ProviderResult, UnifiedResult};
use crate::services::lookup::ProviderLookup;

/// Streaming emission buffer; producers await consumer readiness beyond it.
const CHANNEL_CAPACITY: usize = 8;

/// Per-link cap factor for the per-request fan-out semaphore.
const MAX_PARALLEL_LINKS: usize = 8;

pub struct Aggregator {
    providers: Vec<Arc<dyn ProviderLookup>>,
    /// Opt-in: query all providers at once for identifier input instead of
    /// walking the registry sequentially.
    parallel_id_lookup: bool,
    /// Per-request fan-out cap override. Unset means
    /// providers × min(links, MAX_PARALLEL_LINKS).
    concurrency_cap: Option<usize>,
}

impl Aggregator {
    pub fn new(providers: Vec<Arc<dyn ProviderLookup>>) -> Self {
        Self {
            providers,
            parallel_id_lookup: false,
            concurrency_cap: None,
        }
    }

    pub fn with_parallel_id_lookup(mut self, enabled: bool) -> Self {
        self.parallel_id_lookup = enabled;
        self
    }

    pub fn with_concurrency_cap(mut self, cap: usize) -> Self {
        self.concurrency_cap = Some(cap.max(1));
        self
    }

    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    /// Resolve free-form text. Results stream in the order their fan-out
    /// completes; the channel is bounded, so slow consumers apply
    /// backpressure to the fill stage.
    pub fn lookup_by_text(
        self: &Arc<Self>,
        text: &str,
        cancel: CancelSignal,
    ) -> mpsc::Receiver<UnifiedResult> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let aggregator = Arc::clone(self);
        let text = text.to_string();
        tokio::spawn(async move {
            aggregator.run_text_lookup(&text, cancel, tx).await;
        });
        rx
    }

    async fn run_text_lookup(
        self: Arc<Self>,
        text: &str,
        cancel: CancelSignal,
        tx: mpsc::Sender<UnifiedResult>,
    ) {
        let mut links: Vec<String> = Vec::new();
        for link in extract_links(text) {
            if !links.contains(&link) {
                links.push(link);
            }
        }
        if links.is_empty() {
            return;
        }

        let cap = self
            .concurrency_cap
            .unwrap_or_else(|| self.providers.len().max(1) * links.len().min(MAX_PARALLEL_LINKS));
        let semaphore = Arc::new(Semaphore::new(cap));

        // Stage 1: every link against every provider, in parallel.
        let mut tasks = Vec::new();
        for (index, link) in links.iter().enumerate() {
            for provider in &self.providers {
                let provider = Arc::clone(provider);
                let link = link.clone();
                let cancel = cancel.clone();
                let semaphore = Arc::clone(&semaphore);
                tasks.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let outcome = provider.by_url(&link, &cancel).await;
                    (index, provider.id(), outcome)
                }));
            }
        }

        let mut hits: Vec<(usize, ProviderResult)> = Vec::new();
        let mut disabled: HashSet<ProviderId> = HashSet::new();
        for task in join_all(tasks).await {
            let Ok((index, provider_id, outcome)) = task else {
                continue;
            };
            match outcome {
                Ok(Some(result)) => hits.push((index, result)),
                Ok(None) => {}
                Err(AppError::Cancelled) => return,
                Err(e) => {
                    warn!(provider = %provider_id, error = %e, "provider disabled for this request");
                    disabled.insert(provider_id);
                }
            }
        }

        // Stage 2: group by primary, coalescing links that resolved to an
        // entity some earlier group already contains.
        let mut groups: Vec<UnifiedResult> = Vec::new();
        for (index, link) in links.iter().enumerate() {
            let Some((_, primary)) = hits.iter().find(|(i, _)| *i == index) else {
                continue;
            };
            if let Some(existing) = groups.iter_mut().find(|g| g.overlaps(primary)) {
                existing.push_link(link);
                continue;
            }
            let mut unified = UnifiedResult::from_primary(primary.clone());
            unified.push_link(link);
            // Attach other providers' answers from this batch when they
            // describe the same entity.
            for (other_index, other) in &hits {
                if unified.contains_provider(other.provider) {
                    continue;
                }
                if unified.primary().map(|p| p.matches_cross_provider(other)).unwrap_or(false) {
                    unified.attach(other.clone());
                    unified.push_link(&links[*other_index]);
                }
            }
            groups.push(unified);
        }

        // Stage 3: fill remaining providers per group; emit on completion.
        let mut fill_tasks = Vec::new();
        for mut unified in groups {
            let aggregator = Arc::clone(&self);
            let cancel = cancel.clone();
            let disabled = disabled.clone();
            let tx = tx.clone();
            fill_tasks.push(tokio::spawn(async move {
                aggregator.fill_missing(&mut unified, &disabled, &cancel).await;
                if !cancel.is_cancelled() {
                    let _ = tx.send(unified).await;
                }
            }));
        }
        join_all(fill_tasks).await;
    }

    /// Resolve a single (title, artist) pair into one unified result.
    pub async fn lookup_by_title_artist(
        &self,
        title: &str,
        artist: &str,
        cancel: &CancelSignal,
    ) -> Option<UnifiedResult> {
        self.lookup_by_identifier(
            |provider| {
                let title = title.to_string();
                let artist = artist.to_string();
                let cancel = cancel.clone();
                async move { provider.by_title_artist(&title, &artist, &cancel).await }
            },
            cancel,
        )
        .await
    }

    /// Resolve a track ISRC into one unified result.
    pub async fn lookup_by_isrc(&self, isrc: &str, cancel: &CancelSignal) -> Option<UnifiedResult> {
        self.lookup_by_identifier(
            |provider| {
                let isrc = isrc.to_string();
                let cancel = cancel.clone();
                async move { provider.by_isrc(&isrc, &cancel).await }
            },
            cancel,
        )
        .await
    }

    /// Resolve an album UPC into one unified result. The identifier is
    /// passed to providers verbatim; leading zeros survive.
    pub async fn lookup_by_upc(&self, upc: &str, cancel: &CancelSignal) -> Option<UnifiedResult> {
        self.lookup_by_identifier(
            |provider| {
                let upc = upc.to_string();
                let cancel = cancel.clone();
                async move { provider.by_upc(&upc, &cancel).await }
            },
            cancel,
        )
        .await
    }

    async fn lookup_by_identifier<F, Fut>(
        &self,
        query: F,
        cancel: &CancelSignal,
    ) -> Option<UnifiedResult>
    where
        F: Fn(Arc<dyn ProviderLookup>) -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<Option<ProviderResult>>>,
    {
        let mut disabled = HashSet::new();
        let mut primary = None;

        if self.parallel_id_lookup {
            let outcomes = join_all(self.providers.iter().map(|p| query(Arc::clone(p)))).await;
            for (provider, outcome) in self.providers.iter().zip(outcomes) {
                match outcome {
                    Ok(Some(result)) if primary.is_none() => primary = Some(result),
                    Ok(_) => {}
                    Err(AppError::Cancelled) => return None,
                    Err(e) => {
                        warn!(provider = %provider.id(), error = %e, "provider disabled for this request");
                        disabled.insert(provider.id());
                    }
                }
            }
        } else {
            for provider in &self.providers {
                if cancel.is_cancelled() {
                    return None;
                }
                match query(Arc::clone(provider)).await {
                    Ok(Some(result)) => {
                        primary = Some(result);
                        break;
                    }
                    Ok(None) => {}
                    Err(AppError::Cancelled) => return None,
                    Err(e) => {
                        warn!(provider = %provider.id(), error = %e, "provider disabled for this request");
                        disabled.insert(provider.id());
                    }
                }
            }
        }

        let mut unified = UnifiedResult::from_primary(primary?);
        self.fill_missing(&mut unified, &disabled, cancel).await;
        Some(unified)
    }

    /// Query every provider not yet present: by external id when the
    /// primary carries one and its kind is known, with title/artist search
    /// as fallback. Failures contribute nothing; the result still emits.
    async fn fill_missing(
        &self,
        unified: &mut UnifiedResult,
        disabled: &HashSet<ProviderId>,
        cancel: &CancelSignal,
    ) {
        let Some(primary) = unified.primary().cloned() else {
            return;
        };
        let missing: Vec<Arc<dyn ProviderLookup>> = self
            .providers
            .iter()
            .filter(|p| !unified.contains_provider(p.id()) && !disabled.contains(&p.id()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return;
        }

        let fills = missing.iter().map(|provider| {
            let provider = Arc::clone(provider);
            let primary = primary.clone();
            let cancel = cancel.clone();
            async move {
                let by_id = if provider.supports_identifier_lookup()
                    && !primary.external_id.is_empty()
                {
                    match primary.is_album {
                        Some(true) => provider.by_upc(&primary.external_id, &cancel).await,
                        Some(false) => provider.by_isrc(&primary.external_id, &cancel).await,
                        None => Ok(None),
                    }
                } else {
                    Ok(None)
                };
                let outcome = match by_id {
                    Ok(Some(result)) => Ok(Some(result)),
                    Ok(None) => {
                        provider.by_title_artist(&primary.title, &primary.artist, &cancel).await
                    }
                    Err(e) => Err(e),
                };
                (provider.id(), outcome)
            }
        });

        for (provider_id, outcome) in join_all(fills).await {
            match outcome {
                Ok(Some(result)) => unified.attach(result),
                Ok(None) => debug!(provider = %provider_id, "no equivalent found"),
                Err(AppError::Cancelled) => return,
                Err(e) => warn!(provider = %provider_id, error = %e, "fill lookup failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::services::lookup::LookupOutcome;

    /// In-memory provider: maps inputs straight to results.
    struct FakeProvider {
        id: ProviderId,
        by_url: HashMap<String, ProviderResult>,
        by_isrc: HashMap<String, ProviderResult>,
        by_upc: HashMap<String, ProviderResult>,
        by_title: HashMap<String, ProviderResult>,
        fail_auth: bool,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(id: ProviderId) -> Self {
            Self {
                id,
                by_url: HashMap::new(),
                by_isrc: HashMap::new(),
                by_upc: HashMap::new(),
                by_title: HashMap::new(),
                fail_auth: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn auth_error(&self) -> AppError {
            AppError::AuthUnavailable {
                provider: self.id.to_string(),
                message: "token endpoint unreachable".to_string(),
            }
        }
    }

    #[async_trait]
    impl ProviderLookup for FakeProvider {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn by_isrc(&self, isrc: &str, _cancel: &CancelSignal) -> LookupOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_auth {
                return Err(self.auth_error());
            }
            Ok(self.by_isrc.get(isrc).cloned())
        }

        async fn by_upc(&self, upc: &str, _cancel: &CancelSignal) -> LookupOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_auth {
                return Err(self.auth_error());
            }
            Ok(self.by_upc.get(upc).cloned())
        }

        async fn by_title_artist(&self, title: &str, _artist: &str, _cancel: &CancelSignal) -> LookupOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_auth {
                return Err(self.auth_error());
            }
            Ok(self.by_title.get(title).cloned())
        }

        async fn by_url(&self, url: &str, _cancel: &CancelSignal) -> LookupOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_auth {
                return Err(self.auth_error());
            }
            Ok(self.by_url.get(url).cloned())
        }
    }

    fn result(provider: ProviderId, title: &str, isrc: &str) -> ProviderResult {
        ProviderResult {
            provider,
            artist: "Queen".to_string(),
            title: title.to_string(),
            url: format!("https://{provider}.example/{}", title.replace(' ', "-")),
            market_region: "US".to_string(),
            external_id: isrc.to_string(),
            art_url: String::new(),
            is_album: Some(false),
            is_primary: false,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<UnifiedResult>) -> Vec<UnifiedResult> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    const SPOTIFY_URL: &str = "https://open.spotify.com/track/4u7";
    const TIDAL_URL: &str = "https://tidal.com/browse/track/776";

    fn two_provider_setup() -> Arc<Aggregator> {
        let mut spotify = FakeProvider::new(ProviderId::Spotify);
        spotify
            .by_url
            .insert(SPOTIFY_URL.to_string(), result(ProviderId::Spotify, "Bohemian Rhapsody", "GBUM71029604"));
        spotify
            .by_isrc
            .insert("GBUM71029604".to_string(), result(ProviderId::Spotify, "Bohemian Rhapsody", "GBUM71029604"));

        let mut tidal = FakeProvider::new(ProviderId::Tidal);
        tidal
            .by_url
            .insert(TIDAL_URL.to_string(), result(ProviderId::Tidal, "Bohemian Rhapsody", "GBUM71029604"));
        tidal
            .by_isrc
            .insert("GBUM71029604".to_string(), result(ProviderId::Tidal, "Bohemian Rhapsody", "GBUM71029604"));

        Arc::new(Aggregator::new(vec![Arc::new(spotify), Arc::new(tidal)]))
    }

    #[tokio::test]
    async fn single_url_fans_out_to_other_providers() {
        let aggregator = two_provider_setup();
        let text = format!("check this {SPOTIFY_URL}");
        let results = collect(aggregator.lookup_by_text(&text, CancelSignal::none())).await;

        assert_eq!(results.len(), 1);
        let unified = &results[0];
        assert_eq!(unified.entries.len(), 2);
        assert!(unified.entries[&ProviderId::Spotify].is_primary);
        assert!(!unified.entries[&ProviderId::Tidal].is_primary);
        assert_eq!(unified.links, vec![SPOTIFY_URL.to_string()]);
    }

    #[tokio::test]
    async fn two_links_to_same_track_coalesce() {
        let aggregator = two_provider_setup();
        let text = format!("{SPOTIFY_URL} and also {TIDAL_URL}");
        let results = collect(aggregator.lookup_by_text(&text, CancelSignal::none())).await;

        assert_eq!(results.len(), 1);
        let unified = &results[0];
        assert_eq!(unified.links.len(), 2);
        let primaries = unified.entries.values().filter(|r| r.is_primary).count();
        assert_eq!(primaries, 1);
        // The first input link's provider is the primary.
        assert!(unified.entries[&ProviderId::Spotify].is_primary);
    }

    #[tokio::test]
    async fn duplicate_links_collapse_to_one_result() {
        let aggregator = two_provider_setup();
        let text = format!("{SPOTIFY_URL} {SPOTIFY_URL}");
        let results = collect(aggregator.lookup_by_text(&text, CancelSignal::none())).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].links.len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_text_emits_nothing() {
        let aggregator = two_provider_setup();
        let results =
            collect(aggregator.lookup_by_text("no links here", CancelSignal::none())).await;
        assert!(results.is_empty());
        let results = collect(
            aggregator.lookup_by_text("https://example.com/not-music", CancelSignal::none()),
        )
        .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn sequential_identifier_lookup_stops_at_first_answer() {
        let mut apple = FakeProvider::new(ProviderId::AppleMusic);
        apple
            .by_isrc
            .insert("GBUM71029604".to_string(), result(ProviderId::AppleMusic, "Bohemian Rhapsody", "GBUM71029604"));
        let mut spotify = FakeProvider::new(ProviderId::Spotify);
        spotify
            .by_isrc
            .insert("GBUM71029604".to_string(), result(ProviderId::Spotify, "Bohemian Rhapsody", "GBUM71029604"));

        let aggregator = Aggregator::new(vec![Arc::new(apple), Arc::new(spotify)]);
        let unified = aggregator
            .lookup_by_isrc("GBUM71029604", &CancelSignal::none())
            .await
            .expect("found");

        // Registry order decides the primary.
        assert!(unified.entries[&ProviderId::AppleMusic].is_primary);
        assert!(unified.contains_provider(ProviderId::Spotify));
    }

    #[tokio::test]
    async fn invalid_identifier_returns_none() {
        let aggregator = two_provider_setup();
        let unified = aggregator.lookup_by_isrc("INVALID12345", &CancelSignal::none()).await;
        assert!(unified.is_none());
    }

    #[tokio::test]
    async fn failed_secondary_still_emits_result() {
        let mut spotify = FakeProvider::new(ProviderId::Spotify);
        spotify
            .by_url
            .insert(SPOTIFY_URL.to_string(), result(ProviderId::Spotify, "Bohemian Rhapsody", "GBUM71029604"));
        let mut tidal = FakeProvider::new(ProviderId::Tidal);
        tidal.fail_auth = true;

        let aggregator = Arc::new(Aggregator::new(vec![Arc::new(spotify), Arc::new(tidal)]));
        let results =
            collect(aggregator.lookup_by_text(SPOTIFY_URL, CancelSignal::none())).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entries.len(), 1);
        assert!(results[0].contains_provider(ProviderId::Spotify));
    }

    #[tokio::test]
    async fn fill_falls_back_to_title_artist_search() {
        let mut spotify = FakeProvider::new(ProviderId::Spotify);
        // Primary has no external id, so the fill must use the search path.
        spotify
            .by_url
            .insert(SPOTIFY_URL.to_string(), result(ProviderId::Spotify, "Bohemian Rhapsody", ""));
        let mut tidal = FakeProvider::new(ProviderId::Tidal);
        tidal
            .by_title
            .insert("Bohemian Rhapsody".to_string(), result(ProviderId::Tidal, "Bohemian Rhapsody", "GBUM71029604"));

        let aggregator = Arc::new(Aggregator::new(vec![Arc::new(spotify), Arc::new(tidal)]));
        let results =
            collect(aggregator.lookup_by_text(SPOTIFY_URL, CancelSignal::none())).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].contains_provider(ProviderId::Tidal));
    }

    #[tokio::test]
    async fn concurrency_cap_of_one_serializes_the_fanout_without_losing_results() {
        let mut spotify = FakeProvider::new(ProviderId::Spotify);
        spotify
            .by_url
            .insert(SPOTIFY_URL.to_string(), result(ProviderId::Spotify, "Bohemian Rhapsody", "GBUM71029604"));
        let mut tidal = FakeProvider::new(ProviderId::Tidal);
        tidal
            .by_url
            .insert(TIDAL_URL.to_string(), result(ProviderId::Tidal, "Under Pressure", "GBUM71029605"));

        let aggregator = Arc::new(
            Aggregator::new(vec![Arc::new(spotify), Arc::new(tidal)]).with_concurrency_cap(1),
        );
        let text = format!("{SPOTIFY_URL} then {TIDAL_URL}");
        let results = collect(aggregator.lookup_by_text(&text, CancelSignal::none())).await;

        // Two distinct tracks, so two results, unaffected by the cap.
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn parallel_identifier_lookup_prefers_registry_order() {
        let mut apple = FakeProvider::new(ProviderId::AppleMusic);
        apple
            .by_isrc
            .insert("GBUM71029604".to_string(), result(ProviderId::AppleMusic, "Bohemian Rhapsody", "GBUM71029604"));
        let mut tidal = FakeProvider::new(ProviderId::Tidal);
        tidal
            .by_isrc
            .insert("GBUM71029604".to_string(), result(ProviderId::Tidal, "Bohemian Rhapsody", "GBUM71029604"));

        let aggregator = Aggregator::new(vec![Arc::new(apple), Arc::new(tidal)])
            .with_parallel_id_lookup(true);
        let unified = aggregator
            .lookup_by_isrc("GBUM71029604", &CancelSignal::none())
            .await
            .expect("found");
        assert!(unified.entries[&ProviderId::AppleMusic].is_primary);
    }
}
