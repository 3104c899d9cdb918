use crate::config::{Settings, SettingsError};
use crate::core::Matcher;
use crate::models::{EnrichmentRecord, Listing, MatchResult, Query};
use crate::providers::{
    AggregatingProvider, AvitoProvider, CianPartnerProvider, CianSourceProvider, DomClickProvider, ListingProvider,
    PikProvider, YandexRealtyProvider,
};
use crate::services::cache::{EnrichmentCache, MemoryCache, TieredCache};
use crate::services::enrichment::EnrichmentResolver;
use crate::services::explainer::{explain_or_fallback, ChatExplainer, Explainer};
use crate::services::http::{per_minute_limiter, ExternalServiceError, RetryClient};
use crate::services::nearby::{DgisSource, EnrichmentSource, OverpassSource, YandexMapsSource};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Errors that can occur while wiring a recommender from settings
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] ExternalServiceError),
}

/// End-to-end search: fetch, enrich, score, rank, explain
///
/// # Pipeline Stages
/// 1. Search the provider (usually the aggregator)
/// 2. Enrich candidates concurrently, only when an enrichment-backed factor is weighted
/// 3. Score and rank, keeping the top N
/// 4. Optionally upgrade the survivors' explanations
pub struct Recommender {
    provider: Arc<dyn ListingProvider>,
    enricher: Option<Arc<EnrichmentResolver>>,
    explainer: Option<Arc<dyn Explainer>>,
    matcher: Matcher,
    concurrency: usize,
}

impl Recommender {
    pub fn new(provider: Arc<dyn ListingProvider>, matcher: Matcher) -> Self {
        Self {
            provider,
            enricher: None,
            explainer: None,
            matcher,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_enrichment(mut self, enricher: Arc<EnrichmentResolver>, concurrency: usize) -> Self {
        self.enricher = Some(enricher);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_explainer(mut self, explainer: Arc<dyn Explainer>) -> Self {
        self.explainer = Some(explainer);
        self
    }

    /// Wire every component from settings
    ///
    /// `extra_providers` are appended after the configured upstream adapters.
    pub async fn from_settings(
        settings: &Settings,
        extra_providers: Vec<Arc<dyn ListingProvider>>,
    ) -> Result<Self, SetupError> {
        settings.validate()?;

        let limiter = Arc::new(per_minute_limiter(settings.client.requests_per_minute));
        let client = RetryClient::new(limiter, settings.client.retry_policy(), settings.client.timeout())?;

        let mut providers = build_providers(settings, &client);
        providers.extend(extra_providers);
        if providers.is_empty() {
            tracing::warn!("No listing providers configured, searches will return nothing");
        }

        let aggregator = AggregatingProvider::new(providers);
        tracing::info!("Listing providers: {:?}", aggregator.provider_names());

        let matcher = Matcher::new(settings.scoring.absent_input, settings.recommend.top_n);
        let mut recommender = Self::new(Arc::new(aggregator), matcher);

        if settings.enrichment.enabled {
            let enricher = build_enrichment(settings, &client).await;
            tracing::info!("Enrichment sources: {:?}", enricher.source_names());
            recommender = recommender.with_enrichment(Arc::new(enricher), settings.enrichment.concurrency);
        }

        if let Some(explainer) = &settings.explainer {
            let chat = ChatExplainer::new(
                client.clone(),
                explainer.endpoint.clone(),
                explainer.api_key.clone().unwrap_or_default(),
                explainer.model.clone(),
                std::time::Duration::from_secs(explainer.timeout_secs),
            );
            tracing::info!("Assisted explanations enabled ({})", explainer.model);
            recommender = recommender.with_explainer(Arc::new(chat));
        }

        Ok(recommender)
    }

    /// Best matches for a query, best first
    ///
    /// Upstream failures shrink or empty the result; they never surface as errors.
    pub async fn recommend(&self, query: &Query) -> Vec<MatchResult> {
        let search_id = Uuid::new_v4();
        let span = tracing::info_span!("search", search_id = %search_id, mode = ?query.mode);

        self.run(query).instrument(span).await
    }

    async fn run(&self, query: &Query) -> Vec<MatchResult> {
        let query = query.with_default_weights();

        let listings = match self.provider.search(&query).await {
            Ok(listings) => listings,
            Err(e) => {
                tracing::warn!("Provider {} failed: {}", self.provider.name(), e);
                return Vec::new();
            }
        };

        let candidates = self.enrich_all(&query, listings).await;
        let mut ranked = self.matcher.rank(&query, candidates);

        if let Some(explainer) = &self.explainer {
            let upgraded = join_all(
                ranked
                    .matches
                    .iter()
                    .map(|result| explain_or_fallback(explainer.as_ref(), result, &query)),
            )
            .await;
            for (result, text) in ranked.matches.iter_mut().zip(upgraded) {
                result.explanation = text;
            }
        }

        tracing::info!(
            candidates = ranked.total_candidates,
            returned = ranked.matches.len(),
            "Search complete"
        );

        ranked.matches
    }

    async fn enrich_all(&self, query: &Query, listings: Vec<Listing>) -> Vec<(Listing, Option<EnrichmentRecord>)> {
        let enricher = match &self.enricher {
            Some(enricher) if query.needs_enrichment() => enricher,
            _ => return listings.into_iter().map(|listing| (listing, None)).collect(),
        };

        // buffered keeps input order, so ranking ties stay first-seen
        stream::iter(listings)
            .map(|listing| async move {
                let record = enricher.enrich(&listing).await;
                (listing, record)
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

/// Upstream listing adapters for every enabled provider
pub fn build_providers(settings: &Settings, client: &RetryClient) -> Vec<Arc<dyn ListingProvider>> {
    settings
        .providers
        .enabled()
        .into_iter()
        .map(|(name, provider, base_url)| {
            let base_url = base_url.unwrap_or_default();
            let api_key = provider.api_key.clone().unwrap_or_default();
            let partner_id = provider.partner_id.clone();

            let adapter: Arc<dyn ListingProvider> = match name {
                "avito" => Arc::new(AvitoProvider::new(client.clone(), base_url, api_key)),
                "domclick" => Arc::new(DomClickProvider::new(client.clone(), base_url, api_key, partner_id)),
                "cian_partner" => Arc::new(CianPartnerProvider::new(client.clone(), base_url, api_key)),
                "cian_source" => Arc::new(CianSourceProvider::new(client.clone(), base_url, api_key)),
                "pik" => Arc::new(PikProvider::new(
                    client.clone(),
                    base_url,
                    partner_id.unwrap_or_default(),
                    provider.api_key.clone(),
                )),
                _ => Arc::new(YandexRealtyProvider::new(client.clone(), base_url, api_key, partner_id)),
            };
            adapter
        })
        .collect()
}

/// Enrichment chain (Yandex Maps, 2GIS, Overpass) over the configured cache
pub async fn build_enrichment(settings: &Settings, client: &RetryClient) -> EnrichmentResolver {
    let enrichment = &settings.enrichment;
    let timeout = enrichment.timeout();

    let sources: Vec<Arc<dyn EnrichmentSource>> = vec![
        Arc::new(YandexMapsSource::new(
            client.clone(),
            enrichment.yandex_url.clone(),
            enrichment.yandex_api_key.clone(),
            timeout,
        )),
        Arc::new(DgisSource::new(
            client.clone(),
            enrichment.dgis_url.clone(),
            enrichment.dgis_api_key.clone(),
            timeout,
        )),
        Arc::new(OverpassSource::new(client.clone(), enrichment.overpass_url.clone(), timeout)),
    ];

    let cache: Arc<dyn EnrichmentCache> = match &settings.cache.redis_url {
        Some(redis_url) => {
            match TieredCache::new(redis_url, settings.cache.l1_cache_size, enrichment.cache_ttl()).await {
                Ok(cache) => {
                    tracing::info!("Enrichment cache: Redis with L1 of {} entries", settings.cache.l1_cache_size);
                    Arc::new(cache)
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to Redis ({}), using in-memory cache", e);
                    Arc::new(MemoryCache::new(settings.cache.l1_cache_size))
                }
            }
        }
        None => Arc::new(MemoryCache::new(settings.cache.l1_cache_size)),
    };

    EnrichmentResolver::new(sources, cache, enrichment.cache_ttl(), enrichment.radius_m)
}
