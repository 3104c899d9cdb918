use crate::models::{EnrichmentRecord, Listing};
use crate::services::cache::{CacheKey, EnrichmentCache};
use crate::services::nearby::{EnrichmentSource, NearbyCounts};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RADIUS_M: f64 = 1200.0;
pub const DEFAULT_TTL_DAYS: u64 = 7;

/// Resolves nearby-amenity facts for listings
///
/// A fresh cached record wins. Otherwise sources are tried in order and the
/// first one that answers is cached and returned. When every source fails the
/// listing simply has no enrichment.
pub struct EnrichmentResolver {
    sources: Vec<Arc<dyn EnrichmentSource>>,
    cache: Arc<dyn EnrichmentCache>,
    ttl: Duration,
    radius_m: f64,
}

impl EnrichmentResolver {
    pub fn new(
        sources: Vec<Arc<dyn EnrichmentSource>>,
        cache: Arc<dyn EnrichmentCache>,
        ttl: Duration,
        radius_m: f64,
    ) -> Self {
        Self {
            sources,
            cache,
            ttl,
            radius_m,
        }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn enrich(&self, listing: &Listing) -> Option<EnrichmentRecord> {
        let listing_id = listing.id();

        if !listing.has_coordinates() {
            tracing::debug!("Listing {} has no coordinates, skipping enrichment", listing_id);
            return None;
        }

        let key = CacheKey::enrichment(&listing_id);
        if let Some(record) = self.cached(&key).await {
            return Some(record);
        }

        for source in &self.sources {
            match source.nearby(listing.lat, listing.lng, self.radius_m).await {
                Ok(Some(counts)) => {
                    let record = build_record(&listing_id, source.name(), counts);
                    if let Err(e) = self.cache.put(&key, &record, self.ttl).await {
                        tracing::warn!("Failed to cache enrichment for {}: {}", listing_id, e);
                    }
                    tracing::debug!(
                        "Enriched {} from {}: {} schools, {} parks, {} metro",
                        listing_id,
                        record.source,
                        record.schools_count,
                        record.parks_count,
                        record.metro_stations
                    );
                    return Some(record);
                }
                Ok(None) => {
                    tracing::trace!("Enrichment source {} not available", source.name());
                }
                Err(e) => {
                    tracing::warn!(
                        "Enrichment source {} failed for {}: {}",
                        source.name(),
                        listing_id,
                        e
                    );
                }
            }
        }

        tracing::warn!("All enrichment sources failed for {}", listing_id);
        None
    }

    async fn cached(&self, key: &str) -> Option<EnrichmentRecord> {
        let record = match self.cache.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Enrichment cache read failed for {}: {}", key, e);
                return None;
            }
        };

        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        if record.is_fresh(ttl, Utc::now()) {
            tracing::trace!("Fresh enrichment cached for {}", key);
            Some(record)
        } else {
            tracing::debug!("Cached enrichment for {} is stale", key);
            None
        }
    }
}

fn build_record(listing_id: &str, source: &str, counts: NearbyCounts) -> EnrichmentRecord {
    EnrichmentRecord {
        listing_id: listing_id.to_string(),
        schools_count: counts.schools,
        parks_count: counts.parks,
        metro_stations: counts.metro_distances_m.len() as u32,
        nearest_metro_m: counts.nearest_metro_m(),
        source: source.to_string(),
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::{CacheError, MemoryCache};
    use crate::services::http::ExternalServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        name: &'static str,
        calls: AtomicUsize,
        answer: Option<NearbyCounts>,
        fail: bool,
    }

    impl FakeSource {
        fn answering(name: &'static str, schools: u32) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                answer: Some(NearbyCounts {
                    schools,
                    parks: 1,
                    metro_distances_m: vec![700.0, 420.0],
                }),
                fail: false,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                answer: None,
                fail: true,
            })
        }

        fn unconfigured(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
                answer: None,
                fail: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EnrichmentSource for FakeSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn nearby(
            &self,
            _lat: f64,
            _lng: f64,
            _radius_m: f64,
        ) -> Result<Option<NearbyCounts>, ExternalServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExternalServiceError::ServerError {
                    status: 503,
                    url: format!("https://{}.test", self.name),
                });
            }
            Ok(self.answer.clone())
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl EnrichmentCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<EnrichmentRecord>, CacheError> {
            Err(CacheError::SerializationError(
                serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            ))
        }

        async fn put(&self, _key: &str, _record: &EnrichmentRecord, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::SerializationError(
                serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            ))
        }
    }

    fn create_listing() -> Listing {
        Listing {
            provider: "avito".to_string(),
            external_id: "42".to_string(),
            title: "2-room flat".to_string(),
            address: "Tverskaya 1".to_string(),
            lat: 55.7558,
            lng: 37.6173,
            price: 9_000_000.0,
            rooms: 2,
            area: 54.0,
            floor: 3,
            total_floors: 12,
            year: None,
            stage: None,
            photos: vec![],
            description: String::new(),
            has_parking: false,
            is_new_building: false,
            developer: None,
            deal_type: None,
            property_type: None,
            url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn week() -> Duration {
        Duration::from_secs(DEFAULT_TTL_DAYS * 24 * 3600)
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_sources() {
        let primary = FakeSource::answering("yandex_maps", 5);
        let fallback = FakeSource::answering("overpass", 1);
        let cache = Arc::new(MemoryCache::new(100));

        let cached = EnrichmentRecord {
            listing_id: "avito:42".to_string(),
            schools_count: 3,
            parks_count: 2,
            metro_stations: 1,
            nearest_metro_m: Some(300.0),
            source: "2gis".to_string(),
            fetched_at: Utc::now() - chrono::Duration::days(1),
        };
        cache.put(&CacheKey::enrichment("avito:42"), &cached, week()).await.unwrap();

        let resolver = EnrichmentResolver::new(
            vec![primary.clone(), fallback.clone()],
            cache,
            week(),
            DEFAULT_RADIUS_M,
        );

        let record = resolver.enrich(&create_listing()).await.unwrap();

        assert_eq!(record, cached);
        assert_eq!(primary.calls(), 0);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_refetches() {
        let primary = FakeSource::answering("yandex_maps", 5);
        let cache = Arc::new(MemoryCache::new(100));

        let stale = EnrichmentRecord {
            listing_id: "avito:42".to_string(),
            schools_count: 0,
            parks_count: 0,
            metro_stations: 0,
            nearest_metro_m: None,
            source: "overpass".to_string(),
            fetched_at: Utc::now() - chrono::Duration::days(10),
        };
        cache.put(&CacheKey::enrichment("avito:42"), &stale, week()).await.unwrap();

        let resolver = EnrichmentResolver::new(vec![primary.clone()], cache.clone(), week(), DEFAULT_RADIUS_M);
        let record = resolver.enrich(&create_listing()).await.unwrap();

        assert_eq!(primary.calls(), 1);
        assert_eq!(record.schools_count, 5);
        assert_eq!(
            cache.get(&CacheKey::enrichment("avito:42")).await.unwrap().unwrap().source,
            "yandex_maps"
        );
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let primary = FakeSource::failing("yandex_maps");
        let secondary = FakeSource::unconfigured("2gis");
        let tertiary = FakeSource::answering("overpass", 2);
        let cache = Arc::new(MemoryCache::new(100));

        let resolver = EnrichmentResolver::new(
            vec![primary.clone(), secondary.clone(), tertiary.clone()],
            cache.clone(),
            week(),
            DEFAULT_RADIUS_M,
        );
        let record = resolver.enrich(&create_listing()).await.unwrap();

        assert_eq!(record.source, "overpass");
        assert_eq!(record.schools_count, 2);
        assert_eq!(record.metro_stations, 2);
        assert_eq!(record.nearest_metro_m, Some(420.0));
        assert_eq!((primary.calls(), secondary.calls(), tertiary.calls()), (1, 1, 1));

        // Second call is served from cache
        resolver.enrich(&create_listing()).await.unwrap();
        assert_eq!(tertiary.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_sources_failing_yields_none() {
        let resolver = EnrichmentResolver::new(
            vec![FakeSource::failing("yandex_maps"), FakeSource::failing("overpass")],
            Arc::new(MemoryCache::new(100)),
            week(),
            DEFAULT_RADIUS_M,
        );

        assert!(resolver.enrich(&create_listing()).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_errors_are_treated_as_miss() {
        let source = FakeSource::answering("overpass", 4);
        let resolver = EnrichmentResolver::new(vec![source.clone()], Arc::new(BrokenCache), week(), DEFAULT_RADIUS_M);

        let record = resolver.enrich(&create_listing()).await.unwrap();

        assert_eq!(record.schools_count, 4);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_coordinates_skip_enrichment() {
        let source = FakeSource::answering("overpass", 4);
        let resolver = EnrichmentResolver::new(
            vec![source.clone()],
            Arc::new(MemoryCache::new(100)),
            week(),
            DEFAULT_RADIUS_M,
        );

        let mut listing = create_listing();
        listing.lat = 0.0;
        listing.lng = 0.0;

        assert!(resolver.enrich(&listing).await.is_none());
        assert_eq!(source.calls(), 0);
    }
}
