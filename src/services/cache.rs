use crate::models::EnrichmentRecord;
use async_trait::async_trait;
use moka::Expiry;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from an enrichment cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Key-value store for enrichment records
///
/// Writes are idempotent recomputations of the same geographic fact, so
/// concurrent writers may race freely: last writer wins.
#[async_trait]
pub trait EnrichmentCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<EnrichmentRecord>, CacheError>;

    async fn put(&self, key: &str, record: &EnrichmentRecord, ttl: Duration) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CachedRecord {
    record: EnrichmentRecord,
    ttl: Duration,
}

/// Expires each entry after the TTL it was stored with
struct PerEntryTtl;

impl Expiry<String, CachedRecord> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedRecord, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedRecord,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache, used on its own when no Redis is configured
pub struct MemoryCache {
    entries: moka::future::Cache<String, CachedRecord>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let entries = moka::future::Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }
}

#[async_trait]
impl EnrichmentCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<EnrichmentRecord>, CacheError> {
        Ok(self.entries.get(key).await.map(|cached| cached.record))
    }

    async fn put(&self, key: &str, record: &EnrichmentRecord, ttl: Duration) -> Result<(), CacheError> {
        let cached = CachedRecord {
            record: record.clone(),
            ttl,
        };
        self.entries.insert(key.to_string(), cached).await;
        Ok(())
    }
}

/// Enrichment records in process memory (L1) backed by Redis (L2)
///
/// L2 survives restarts and is shared by every process pointed at the same
/// Redis; L1 only saves the round trip.
pub struct TieredCache {
    redis: Arc<tokio::sync::Mutex<ConnectionManager>>,
    l1_cache: moka::future::Cache<String, Vec<u8>>,
}

impl TieredCache {
    /// Connect to Redis and build the L1 tier
    ///
    /// `l1_ttl` bounds how long a record lives in process memory; Redis keeps
    /// it for the TTL given on each `put`.
    pub async fn new(redis_url: &str, l1_size: u64, l1_ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let redis = redis::aio::ConnectionManager::new(client).await?;

        let l1_cache = moka::future::CacheBuilder::new(l1_size)
            .time_to_live(l1_ttl)
            .build();

        Ok(Self {
            redis: Arc::new(tokio::sync::Mutex::new(redis)),
            l1_cache,
        })
    }
}

#[async_trait]
impl EnrichmentCache for TieredCache {
    async fn get(&self, key: &str) -> Result<Option<EnrichmentRecord>, CacheError> {
        // Try L1 cache first
        if let Some(bytes) = self.l1_cache.get(key).await {
            tracing::trace!("L1 cache hit: {}", key);
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }

        // Try L2 cache (Redis)
        let mut conn = self.redis.lock().await;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        drop(conn);

        if let Some(json) = value {
            tracing::trace!("L2 cache hit: {}", key);

            // Populate L1 cache
            self.l1_cache.insert(key.to_string(), json.as_bytes().to_vec()).await;

            return Ok(Some(serde_json::from_str(&json)?));
        }

        tracing::trace!("Cache miss: {}", key);
        Ok(None)
    }

    async fn put(&self, key: &str, record: &EnrichmentRecord, ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(record)?;

        self.l1_cache.insert(key.to_string(), json.as_bytes().to_vec()).await;

        // Redis expires the record on its own
        let mut conn = self.redis.lock().await;
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .arg(json)
            .query_async(&mut *conn)
            .await?;
        drop(conn);

        tracing::trace!("Cache set: {}", key);
        Ok(())
    }
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Build a cache key for a listing's enrichment record
    pub fn enrichment(listing_id: &str) -> String {
        format!("enrichment:{}", listing_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_record(listing_id: &str, schools: u32) -> EnrichmentRecord {
        EnrichmentRecord {
            listing_id: listing_id.to_string(),
            schools_count: schools,
            parks_count: 2,
            metro_stations: 1,
            nearest_metro_m: Some(350.0),
            source: "overpass".to_string(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_cache_put_get() {
        let cache = MemoryCache::new(100);
        let key = CacheKey::enrichment("avito:1");

        assert!(cache.get(&key).await.unwrap().is_none());

        let record = create_record("avito:1", 3);
        cache.put(&key, &record, Duration::from_secs(3600)).await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_memory_cache_last_writer_wins() {
        let cache = Arc::new(MemoryCache::new(100));
        let key = CacheKey::enrichment("avito:1");

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    cache
                        .put(&key, &create_record("avito:1", i), Duration::from_secs(60))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        cache.put(&key, &create_record("avito:1", 42), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().unwrap().schools_count, 42);
    }

    #[tokio::test]
    async fn test_memory_cache_rewrite_takes_new_ttl() {
        let cache = MemoryCache::new(100);
        let key = CacheKey::enrichment("avito:1");

        cache.put(&key, &create_record("avito:1", 1), Duration::from_secs(3600)).await.unwrap();
        cache.put(&key, &create_record("avito:1", 2), Duration::from_millis(50)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        cache.entries.run_pending_tasks().await;

        assert!(cache.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cache_rewrite_extends_short_ttl() {
        let cache = MemoryCache::new(100);
        let key = CacheKey::enrichment("avito:1");

        cache.put(&key, &create_record("avito:1", 1), Duration::from_millis(50)).await.unwrap();
        cache.put(&key, &create_record("avito:1", 2), Duration::from_secs(3600)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(cache.get(&key).await.unwrap().unwrap().schools_count, 2);
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_tiered_cache_set_get() {
        let cache = TieredCache::new("redis://127.0.0.1:6379", 1000, Duration::from_secs(60))
            .await
            .expect("Failed to create cache");

        let key = CacheKey::enrichment("test:1");
        let record = create_record("test:1", 4);

        cache.put(&key, &record, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(record));
    }

    #[test]
    fn test_cache_key_builder() {
        assert_eq!(CacheKey::enrichment("avito:123"), "enrichment:avito:123");
    }
}
