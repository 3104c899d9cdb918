// Service exports
pub mod cache;
pub mod enrichment;
pub mod explainer;
pub mod http;
pub mod nearby;
pub mod recommender;

pub use cache::{CacheError, CacheKey, EnrichmentCache, MemoryCache, TieredCache};
pub use enrichment::EnrichmentResolver;
pub use explainer::{explain_or_fallback, ChatExplainer, ExplainError, Explainer};
pub use http::{
    per_minute_limiter, ExternalServiceError, RequestBody, RequestLimiter, RequestOptions, RetryClient, RetryPolicy,
};
pub use nearby::{DgisSource, EnrichmentSource, NearbyCounts, OverpassSource, YandexMapsSource};
pub use recommender::{Recommender, SetupError};
