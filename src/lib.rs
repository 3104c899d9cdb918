//! Estate Match - listing aggregation and weighted matching for real-estate search
//!
//! Listings are pulled from several upstream catalogs, deduplicated, enriched
//! with nearby-amenity data and scored against the user's weighted priorities.
//! Every result carries a per-factor breakdown and a short explanation.

pub mod config;
pub mod core;
pub mod models;
pub mod providers;
pub mod services;

// Re-export commonly used types
pub use crate::core::{deduplicate, explain, Matcher};
pub use crate::models::{EnrichmentRecord, Factor, Listing, MatchBreakdown, MatchResult, Query, SearchMode, Weights};
pub use crate::providers::{AggregatingProvider, ListingProvider, ProviderError};
pub use crate::services::Recommender;
