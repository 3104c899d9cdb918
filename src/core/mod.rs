// Core algorithm exports
pub mod dedup;
pub mod distance;
pub mod explain;
pub mod filters;
pub mod matcher;
pub mod scoring;

pub use dedup::{content_signature, deduplicate, quality_score};
pub use distance::{estimate_travel_minutes, geo_cell, haversine_distance, haversine_meters, GeoCell};
pub use explain::explain;
pub use filters::matches_query;
pub use matcher::{Matcher, RankedMatches, DEFAULT_TOP_N};
pub use scoring::{calculate_match_score, score_listing, AbsentInput};
