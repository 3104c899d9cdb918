// Model exports
pub mod domain;

pub use domain::{
    Budget, CommutePoint, DealType, EnrichmentRecord, Factor, GeoQuery, Listing, ListingFilters,
    MatchBreakdown, MatchResult, PropertyType, Query, RentFilters, SearchMode, TransportMode,
    Weights,
};
