use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use validator::{Validate, ValidationError};

/// Per-factor weights requested by the user (0 means "not interested").
pub type Weights = BTreeMap<Factor, f64>;

/// Sparse per-factor score map, every value in [0, 10]
pub type MatchBreakdown = BTreeMap<Factor, f64>;

pub const WEIGHT_MIN: f64 = 0.0;
pub const WEIGHT_MAX: f64 = 10.0;

/// A scoring factor.
///
/// Unknown keys coming from the preference flow are kept as `Custom` so they
/// survive a round trip, but no scorer ever produces them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Factor {
    Price,
    Transport,
    Metro,
    Schools,
    Parks,
    Parking,
    Noise,
    Liquidity,
    ConstructionStage,
    Ecology,
    Infrastructure,
    Custom(String),
}

impl Factor {
    pub fn as_str(&self) -> &str {
        match self {
            Factor::Price => "price",
            Factor::Transport => "transport",
            Factor::Metro => "metro",
            Factor::Schools => "schools",
            Factor::Parks => "parks",
            Factor::Parking => "parking",
            Factor::Noise => "noise",
            Factor::Liquidity => "liquidity",
            Factor::ConstructionStage => "constructionStage",
            Factor::Ecology => "ecology",
            Factor::Infrastructure => "infrastructure",
            Factor::Custom(name) => name,
        }
    }

    /// Factors whose score depends on enrichment data
    pub fn needs_enrichment(&self) -> bool {
        matches!(
            self,
            Factor::Schools | Factor::Parks | Factor::Metro | Factor::Infrastructure
        )
    }
}

impl From<String> for Factor {
    fn from(value: String) -> Self {
        match value.as_str() {
            "price" => Factor::Price,
            "transport" => Factor::Transport,
            "metro" => Factor::Metro,
            "schools" => Factor::Schools,
            "parks" => Factor::Parks,
            "parking" => Factor::Parking,
            "noise" => Factor::Noise,
            "liquidity" => Factor::Liquidity,
            "constructionStage" => Factor::ConstructionStage,
            "ecology" => Factor::Ecology,
            "infrastructure" => Factor::Infrastructure,
            _ => Factor::Custom(value),
        }
    }
}

impl From<&str> for Factor {
    fn from(value: &str) -> Self {
        Factor::from(value.to_string())
    }
}

impl From<Factor> for String {
    fn from(value: Factor) -> Self {
        match value {
            Factor::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Life,
    Invest,
}

impl SearchMode {
    /// Weights used when the preference flow supplied none
    pub fn default_weights(self) -> Weights {
        let pairs: &[(Factor, f64)] = match self {
            SearchMode::Life => &[
                (Factor::Transport, 9.0),
                (Factor::Metro, 8.0),
                (Factor::Schools, 7.0),
                (Factor::Parks, 7.0),
                (Factor::Parking, 5.0),
                (Factor::Noise, 6.0),
                (Factor::Price, 8.0),
                (Factor::Ecology, 6.0),
                (Factor::Infrastructure, 7.0),
            ],
            SearchMode::Invest => &[
                (Factor::Price, 10.0),
                (Factor::Liquidity, 9.0),
                (Factor::ConstructionStage, 8.0),
                (Factor::Transport, 7.0),
                (Factor::Metro, 8.0),
                (Factor::Infrastructure, 7.0),
                (Factor::Parks, 5.0),
                (Factor::Ecology, 4.0),
            ],
        };
        pairs.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealType {
    #[default]
    Sale,
    Rent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    New,
    Secondary,
    #[default]
    Any,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Car,
    #[default]
    Public,
    Walk,
}

impl TransportMode {
    /// Average city speed in km/h
    pub fn speed_kmh(self) -> f64 {
        match self {
            TransportMode::Car => 30.0,
            TransportMode::Public => 25.0,
            TransportMode::Walk => 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// A place the user travels to regularly
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommutePoint {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_importance")]
    pub time_importance: f64,
}

fn default_importance() -> f64 { 1.0 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoQuery {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub districts: Vec<String>,
    #[serde(default)]
    pub commute_points: Vec<CommutePoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingFilters {
    #[serde(default)]
    pub rooms: Vec<u32>,
    #[serde(default)]
    pub area_min: Option<f64>,
    #[serde(default)]
    pub area_max: Option<f64>,
    #[serde(default)]
    pub new_building: Option<bool>,
    #[serde(default)]
    pub parking_required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentFilters {
    #[serde(default)]
    pub deposit_max: Option<f64>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub furnished: Option<bool>,
    #[serde(default)]
    pub pets_allowed: Option<bool>,
    #[serde(default)]
    pub utilities_included: Option<bool>,
}

/// A user's search and preference criteria, built once per request
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    #[validate(custom(function = "validate_geo"))]
    pub geo: GeoQuery,
    #[serde(default)]
    pub transport_mode: TransportMode,
    #[serde(default)]
    pub filters: ListingFilters,
    #[serde(default)]
    pub deal_type: DealType,
    #[serde(default)]
    pub property_type: PropertyType,
    #[serde(default)]
    #[validate(custom(function = "validate_weights"))]
    pub weights: Weights,
    #[serde(default)]
    pub rent: Option<RentFilters>,
}

impl Query {
    /// Weight requested for a factor, 0 when absent
    pub fn weight(&self, factor: &Factor) -> f64 {
        self.weights.get(factor).copied().unwrap_or(0.0)
    }

    /// Factors the user actually cares about
    pub fn weighted_factors(&self) -> impl Iterator<Item = &Factor> {
        self.weights
            .iter()
            .filter(|(_, weight)| **weight != 0.0)
            .map(|(factor, _)| factor)
    }

    pub fn needs_enrichment(&self) -> bool {
        self.weighted_factors().any(Factor::needs_enrichment)
    }

    /// Copy of this query with mode defaults filled in when no weights were given
    pub fn with_default_weights(&self) -> Query {
        let mut query = self.clone();
        if query.weights.is_empty() {
            query.weights = query.mode.default_weights();
        }
        query
    }
}

fn validate_weights(weights: &Weights) -> Result<(), ValidationError> {
    for weight in weights.values() {
        if !weight.is_finite() || *weight < WEIGHT_MIN || *weight > WEIGHT_MAX {
            return Err(ValidationError::new("weight_out_of_range"));
        }
    }
    Ok(())
}

fn validate_geo(geo: &GeoQuery) -> Result<(), ValidationError> {
    for point in &geo.commute_points {
        if !point.time_importance.is_finite() || point.time_importance < 0.0 {
            return Err(ValidationError::new("negative_commute_importance"));
        }
    }
    Ok(())
}

/// Canonical listing record shared by every provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub provider: String,
    pub external_id: String,
    pub title: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub price: f64,
    pub rooms: u32,
    pub area: f64,
    #[serde(default)]
    pub floor: i32,
    #[serde(default)]
    pub total_floors: i32,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub has_parking: bool,
    #[serde(default)]
    pub is_new_building: bool,
    #[serde(default)]
    pub developer: Option<String>,
    #[serde(default)]
    pub deal_type: Option<DealType>,
    #[serde(default)]
    pub property_type: Option<PropertyType>,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Catalog identity: `provider:external_id`
    pub fn id(&self) -> String {
        format!("{}:{}", self.provider, self.external_id)
    }

    /// Adapters leave `(0, 0)` when upstream sent no coordinates
    pub fn has_coordinates(&self) -> bool {
        !(self.lat == 0.0 && self.lng == 0.0)
    }
}

/// Nearby-amenity facts for one listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentRecord {
    pub listing_id: String,
    pub schools_count: u32,
    pub parks_count: u32,
    pub metro_stations: u32,
    /// Distance to the closest metro station in meters
    #[serde(default)]
    pub nearest_metro_m: Option<f64>,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    pub fn is_fresh(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.fetched_at) < ttl
    }

    pub fn amenity_count(&self) -> u32 {
        self.schools_count + self.parks_count + self.metro_stations
    }
}

/// A scored listing for one query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub listing_id: String,
    pub listing: Listing,
    pub match_score: f64,
    pub breakdown: MatchBreakdown,
    pub explanation: String,
}
