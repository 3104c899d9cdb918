//! Listing sources
//!
//! Every upstream catalog is wrapped in a [`ListingProvider`] that maps its own
//! JSON into the canonical [`Listing`]. The [`AggregatingProvider`] fans out
//! to all of them and is itself a provider.

pub mod aggregator;
pub mod avito;
pub mod cian;
pub mod domclick;
pub mod memory;
pub mod pik;
pub mod yandex_realty;

pub use aggregator::AggregatingProvider;
pub use avito::AvitoProvider;
pub use cian::{CianPartnerProvider, CianSourceProvider};
pub use domclick::DomClickProvider;
pub use memory::MemoryProvider;
pub use pik::PikProvider;
pub use yandex_realty::YandexRealtyProvider;

use crate::core::{content_signature, geo_cell};
use crate::models::{DealType, Listing, PropertyType, Query};
use crate::services::http::ExternalServiceError;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when talking to a listing source
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] ExternalServiceError),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// True for a plain "no such item" answer from upstream
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ProviderError::Upstream(ExternalServiceError::ClientError { status: 404, .. })
        )
    }
}

/// A source of listings
#[async_trait]
pub trait ListingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError>;

    /// Look up one listing by the id this provider assigned it
    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError>;
}

/// Lenient numeric parse: JSON numbers pass through, strings such as
/// `"12 500 000 ₽"` keep only digits and dots. Anything else is 0.
pub fn normalize_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
            cleaned.parse().unwrap_or(0.0)
        }
        _ => 0.0,
    }
}

pub fn normalize_price(value: &Value) -> f64 {
    normalize_number(value)
}

pub fn normalize_area(value: &Value) -> f64 {
    normalize_number(value)
}

/// Room count from a number or the first digit run of a string (`"2-комн."`)
pub fn normalize_rooms(value: &Value) -> u32 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0) as u32,
        Value::String(s) => {
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().unwrap_or(0)
        }
        _ => 0,
    }
}

/// Ids arrive as numbers or strings
pub fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn int_field(value: &Value, key: &str) -> Option<i32> {
    value.get(key).and_then(Value::as_i64).map(|v| v as i32)
}

pub(crate) fn parse_deal_type(raw: &str) -> Option<DealType> {
    match raw.to_lowercase().as_str() {
        "sale" | "sell" => Some(DealType::Sale),
        "rent" => Some(DealType::Rent),
        _ => None,
    }
}

pub(crate) fn parse_property_type(raw: &str) -> Option<PropertyType> {
    match raw.to_lowercase().as_str() {
        "new" | "primary" => Some(PropertyType::New),
        "secondary" | "resale" => Some(PropertyType::Secondary),
        _ => None,
    }
}

/// Title used when the upstream record has none
pub(crate) fn fallback_title(rooms: u32, area: f64) -> String {
    if rooms == 0 {
        format!("Apartment, {} m²", area)
    } else {
        format!("{}-room apartment, {} m²", rooms, area)
    }
}

/// Stable id for a record upstream sent without one
///
/// Hashes the provider, content signature and grid cell, so the same record
/// keeps its id across fetches and distinct units never share one.
pub fn generated_id(listing: &Listing) -> String {
    let cell = geo_cell(listing.lat, listing.lng);
    let key = format!(
        "{}|{}|{}:{}",
        listing.provider,
        content_signature(listing),
        cell.lat,
        cell.lng
    );
    format!("gen-{}", Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()))
}

/// Log which required fields came back empty and were defaulted
///
/// The listing is kept either way; a missing id is replaced with
/// [`generated_id`]. Returns the names of the defaulted fields.
pub fn ensure_listing_shape(listing: &mut Listing) -> Vec<&'static str> {
    let mut missing = Vec::new();

    if listing.external_id.is_empty() {
        missing.push("id");
        listing.external_id = generated_id(listing);
    }
    if listing.title.trim().is_empty() {
        missing.push("title");
    }
    if listing.address.trim().is_empty() {
        missing.push("address");
    }
    if !listing.has_coordinates() {
        missing.push("coordinates");
    }
    if listing.price <= 0.0 {
        missing.push("price");
    }
    if listing.area <= 0.0 {
        missing.push("area");
    }

    if !missing.is_empty() {
        tracing::warn!(
            provider = %listing.provider,
            listing_id = %listing.id(),
            "Data quality: defaulted fields {}",
            missing.join(", ")
        );
    }

    missing
}
