use super::{
    ensure_listing_shape, fallback_title, id_string, int_field, normalize_area, normalize_price,
    normalize_rooms, parse_deal_type, parse_property_type, str_field, ListingProvider, ProviderError,
};
use crate::models::{DealType, Listing, PropertyType, Query};
use crate::services::http::{RequestOptions, RetryClient};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

const SEARCH_LIMIT: u32 = 100;
const MAX_PHOTOS: usize = 5;

/// Avito listings API (bearer token)
pub struct AvitoProvider {
    client: RetryClient,
    base_url: String,
    api_key: String,
}

impl AvitoProvider {
    pub fn new(client: RetryClient, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn search_options(&self, query: &Query) -> RequestOptions {
        let filters = &query.filters;
        let rooms = (!filters.rooms.is_empty()).then(|| {
            filters
                .rooms
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        });
        let property_type = match query.property_type {
            PropertyType::New => Some("new"),
            PropertyType::Secondary => Some("secondary"),
            PropertyType::Any => None,
        };
        let deal_type = match query.deal_type {
            DealType::Sale => "sale",
            DealType::Rent => "rent",
        };

        RequestOptions::new()
            .bearer(&self.api_key)
            .query_opt("city", Some(&query.geo.city).filter(|c| !c.is_empty()))
            .query_opt("price_min", query.budget.min)
            .query_opt("price_max", query.budget.max)
            .query_opt("rooms", rooms)
            .query_opt("area_min", filters.area_min)
            .query_opt("area_max", filters.area_max)
            .query_opt("property_type", property_type)
            .query("deal_type", deal_type)
            .query_opt("new_building", filters.new_building)
            .query_opt("parking", filters.parking_required.then_some(true))
            .query("limit", SEARCH_LIMIT)
    }

    fn normalize_item(item: &Value) -> Listing {
        let rooms = normalize_rooms(item.get("rooms").unwrap_or(&Value::Null));
        let area = normalize_area(item.get("area").unwrap_or(&Value::Null));
        let location = item.get("location");
        let property_type = str_field(item, "property_type");
        let now = Utc::now();

        let mut listing = Listing {
            provider: "avito".to_string(),
            external_id: id_string(item.get("id").unwrap_or(&Value::Null)),
            title: str_field(item, "title").unwrap_or_else(|| fallback_title(rooms, area)),
            address: str_field(item, "address").unwrap_or_default(),
            lat: location.and_then(|l| l.get("lat")).and_then(Value::as_f64).unwrap_or(0.0),
            lng: location.and_then(|l| l.get("lng")).and_then(Value::as_f64).unwrap_or(0.0),
            price: normalize_price(item.get("price").unwrap_or(&Value::Null)),
            rooms,
            area,
            floor: int_field(item, "floor").unwrap_or(0),
            total_floors: int_field(item, "floors").unwrap_or(0),
            year: int_field(item, "year"),
            stage: None,
            photos: item
                .get("images")
                .and_then(Value::as_array)
                .map(|images| {
                    images
                        .iter()
                        .filter_map(|i| i.get("url").and_then(Value::as_str))
                        .take(MAX_PHOTOS)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            description: str_field(item, "description").unwrap_or_default(),
            has_parking: item.get("parking").and_then(Value::as_bool).unwrap_or(false),
            is_new_building: property_type.as_deref() == Some("new"),
            developer: None,
            deal_type: str_field(item, "deal_type").as_deref().and_then(parse_deal_type),
            property_type: property_type.as_deref().and_then(parse_property_type),
            url: str_field(item, "url"),
            created_at: now,
            updated_at: now,
        };

        ensure_listing_shape(&mut listing);
        listing
    }
}

#[async_trait]
impl ListingProvider for AvitoProvider {
    fn name(&self) -> &str {
        "avito"
    }

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError> {
        let url = format!("{}/search", self.base_url);
        let body: Value = self.client.get_json(&url, &self.search_options(query)).await?;

        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("Missing items array".to_string()))?;

        Ok(items.iter().map(Self::normalize_item).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError> {
        let url = format!("{}/items/{}", self.base_url, urlencoding::encode(id));
        let opts = RequestOptions::new().bearer(&self.api_key);

        match self.client.get_json::<Value>(&url, &opts).await {
            Ok(Value::Null) => Ok(None),
            Ok(item) => Ok(Some(Self::normalize_item(&item))),
            Err(e) => {
                let err = ProviderError::from(e);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }
}
