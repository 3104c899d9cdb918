use super::{
    ensure_listing_shape, fallback_title, id_string, int_field, normalize_area, normalize_price,
    normalize_rooms, parse_deal_type, parse_property_type, str_field, ListingProvider, ProviderError,
};
use crate::models::{DealType, Listing, PropertyType, Query};
use crate::services::http::{RequestBody, RequestOptions, RetryClient};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

const MAX_PHOTOS: usize = 5;
const PARTNER_PAGE_SIZE: u32 = 30;
const SOURCE_SEARCH_LIMIT: u32 = 100;
const ID_PREFIX: &str = "cian_";

/// Moscow in CIAN's region numbering
const DEFAULT_REGION: u32 = 1;

fn photo_urls(item: &Value, key: &str, url_field: Option<&str>) -> Vec<String> {
    item.get(key)
        .and_then(Value::as_array)
        .map(|photos| {
            photos
                .iter()
                .filter_map(|p| match url_field {
                    Some(field) => p.get(field).and_then(Value::as_str),
                    None => p.as_str(),
                })
                .take(MAX_PHOTOS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn not_found_is_none(result: Result<Option<Listing>, ProviderError>) -> Result<Option<Listing>, ProviderError> {
    match result {
        Err(e) if e.is_not_found() => Ok(None),
        other => other,
    }
}

/// CIAN partner export API (bearer token, JSON search body)
pub struct CianPartnerProvider {
    client: RetryClient,
    base_url: String,
    api_key: String,
}

impl CianPartnerProvider {
    pub fn new(client: RetryClient, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn search_body(query: &Query) -> Value {
        let filters = &query.filters;
        let mut body = Map::new();

        body.insert(
            "deal_type".into(),
            json!(match query.deal_type {
                DealType::Sale => "sale",
                DealType::Rent => "rent",
            }),
        );
        body.insert("offer_type".into(), json!(["flat"]));
        body.insert("region".into(), json!(DEFAULT_REGION));
        body.insert("page".into(), json!(1));
        body.insert("limit".into(), json!(PARTNER_PAGE_SIZE));
        body.insert("sort".into(), json!("price_asc"));

        if let Some(min) = query.budget.min.filter(|v| *v > 0.0) {
            body.insert("price_min".into(), json!(min));
        }
        if let Some(max) = query.budget.max.filter(|v| *v > 0.0) {
            body.insert("price_max".into(), json!(max));
        }
        if !filters.rooms.is_empty() {
            // CIAN lumps four rooms and more together
            let rooms: Vec<String> = filters
                .rooms
                .iter()
                .map(|r| if *r >= 4 { "4+".to_string() } else { r.to_string() })
                .collect();
            body.insert("room".into(), json!(rooms));
        }
        if let Some(area_min) = filters.area_min {
            body.insert("total_area_min".into(), json!(area_min));
        }
        if let Some(area_max) = filters.area_max {
            body.insert("total_area_max".into(), json!(area_max));
        }

        Value::Object(body)
    }

    fn normalize_offer(offer: &Value) -> Listing {
        let geo = offer.get("geo");
        let coordinate = |key: &str| {
            geo.and_then(|g| g.get("coordinates"))
                .and_then(|c| c.get(key))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };
        let building = offer.get("building").unwrap_or(&Value::Null);
        let category = str_field(offer, "category").unwrap_or_default();

        let rooms = normalize_rooms(offer.get("roomsCount").unwrap_or(&Value::Null));
        let area = normalize_area(offer.get("totalArea").unwrap_or(&Value::Null));
        let price = offer
            .get("bargainTerms")
            .and_then(|terms| terms.get("price"))
            .unwrap_or(&Value::Null);
        let raw_id = id_string(offer.get("cianId").unwrap_or(&Value::Null));
        let title = if category.starts_with("house") {
            format!("House, {} m²", area)
        } else {
            fallback_title(rooms, area)
        };
        let deal_type = if category.ends_with("Rent") {
            Some(DealType::Rent)
        } else if category.ends_with("Sale") {
            Some(DealType::Sale)
        } else {
            None
        };
        let now = Utc::now();

        let mut listing = Listing {
            provider: "cian_partner".to_string(),
            external_id: raw_id.trim_start_matches(ID_PREFIX).to_string(),
            title,
            address: geo.and_then(|g| str_field(g, "userInput")).unwrap_or_default(),
            lat: coordinate("lat"),
            lng: coordinate("lng"),
            price: normalize_price(price),
            rooms,
            area,
            floor: int_field(offer, "floorNumber").unwrap_or(0),
            total_floors: int_field(building, "floorsCount").unwrap_or(0),
            year: int_field(building, "buildYear"),
            stage: None,
            photos: photo_urls(offer, "photos", Some("fullUrl")),
            description: str_field(offer, "description").unwrap_or_default(),
            has_parking: false,
            is_new_building: false,
            developer: None,
            deal_type,
            property_type: None,
            url: str_field(offer, "fullUrl"),
            created_at: now,
            updated_at: now,
        };

        ensure_listing_shape(&mut listing);
        listing
    }
}

#[async_trait]
impl ListingProvider for CianPartnerProvider {
    fn name(&self) -> &str {
        "cian_partner"
    }

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError> {
        let url = format!("{}/export/offers", self.base_url);
        let body = RequestBody::Json(Self::search_body(query));
        let opts = RequestOptions::new().bearer(&self.api_key);
        let response: Value = self.client.post_json(&url, &body, &opts).await?;

        let offers = response
            .get("offers")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("Missing offers array".into()))?;

        Ok(offers.iter().map(Self::normalize_offer).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError> {
        let cian_id = id.trim_start_matches(ID_PREFIX);
        let url = format!("{}/offer/{}", self.base_url, urlencoding::encode(cian_id));
        let opts = RequestOptions::new().bearer(&self.api_key);

        let result = self
            .client
            .get_json::<Value>(&url, &opts)
            .await
            .map_err(ProviderError::from)
            .map(|body| match body.get("offer") {
                Some(offer) if !offer.is_null() => Some(Self::normalize_offer(offer)),
                _ => None,
            });

        not_found_is_none(result)
    }
}

/// CIAN listings feed (bearer token, query-string search)
pub struct CianSourceProvider {
    client: RetryClient,
    base_url: String,
    api_key: String,
}

impl CianSourceProvider {
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
            .query("limit", SOURCE_SEARCH_LIMIT)
    }

    fn normalize_item(item: &Value) -> Listing {
        let geo = item.get("geo");
        // Newer feed versions carry explicit rouble and total-area fields
        let price = item
            .get("price_rub")
            .filter(|v| !v.is_null())
            .or_else(|| item.get("price"))
            .unwrap_or(&Value::Null);
        let area_value = item
            .get("area_total")
            .filter(|v| !v.is_null())
            .or_else(|| item.get("area"))
            .unwrap_or(&Value::Null);

        let rooms = normalize_rooms(item.get("rooms").unwrap_or(&Value::Null));
        let area = normalize_area(area_value);
        let property_type = str_field(item, "property_type");
        let now = Utc::now();

        let mut listing = Listing {
            provider: "cian_source".to_string(),
            external_id: id_string(item.get("id").unwrap_or(&Value::Null)),
            title: str_field(item, "title").unwrap_or_else(|| fallback_title(rooms, area)),
            address: str_field(item, "address").unwrap_or_default(),
            lat: geo.and_then(|g| g.get("lat")).and_then(Value::as_f64).unwrap_or(0.0),
            lng: geo.and_then(|g| g.get("lng")).and_then(Value::as_f64).unwrap_or(0.0),
            price: normalize_price(price),
            rooms,
            area,
            floor: int_field(item, "floor").unwrap_or(0),
            total_floors: int_field(item, "floors_total").unwrap_or(0),
            year: int_field(item, "year"),
            stage: None,
            photos: photo_urls(item, "images", None),
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
impl ListingProvider for CianSourceProvider {
    fn name(&self) -> &str {
        "cian_source"
    }

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError> {
        let url = format!("{}/listings/search", self.base_url);
        let body: Value = self.client.get_json(&url, &self.search_options(query)).await?;

        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("Missing items array".into()))?;

        Ok(items.iter().map(Self::normalize_item).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError> {
        let url = format!("{}/listings/{}", self.base_url, urlencoding::encode(id));
        let opts = RequestOptions::new().bearer(&self.api_key);

        let result = self
            .client
            .get_json::<Value>(&url, &opts)
            .await
            .map_err(ProviderError::from)
            .map(|item| (!item.is_null()).then(|| Self::normalize_item(&item)));

        not_found_is_none(result)
    }
}
