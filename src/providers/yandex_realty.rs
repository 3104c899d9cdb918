use super::{
    ensure_listing_shape, fallback_title, id_string, int_field, normalize_area, normalize_price,
    normalize_rooms, parse_deal_type, str_field, ListingProvider, ProviderError,
};
use crate::models::{DealType, Listing, PropertyType, Query};
use crate::services::http::{RequestBody, RequestOptions, RetryClient};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};

const PAGE_SIZE: u32 = 20;
const MAX_PHOTOS: usize = 5;
const ID_PREFIX: &str = "yandex_";

/// Yandex Realty partner API
pub struct YandexRealtyProvider {
    client: RetryClient,
    base_url: String,
    api_key: String,
    partner_id: Option<String>,
}

impl YandexRealtyProvider {
    pub fn new(client: RetryClient, base_url: String, api_key: String, partner_id: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            partner_id,
        }
    }

    fn options(&self) -> RequestOptions {
        let opts = RequestOptions::new().bearer(&self.api_key);
        match &self.partner_id {
            Some(partner_id) => opts.header("X-Partner-Id", partner_id),
            None => opts,
        }
    }

    fn search_body(query: &Query) -> Value {
        let filters = &query.filters;
        let mut body = Map::new();

        body.insert(
            "type".into(),
            json!(match query.deal_type {
                DealType::Sale => "sell",
                DealType::Rent => "rent",
            }),
        );
        body.insert("category".into(), json!(["apartment", "house"]));
        body.insert("page".into(), json!(1));
        body.insert("pageSize".into(), json!(PAGE_SIZE));

        if let Some(min) = query.budget.min {
            body.insert("priceMin".into(), json!(min));
        }
        if let Some(max) = query.budget.max {
            body.insert("priceMax".into(), json!(max));
        }
        if !filters.rooms.is_empty() {
            body.insert("roomsTotal".into(), json!(filters.rooms));
        }
        if let Some(area_min) = filters.area_min {
            body.insert("areaMin".into(), json!(area_min));
        }
        if let Some(area_max) = filters.area_max {
            body.insert("areaMax".into(), json!(area_max));
        }
        if !query.geo.districts.is_empty() {
            body.insert("district".into(), json!(query.geo.districts));
        }
        if query.property_type == PropertyType::New || query.filters.new_building == Some(true) {
            body.insert("newFlat".into(), json!(true));
        }

        Value::Object(body)
    }

    fn normalize_offer(item: &Value) -> Listing {
        let location = item.get("location");
        let coordinate = |key: &str| {
            location
                .and_then(|l| l.get("coordinates"))
                .and_then(|c| c.get(key))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };
        let nested_value = |key: &str| item.get(key).and_then(|v| v.get("value")).unwrap_or(&Value::Null);

        let rooms = normalize_rooms(item.get("rooms").unwrap_or(&Value::Null));
        let area = normalize_area(nested_value("area"));
        let raw_id = id_string(item.get("offerId").unwrap_or(&Value::Null));
        let is_new_building = item.get("newFlat").and_then(Value::as_bool).unwrap_or(false);
        let now = Utc::now();

        let mut listing = Listing {
            provider: "yandex_realty".to_string(),
            external_id: raw_id.trim_start_matches(ID_PREFIX).to_string(),
            title: str_field(item, "title").unwrap_or_else(|| fallback_title(rooms, area)),
            address: location
                .and_then(|l| str_field(l, "address"))
                .unwrap_or_default(),
            lat: coordinate("latitude"),
            lng: coordinate("longitude"),
            price: normalize_price(nested_value("price")),
            rooms,
            area,
            floor: int_field(item, "floor").unwrap_or(0),
            total_floors: int_field(item, "floorsTotal").unwrap_or(0),
            year: int_field(item, "builtYear"),
            stage: str_field(item, "buildingState"),
            photos: item
                .get("images")
                .and_then(Value::as_array)
                .map(|images| {
                    images
                        .iter()
                        .filter_map(Value::as_str)
                        .take(MAX_PHOTOS)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            description: str_field(item, "description").unwrap_or_default(),
            has_parking: item.get("parking").and_then(Value::as_bool).unwrap_or(false),
            is_new_building,
            developer: str_field(item, "developer"),
            deal_type: str_field(item, "type").as_deref().and_then(parse_deal_type),
            property_type: None,
            url: str_field(item, "url"),
            created_at: now,
            updated_at: now,
        };

        ensure_listing_shape(&mut listing);
        listing
    }
}

#[async_trait]
impl ListingProvider for YandexRealtyProvider {
    fn name(&self) -> &str {
        "yandex_realty"
    }

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError> {
        let url = format!("{}/offers/search", self.base_url);
        let body = RequestBody::Json(Self::search_body(query));
        let response: Value = self.client.post_json(&url, &body, &self.options()).await?;

        let offers = response
            .get("offers")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("Missing offers array".into()))?;

        Ok(offers.iter().map(Self::normalize_offer).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError> {
        let offer_id = id.trim_start_matches(ID_PREFIX);
        let url = format!("{}/offers/{}", self.base_url, urlencoding::encode(offer_id));

        match self.client.get_json::<Value>(&url, &self.options()).await {
            Ok(Value::Null) => Ok(None),
            Ok(item) => Ok(Some(Self::normalize_offer(&item))),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Budget;
    use crate::services::http::{per_minute_limiter, RetryPolicy};
    use mockito::Matcher;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_provider(base_url: String) -> YandexRealtyProvider {
        let policy = RetryPolicy {
            retries: 0,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(1),
        };
        let client =
            RetryClient::new(Arc::new(per_minute_limiter(6000)), policy, Duration::from_secs(5)).unwrap();
        YandexRealtyProvider::new(client, base_url, "secret".to_string(), None)
    }

    #[test]
    fn test_search_body_only_carries_present_filters() {
        let mut query = Query {
            budget: Budget { min: Some(5_000_000.0), max: None },
            deal_type: DealType::Rent,
            ..Query::default()
        };
        query.filters.rooms = vec![2];

        let body = YandexRealtyProvider::search_body(&query);

        assert_eq!(body["type"], "rent");
        assert_eq!(body["priceMin"], 5_000_000.0);
        assert_eq!(body["roomsTotal"], json!([2]));
        assert!(body.get("priceMax").is_none());
        assert!(body.get("newFlat").is_none());
    }

    #[tokio::test]
    async fn test_search_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/offers/search")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(json!({"type": "sell", "pageSize": 20})))
            .with_body(
                r#"{"offers": [{
                    "offerId": "yandex_9001",
                    "type": "sell",
                    "location": {"address": "Арбат 5", "coordinates": {"latitude": 55.75, "longitude": 37.59}},
                    "price": {"value": 21000000, "currency": "RUB"},
                    "area": {"value": 80},
                    "rooms": 3,
                    "images": ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg", "f.jpg"],
                    "description": "Bright flat"
                }]}"#,
            )
            .create_async()
            .await;

        let provider = create_provider(server.url());
        let listings = provider.search(&Query::default()).await.unwrap();
        mock.assert_async().await;

        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].id(), "yandex_realty:9001");
        assert_eq!(listings[0].price, 21_000_000.0);
        assert_eq!(listings[0].photos.len(), MAX_PHOTOS);
        assert_eq!(listings[0].deal_type, Some(DealType::Sale));
    }
}
