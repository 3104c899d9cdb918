use super::{
    ensure_listing_shape, fallback_title, id_string, int_field, normalize_area, normalize_price,
    normalize_rooms, str_field, ListingProvider, ProviderError,
};
use crate::models::{DealType, Listing, PropertyType, Query};
use crate::services::http::{RequestOptions, RetryClient};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

const SEARCH_LIMIT: u32 = 50;
const ID_PREFIX: &str = "domclick_";

/// DomClick partner API (api key + partner id as query parameters)
pub struct DomClickProvider {
    client: RetryClient,
    base_url: String,
    api_key: String,
    partner_id: Option<String>,
}

impl DomClickProvider {
    pub fn new(client: RetryClient, base_url: String, api_key: String, partner_id: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            partner_id,
        }
    }

    fn auth_options(&self) -> RequestOptions {
        RequestOptions::new()
            .query("api_key", &self.api_key)
            .query_opt("partner_id", self.partner_id.as_ref())
    }

    fn search_options(&self, query: &Query) -> RequestOptions {
        let filters = &query.filters;
        let offer_type = match query.property_type {
            PropertyType::New => Some("primary"),
            PropertyType::Secondary => Some("secondary"),
            PropertyType::Any => None,
        };
        let join = |items: Vec<String>| (!items.is_empty()).then(|| items.join(","));

        self.auth_options()
            .query(
                "deal_type",
                match query.deal_type {
                    DealType::Sale => "sale",
                    DealType::Rent => "rent",
                },
            )
            .query_opt("offer_type", offer_type)
            .query_opt("region", Some(&query.geo.city).filter(|c| !c.is_empty()))
            .query_opt("district", join(query.geo.districts.clone()))
            .query_opt("rooms_count", join(filters.rooms.iter().map(u32::to_string).collect()))
            .query_opt("price_min", query.budget.min)
            .query_opt("price_max", query.budget.max)
            .query_opt("area_min", filters.area_min)
            .query_opt("area_max", filters.area_max)
            .query("sort", "price")
            .query("limit", SEARCH_LIMIT)
    }

    fn normalize_offer(offer: &Value) -> Listing {
        let address = offer.get("address");
        let coordinates = address.and_then(|a| a.get("coordinates"));
        let coordinate = |key: &str| coordinates.and_then(|c| c.get(key)).and_then(Value::as_f64).unwrap_or(0.0);
        let nested_value = |key: &str| offer.get(key).and_then(|v| v.get("value")).unwrap_or(&Value::Null);

        let rooms = normalize_rooms(offer.get("roomsCount").unwrap_or(&Value::Null));
        let area = normalize_area(nested_value("area"));
        let is_new_building = offer.get("isNewBuilding").and_then(Value::as_bool).unwrap_or(false);
        let raw_id = id_string(offer.get("id").unwrap_or(&Value::Null));
        let now = Utc::now();

        let mut listing = Listing {
            provider: "domclick".to_string(),
            external_id: raw_id.trim_start_matches(ID_PREFIX).to_string(),
            title: str_field(offer, "title").unwrap_or_else(|| fallback_title(rooms, area)),
            address: address
                .and_then(|a| str_field(a, "fullAddress"))
                .unwrap_or_default(),
            lat: coordinate("latitude"),
            lng: coordinate("longitude"),
            price: normalize_price(nested_value("price")),
            rooms,
            area,
            floor: int_field(offer, "floor").unwrap_or(0),
            total_floors: int_field(offer, "floorsCount").unwrap_or(0),
            year: int_field(offer, "buildingYear"),
            stage: None,
            photos: offer
                .get("photos")
                .and_then(Value::as_array)
                .map(|photos| photos.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            description: str_field(offer, "description").unwrap_or_default(),
            has_parking: false,
            is_new_building,
            developer: None,
            deal_type: match str_field(offer, "type").as_deref() {
                Some("sale") => Some(DealType::Sale),
                Some("rent") => Some(DealType::Rent),
                _ => None,
            },
            property_type: Some(if is_new_building {
                PropertyType::New
            } else {
                PropertyType::Secondary
            }),
            url: str_field(offer, "url"),
            created_at: now,
            updated_at: now,
        };

        ensure_listing_shape(&mut listing);
        listing
    }
}

#[async_trait]
impl ListingProvider for DomClickProvider {
    fn name(&self) -> &str {
        "domclick"
    }

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError> {
        let url = format!("{}/offers/search", self.base_url);
        let body: Value = self.client.get_json(&url, &self.search_options(query)).await?;

        let offers = body
            .get("offers")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("Missing offers array".into()))?;

        Ok(offers.iter().map(Self::normalize_offer).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError> {
        let offer_id = id.trim_start_matches(ID_PREFIX);
        let url = format!("{}/offers/{}", self.base_url, urlencoding::encode(offer_id));

        let body: Value = match self.client.get_json(&url, &self.auth_options()).await {
            Ok(body) => body,
            Err(e) => {
                let err = ProviderError::from(e);
                return if err.is_not_found() { Ok(None) } else { Err(err) };
            }
        };

        Ok(body
            .get("offer")
            .filter(|offer| !offer.is_null())
            .map(Self::normalize_offer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::http::{per_minute_limiter, RetryPolicy};
    use mockito::Matcher;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_provider(base_url: String) -> DomClickProvider {
        let policy = RetryPolicy {
            retries: 0,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(1),
        };
        let client =
            RetryClient::new(Arc::new(per_minute_limiter(6000)), policy, Duration::from_secs(5)).unwrap();
        DomClickProvider::new(client, base_url, "key".to_string(), Some("partner-1".to_string()))
    }

    const OFFER: &str = r#"{
        "id": 555,
        "type": "sale",
        "address": {
            "fullAddress": "Москва, Ленинский пр. 10",
            "district": "Гагаринский",
            "coordinates": {"latitude": 55.71, "longitude": 37.58}
        },
        "price": {"value": 14200000, "currency": "RUB"},
        "area": {"value": "63.0 м²"},
        "roomsCount": 3,
        "floor": 7,
        "floorsCount": 17,
        "photos": ["1.jpg"],
        "isNewBuilding": true,
        "buildingYear": 2024
    }"#;

    #[tokio::test]
    async fn test_search_maps_offers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/offers/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api_key".into(), "key".into()),
                Matcher::UrlEncoded("partner_id".into(), "partner-1".into()),
                Matcher::UrlEncoded("offer_type".into(), "primary".into()),
            ]))
            .with_body(format!(r#"{{"offers": [{}], "totalCount": 1}}"#, OFFER))
            .create_async()
            .await;

        let provider = create_provider(server.url());
        let query = Query {
            property_type: PropertyType::New,
            ..Query::default()
        };
        let listings = provider.search(&query).await.unwrap();
        mock.assert_async().await;

        assert_eq!(listings.len(), 1);
        let listing = &listings[0];
        assert_eq!(listing.id(), "domclick:555");
        assert_eq!(listing.price, 14_200_000.0);
        assert_eq!(listing.area, 63.0);
        assert_eq!(listing.rooms, 3);
        assert_eq!((listing.lat, listing.lng), (55.71, 37.58));
        assert_eq!(listing.year, Some(2024));
        assert_eq!(listing.property_type, Some(PropertyType::New));
        assert_eq!(listing.title, "3-room apartment, 63 m²");
    }

    #[tokio::test]
    async fn test_get_strips_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/offers/555")
            .match_query(Matcher::UrlEncoded("api_key".into(), "key".into()))
            .with_body(format!(r#"{{"offer": {}}}"#, OFFER))
            .create_async()
            .await;

        let provider = create_provider(server.url());
        let listing = provider.get("domclick_555").await.unwrap().unwrap();

        mock.assert_async().await;
        assert_eq!(listing.external_id, "555");
    }

    #[tokio::test]
    async fn test_search_without_offers_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/offers/search")
            .match_query(Matcher::Any)
            .with_body(r#"{"error": "quota"}"#)
            .create_async()
            .await;

        let provider = create_provider(server.url());
        assert!(matches!(
            provider.search(&Query::default()).await,
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}
