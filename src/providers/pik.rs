use super::{
    ensure_listing_shape, id_string, int_field, normalize_area, normalize_price, normalize_rooms,
    str_field, ListingProvider, ProviderError,
};
use crate::models::{DealType, Listing, PropertyType, Query};
use crate::services::http::{RequestOptions, RetryClient};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

const MAX_PHOTOS: usize = 5;
const ID_PREFIX: &str = "pik_";
const DEVELOPER: &str = "ГК ПИК";
const ON_SALE: &str = "on_sale";

/// PIK developer partner API
///
/// Search returns housing complexes, each with its layouts; every layout on
/// sale becomes one listing in a new building.
pub struct PikProvider {
    client: RetryClient,
    base_url: String,
    partner_id: String,
    api_key: Option<String>,
}

impl PikProvider {
    pub fn new(client: RetryClient, base_url: String, partner_id: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            partner_id,
            api_key,
        }
    }

    fn options(&self) -> RequestOptions {
        let opts = RequestOptions::new().query("partner_id", &self.partner_id);
        match self.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => opts.bearer(key),
            None => opts,
        }
    }

    fn search_options(&self, query: &Query) -> RequestOptions {
        let filters = &query.filters;
        let join = |values: Vec<String>| (!values.is_empty()).then(|| values.join(","));

        self.options()
            .query("city", "moscow")
            .query("status", ON_SALE)
            .query_opt("district", join(query.geo.districts.clone()))
            .query_opt("rooms", join(filters.rooms.iter().map(u32::to_string).collect()))
            .query_opt("price_min", query.budget.min)
            .query_opt("price_max", query.budget.max)
            .query_opt("area_min", filters.area_min)
            .query_opt("area_max", filters.area_max)
    }

    /// One flat from a complex record and one of its layouts
    fn normalize_layout(complex_id: &Value, complex: &Value, layout: &Value) -> Listing {
        let coordinates = complex.get("coordinates");
        let coordinate = |key: &str| {
            coordinates
                .and_then(|c| c.get(key))
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
        };

        let complex_name = str_field(complex, "name").unwrap_or_default();
        let layout_id = id_string(layout.get("id").unwrap_or(&Value::Null));
        let rooms = normalize_rooms(layout.get("rooms").unwrap_or(&Value::Null));
        let floor = int_field(layout, "floor").unwrap_or(0);
        let url = (!layout_id.is_empty()).then(|| {
            format!(
                "https://www.pik.ru/projects/{}/flats/{}",
                id_string(complex_id),
                layout_id
            )
        });
        let now = Utc::now();

        let mut listing = Listing {
            provider: "pik".to_string(),
            external_id: layout_id.trim_start_matches(ID_PREFIX).to_string(),
            title: format!("{}-room apartment in {}", rooms, complex_name),
            address: str_field(complex, "address").unwrap_or_default(),
            lat: coordinate("lat"),
            lng: coordinate("lng"),
            price: normalize_price(layout.get("price").unwrap_or(&Value::Null)),
            rooms,
            area: normalize_area(layout.get("area").unwrap_or(&Value::Null)),
            floor,
            total_floors: int_field(layout, "floors_total").unwrap_or(0),
            year: None,
            stage: None,
            photos: layout
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
            description: str_field(layout, "description")
                .unwrap_or_else(|| format!("New PIK flat in {}, floor {}.", complex_name, floor)),
            has_parking: false,
            is_new_building: true,
            developer: Some(DEVELOPER.to_string()),
            deal_type: Some(DealType::Sale),
            property_type: Some(PropertyType::New),
            url,
            created_at: now,
            updated_at: now,
        };

        ensure_listing_shape(&mut listing);
        listing
    }

    fn flatten_complexes(complexes: &[Value]) -> Vec<Listing> {
        complexes
            .iter()
            .flat_map(|entry| {
                let complex_id = entry.get("id").unwrap_or(&Value::Null);
                let complex = entry.get("complex").unwrap_or(&Value::Null);
                entry
                    .get("layouts")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter(|layout| layout.get("status").and_then(Value::as_str) == Some(ON_SALE))
                    .map(move |layout| Self::normalize_layout(complex_id, complex, layout))
            })
            .collect()
    }
}

#[async_trait]
impl ListingProvider for PikProvider {
    fn name(&self) -> &str {
        "pik"
    }

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError> {
        let url = format!("{}/complexes/search", self.base_url);
        let body: Value = self.client.get_json(&url, &self.search_options(query)).await?;

        let complexes = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::InvalidResponse("Missing data array".into()))?;

        let listings = Self::flatten_complexes(complexes);
        tracing::debug!("PIK: {} complexes, {} layouts on sale", complexes.len(), listings.len());
        Ok(listings)
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError> {
        let layout_id = id.trim_start_matches(ID_PREFIX);
        let url = format!("{}/layouts/{}", self.base_url, urlencoding::encode(layout_id));

        match self.client.get_json::<Value>(&url, &self.options()).await {
            Ok(body) => Ok(body.get("data").filter(|data| !data.is_null()).map(|data| {
                let complex = data.get("complex").unwrap_or(&Value::Null);
                let complex_id = complex.get("id").unwrap_or(&Value::Null);
                Self::normalize_layout(complex_id, complex, data)
            })),
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
