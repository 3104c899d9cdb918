use crate::core::distance::haversine_meters;
use crate::services::http::{ExternalServiceError, RequestBody, RequestOptions, RetryClient};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Raw amenity counts around a point, as reported by one source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NearbyCounts {
    pub schools: u32,
    pub parks: u32,
    /// Distance in meters to every metro station found
    pub metro_distances_m: Vec<f64>,
}

impl NearbyCounts {
    pub fn nearest_metro_m(&self) -> Option<f64> {
        self.metro_distances_m.iter().copied().reduce(f64::min)
    }
}

/// A geo API that can count amenities around a point
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means the source is not usable here (e.g. no API key)
    async fn nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Result<Option<NearbyCounts>, ExternalServiceError>;
}

/// Yandex Maps organization search (primary)
pub struct YandexMapsSource {
    client: RetryClient,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GeoJsonResponse {
    #[serde(default)]
    features: Vec<GeoJsonFeature>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonFeature {
    geometry: GeoJsonGeometry,
}

#[derive(Debug, Deserialize)]
struct GeoJsonGeometry {
    /// `[lng, lat]`
    coordinates: Vec<f64>,
}

impl YandexMapsSource {
    pub const DEFAULT_URL: &'static str = "https://search-maps.yandex.ru/v1/";

    pub fn new(client: RetryClient, base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self { client, base_url, api_key, timeout }
    }

    /// `(lng, lat)` extent in degrees of a box `2 * radius_m` across
    ///
    /// A degree of longitude shrinks with `cos(lat)`; near the poles the
    /// factor is floored so the box stays finite.
    fn search_span(lat: f64, radius_m: f64) -> (f64, f64) {
        let lat_span = radius_m * 2.0 / 111_000.0;
        let lng_span = lat_span / lat.to_radians().cos().max(0.01);
        (lng_span, lat_span)
    }

    async fn search(
        &self,
        api_key: &str,
        text: &str,
        lat: f64,
        lng: f64,
        radius_m: f64,
        results: u32,
    ) -> Result<GeoJsonResponse, ExternalServiceError> {
        let (lng_span, lat_span) = Self::search_span(lat, radius_m);
        let opts = RequestOptions::new()
            .query("text", text)
            .query("ll", format!("{},{}", lng, lat))
            .query("spn", format!("{:.5},{:.5}", lng_span, lat_span))
            .query("rspn", 1)
            .query("type", "biz")
            .query("results", results)
            .query("lang", "ru_RU")
            .query("apikey", api_key)
            .timeout(self.timeout);

        self.client.get_json(&self.base_url, &opts).await
    }
}

#[async_trait]
impl EnrichmentSource for YandexMapsSource {
    fn name(&self) -> &str {
        "yandex_maps"
    }

    async fn nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Result<Option<NearbyCounts>, ExternalServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(None);
        };

        let (schools, parks, metro) = tokio::try_join!(
            self.search(api_key, "школа", lat, lng, radius_m, 200),
            self.search(api_key, "парк", lat, lng, radius_m, 200),
            self.search(api_key, "метро", lat, lng, radius_m, 50),
        )?;

        let metro_distances_m = metro
            .features
            .iter()
            .filter(|f| f.geometry.coordinates.len() >= 2)
            .map(|f| haversine_meters(lat, lng, f.geometry.coordinates[1], f.geometry.coordinates[0]))
            .collect();

        Ok(Some(NearbyCounts {
            schools: schools.features.len() as u32,
            parks: parks.features.len() as u32,
            metro_distances_m,
        }))
    }
}

/// 2GIS catalog search (secondary)
pub struct DgisSource {
    client: RetryClient,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct DgisResponse {
    #[serde(default)]
    result: Option<DgisResult>,
}

#[derive(Debug, Deserialize)]
struct DgisResult {
    #[serde(default)]
    items: Vec<DgisItem>,
}

#[derive(Debug, Deserialize)]
struct DgisItem {
    #[serde(default)]
    point: Option<DgisPoint>,
}

#[derive(Debug, Deserialize)]
struct DgisPoint {
    lat: f64,
    lon: f64,
}

const DGIS_RUBRIC_SCHOOLS: &str = "156";
const DGIS_RUBRIC_PARKS: &str = "161";
const DGIS_RUBRIC_METRO: &str = "189";

impl DgisSource {
    pub const DEFAULT_URL: &'static str = "https://catalog.api.2gis.com/3.0/items";

    pub fn new(client: RetryClient, base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self { client, base_url, api_key, timeout }
    }

    async fn rubric(
        &self,
        api_key: &str,
        rubric_id: &str,
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Result<Vec<DgisItem>, ExternalServiceError> {
        let opts = RequestOptions::new()
            .query("key", api_key)
            .query("lat", lat)
            .query("lon", lng)
            .query("radius", radius_m.round() as u32)
            .query("rubric_id", rubric_id)
            .query("fields", "items.point")
            .query("page_size", 50)
            .timeout(self.timeout);

        let response: DgisResponse = self.client.get_json(&self.base_url, &opts).await?;
        Ok(response.result.map(|r| r.items).unwrap_or_default())
    }
}

#[async_trait]
impl EnrichmentSource for DgisSource {
    fn name(&self) -> &str {
        "2gis"
    }

    async fn nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Result<Option<NearbyCounts>, ExternalServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(None);
        };

        let (schools, parks, metro) = tokio::try_join!(
            self.rubric(api_key, DGIS_RUBRIC_SCHOOLS, lat, lng, radius_m),
            self.rubric(api_key, DGIS_RUBRIC_PARKS, lat, lng, radius_m),
            self.rubric(api_key, DGIS_RUBRIC_METRO, lat, lng, radius_m),
        )?;

        let metro_distances_m = metro
            .iter()
            .filter_map(|item| item.point.as_ref())
            .map(|p| haversine_meters(lat, lng, p.lat, p.lon))
            .collect();

        Ok(Some(NearbyCounts {
            schools: schools.len() as u32,
            parks: parks.len() as u32,
            metro_distances_m,
        }))
    }
}

/// OpenStreetMap Overpass API (public, keyless fallback)
pub struct OverpassSource {
    client: RetryClient,
    url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}

impl OverpassElement {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    fn is_school(&self) -> bool {
        self.tag("amenity") == Some("school")
    }

    fn is_park(&self) -> bool {
        self.tag("leisure") == Some("park")
    }

    fn is_subway_station(&self) -> bool {
        (self.tag("railway") == Some("station") && self.tag("station") == Some("subway"))
            || (self.tag("public_transport") == Some("station") && self.tag("subway") == Some("yes"))
    }

    fn position(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon, &self.center) {
            (Some(lat), Some(lon), _) => Some((lat, lon)),
            (_, _, Some(center)) => Some((center.lat, center.lon)),
            _ => None,
        }
    }
}

impl OverpassSource {
    pub const DEFAULT_URL: &'static str = "https://overpass-api.de/api/interpreter";

    pub fn new(client: RetryClient, url: String, timeout: Duration) -> Self {
        Self { client, url, timeout }
    }

    fn build_query(lat: f64, lng: f64, radius_m: f64) -> String {
        let around = format!("(around:{},{},{})", radius_m.round() as u32, lat, lng);
        format!(
            "[out:json][timeout:25];\n(\n  node[\"amenity\"=\"school\"]{a};\n  way[\"leisure\"=\"park\"]{a};\n  relation[\"leisure\"=\"park\"]{a};\n  node[\"railway\"=\"station\"][\"station\"=\"subway\"]{a};\n  node[\"public_transport\"=\"station\"][\"subway\"=\"yes\"]{a};\n);\nout center;",
            a = around
        )
    }
}

#[async_trait]
impl EnrichmentSource for OverpassSource {
    fn name(&self) -> &str {
        "overpass"
    }

    async fn nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Result<Option<NearbyCounts>, ExternalServiceError> {
        let body = RequestBody::Text(Self::build_query(lat, lng, radius_m));
        let opts = RequestOptions::new().timeout(self.timeout);
        let response: OverpassResponse = self.client.post_json(&self.url, &body, &opts).await?;

        let mut counts = NearbyCounts::default();
        for element in &response.elements {
            if element.is_school() {
                counts.schools += 1;
            } else if element.is_park() {
                counts.parks += 1;
            } else if element.is_subway_station() {
                if let Some((slat, slon)) = element.position() {
                    counts.metro_distances_m.push(haversine_meters(lat, lng, slat, slon));
                }
            }
        }

        Ok(Some(counts))
    }
}
