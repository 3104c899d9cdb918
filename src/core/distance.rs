use crate::models::TransportMode;
use geo::{HaversineDistance, Point};

/// Grid cells per degree used for duplicate bucketing (1/200° ≈ 550 m of latitude)
pub const CELLS_PER_DEGREE: f64 = 200.0;

/// Coarse geographic cell a coordinate falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeoCell {
    pub lat: i64,
    pub lng: i64,
}

/// Haversine distance between two points in meters
///
/// Arguments are `(lat, lng)` pairs in degrees.
#[inline]
pub fn haversine_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    Point::new(lng1, lat1).haversine_distance(&Point::new(lng2, lat2))
}

/// Haversine distance between two points in kilometers
#[inline]
pub fn haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    haversine_meters(lat1, lng1, lat2, lng2) / 1000.0
}

/// Estimated door-to-door travel time in minutes for a straight-line distance
#[inline]
pub fn estimate_travel_minutes(distance_km: f64, mode: TransportMode) -> f64 {
    distance_km / mode.speed_kmh() * 60.0
}

/// Snap a coordinate onto the ~500 m duplicate-detection grid
#[inline]
pub fn geo_cell(lat: f64, lng: f64) -> GeoCell {
    GeoCell {
        lat: (lat * CELLS_PER_DEGREE).round() as i64,
        lng: (lng * CELLS_PER_DEGREE).round() as i64,
    }
}
