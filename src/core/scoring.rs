use crate::core::distance::{estimate_travel_minutes, haversine_distance};
use crate::models::{
    CommutePoint, EnrichmentRecord, Factor, Listing, MatchBreakdown, Query, TransportMode, Weights,
};
use serde::{Deserialize, Serialize};

/// Score used when an input is missing but should still count
pub const NEUTRAL_SCORE: f64 = 7.0;

/// How to treat a weighted factor whose input is missing from the query
/// (no budget, no commute points)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbsentInput {
    /// Leave the factor out of the breakdown so it drops out of the average
    #[default]
    Exclude,
    /// Score the factor as neutral
    Neutral,
}

/// Build the per-factor breakdown for a listing
///
/// Only factors with a nonzero weight in the query are considered. A factor
/// whose data is unavailable (no enrichment, no construction stage, no data
/// source at all) is omitted rather than scored zero.
pub fn score_listing(
    listing: &Listing,
    enrichment: Option<&EnrichmentRecord>,
    query: &Query,
    absent_input: AbsentInput,
) -> MatchBreakdown {
    let mut breakdown = MatchBreakdown::new();

    for factor in query.weighted_factors() {
        let score = match factor {
            Factor::Price => {
                let min = query.budget.min.filter(|v| *v > 0.0);
                let max = query.budget.max.filter(|v| *v > 0.0);
                if min.is_none() && max.is_none() {
                    absent_score(absent_input)
                } else {
                    Some(price_score(listing.price, min, max))
                }
            }
            Factor::Transport => {
                if query.geo.commute_points.is_empty() {
                    absent_score(absent_input)
                } else if !listing.has_coordinates() {
                    None
                } else {
                    Some(transport_score(
                        listing.lat,
                        listing.lng,
                        &query.geo.commute_points,
                        query.transport_mode,
                    ))
                }
            }
            Factor::Parking => Some(parking_score(
                listing.has_parking,
                query.filters.parking_required,
            )),
            Factor::Schools => enrichment.map(|e| school_score(e.schools_count)),
            Factor::Parks => enrichment.map(|e| park_score(e.parks_count)),
            Factor::Metro => enrichment.and_then(|e| e.nearest_metro_m).map(metro_score),
            Factor::Liquidity => Some(liquidity_score(listing.is_new_building)),
            Factor::ConstructionStage => listing.stage.as_deref().map(construction_stage_score),
            Factor::Infrastructure => enrichment.map(|e| infrastructure_score(e.amenity_count())),
            // No data source for these yet
            Factor::Noise | Factor::Ecology | Factor::Custom(_) => None,
        };

        if let Some(score) = score {
            breakdown.insert(factor.clone(), clamp_score(score));
        }
    }

    breakdown
}

/// Weighted average of the breakdown (0-10)
///
/// Only factors present both in the weights (with a nonzero weight) and in the
/// breakdown contribute, to the numerator and the denominator alike.
pub fn calculate_match_score(weights: &Weights, breakdown: &MatchBreakdown) -> f64 {
    let mut total_weight = 0.0;
    let mut weighted_sum = 0.0;

    for (factor, weight) in weights {
        if *weight == 0.0 {
            continue;
        }
        if let Some(score) = breakdown.get(factor) {
            total_weight += weight;
            weighted_sum += weight * score;
        }
    }

    if total_weight == 0.0 {
        return 0.0;
    }
    weighted_sum / total_weight
}

fn absent_score(policy: AbsentInput) -> Option<f64> {
    match policy {
        AbsentInput::Exclude => None,
        AbsentInput::Neutral => Some(NEUTRAL_SCORE),
    }
}

#[inline]
fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 10.0)
}

/// Map `value` linearly from `[min, max]` onto `[0, 10]`, optionally reversed
#[inline]
pub fn normalize_score(value: f64, min: f64, max: f64, inverse: bool) -> f64 {
    if min == max {
        return 5.0;
    }
    let normalized = (value - min) / (max - min);
    let score = if inverse { 1.0 - normalized } else { normalized };
    clamp_score(score * 10.0)
}

/// Budget fitness
///
/// 10 inside the budget, ramping down to 0 at 70% of the minimum and at 130%
/// of the maximum.
pub fn price_score(price: f64, budget_min: Option<f64>, budget_max: Option<f64>) -> f64 {
    if budget_min.is_none() && budget_max.is_none() {
        return NEUTRAL_SCORE;
    }

    if let Some(min) = budget_min {
        if price < min {
            return normalize_score(price, min * 0.7, min, false);
        }
    }

    if let Some(max) = budget_max {
        if price > max {
            return normalize_score(price, max, max * 1.3, true);
        }
    }

    10.0
}

/// Commute convenience, importance-weighted over all commute points
///
/// 15 minutes or less scores 10, 90 minutes or more scores 0.
pub fn transport_score(lat: f64, lng: f64, points: &[CommutePoint], mode: TransportMode) -> f64 {
    let mut weighted_sum = 0.0;
    let mut total_importance = 0.0;

    for point in points {
        let distance_km = haversine_distance(lat, lng, point.lat, point.lng);
        let minutes = estimate_travel_minutes(distance_km, mode);
        let score = normalize_score(minutes, 15.0, 90.0, true);

        weighted_sum += score * point.time_importance;
        total_importance += point.time_importance;
    }

    if total_importance > 0.0 {
        weighted_sum / total_importance
    } else {
        NEUTRAL_SCORE
    }
}

#[inline]
pub fn parking_score(has_parking: bool, parking_required: bool) -> f64 {
    match (has_parking, parking_required) {
        (true, _) => 10.0,
        (false, true) => 0.0,
        (false, false) => 5.0,
    }
}

#[inline]
pub fn school_score(count: u32) -> f64 {
    if count >= 5 {
        10.0
    } else {
        clamp_score(count as f64 * 2.0)
    }
}

#[inline]
pub fn park_score(count: u32) -> f64 {
    if count >= 3 {
        10.0
    } else {
        clamp_score(count as f64 * 3.5)
    }
}

/// Walking distance to the metro: 200 m or closer scores 10, 1200 m or more scores 0
#[inline]
pub fn metro_score(distance_m: f64) -> f64 {
    let score = if distance_m <= 200.0 {
        10.0
    } else if distance_m >= 1200.0 {
        0.0
    } else {
        10.0 - (distance_m - 200.0) / 1000.0 * 10.0
    };
    clamp_score(score)
}

#[inline]
pub fn liquidity_score(is_new_building: bool) -> f64 {
    if is_new_building { 8.0 } else { 6.0 }
}

/// Progress of a new build; unknown stages score 5
pub fn construction_stage_score(stage: &str) -> f64 {
    match stage.trim().to_lowercase().as_str() {
        "pit" | "котлован" => 3.0,
        "foundation" | "фундамент" => 4.0,
        "frame" | "каркас" => 5.0,
        "facade" | "фасад" => 7.0,
        "finishing" | "отделка" => 8.0,
        "ready" | "сдан" => 10.0,
        _ => 5.0,
    }
}

/// Overall amenity density from the total number of nearby schools, parks and stations
pub fn infrastructure_score(amenities: u32) -> f64 {
    if amenities >= 10 {
        10.0
    } else if amenities >= 6 {
        8.0
    } else if amenities >= 3 {
        6.0
    } else if amenities >= 1 {
        4.0
    } else {
        2.0
    }
}
