use crate::models::{Listing, PropertyType, Query};

/// Check a listing against the query's hard constraints
///
/// Used by sources that cannot filter server-side. Parking is not checked
/// here; a missing required parking spot scores zero on the parking factor.
#[inline]
pub fn matches_query(listing: &Listing, query: &Query) -> bool {
    matches_budget(listing, query) && matches_layout(listing, query) && matches_kind(listing, query)
}

#[inline]
fn matches_budget(listing: &Listing, query: &Query) -> bool {
    if let Some(min) = query.budget.min.filter(|v| *v > 0.0) {
        if listing.price < min {
            return false;
        }
    }
    if let Some(max) = query.budget.max.filter(|v| *v > 0.0) {
        if listing.price > max {
            return false;
        }
    }
    true
}

#[inline]
fn matches_layout(listing: &Listing, query: &Query) -> bool {
    let filters = &query.filters;

    if !filters.rooms.is_empty() && !filters.rooms.contains(&listing.rooms) {
        return false;
    }
    if let Some(area_min) = filters.area_min {
        if listing.area < area_min {
            return false;
        }
    }
    if let Some(area_max) = filters.area_max {
        if listing.area > area_max {
            return false;
        }
    }
    true
}

#[inline]
fn matches_kind(listing: &Listing, query: &Query) -> bool {
    if let Some(deal_type) = listing.deal_type {
        if deal_type != query.deal_type {
            return false;
        }
    }

    if let Some(new_building) = query.filters.new_building {
        if listing.is_new_building != new_building {
            return false;
        }
    }

    match query.property_type {
        PropertyType::Any => true,
        PropertyType::New => listing.is_new_building,
        PropertyType::Secondary => !listing.is_new_building,
    }
}
