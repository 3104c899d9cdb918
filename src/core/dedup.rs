use crate::core::distance::{geo_cell, GeoCell};
use crate::models::Listing;
use std::collections::HashMap;

/// Collapse listings that describe the same property
///
/// Listings are bucketed by ~500 m grid cell, then grouped by a normalized
/// content signature (address, title, rooms, rounded area). Each group keeps
/// the listing with the highest [`quality_score`]; on a tie the one seen first
/// wins. Survivors come out in the order their group was first seen, so the
/// result is deterministic and running it again changes nothing.
pub fn deduplicate(listings: Vec<Listing>) -> Vec<Listing> {
    let total = listings.len();
    let mut slots: Vec<Listing> = Vec::with_capacity(total);
    let mut index: HashMap<(GeoCell, String), usize> = HashMap::with_capacity(total);

    for listing in listings {
        let key = (geo_cell(listing.lat, listing.lng), content_signature(&listing));

        match index.get(&key) {
            Some(&slot) => {
                if quality_score(&listing) > quality_score(&slots[slot]) {
                    tracing::debug!(
                        "Duplicate {} replaces {}",
                        listing.id(),
                        slots[slot].id()
                    );
                    slots[slot] = listing;
                } else {
                    tracing::debug!("Duplicate {} dropped for {}", listing.id(), slots[slot].id());
                }
            }
            None => {
                index.insert(key, slots.len());
                slots.push(listing);
            }
        }
    }

    if slots.len() < total {
        tracing::info!("Deduplicated {} listings down to {}", total, slots.len());
    }

    slots
}

/// Normalized signature identifying the same unit across providers
pub fn content_signature(listing: &Listing) -> String {
    format!(
        "{}|{}|{}|{}",
        normalize_text(&listing.address),
        normalize_text(&listing.title),
        listing.rooms,
        listing.area.round() as i64
    )
}

/// How complete and attractive a listing is; the better duplicate survives
pub fn quality_score(listing: &Listing) -> f64 {
    let photos = listing.photos.len() as f64 * 0.5;
    let description = if listing.description.trim().is_empty() { 0.0 } else { 1.2 };
    let price = if listing.price > 0.0 { 100_000_000.0 / listing.price } else { 0.0 };
    photos + description + price
}

/// Lowercase, drop punctuation, collapse whitespace
fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_listing(provider: &str, id: &str, address: &str, lat: f64, lng: f64) -> Listing {
        Listing {
            provider: provider.to_string(),
            external_id: id.to_string(),
            title: "2-комн. квартира, 54 м²".to_string(),
            address: address.to_string(),
            lat,
            lng,
            price: 12_000_000.0,
            rooms: 2,
            area: 54.2,
            floor: 4,
            total_floors: 12,
            year: None,
            stage: None,
            photos: vec![],
            description: String::new(),
            has_parking: false,
            is_new_building: false,
            developer: None,
            deal_type: None,
            property_type: None,
            url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  ул. Тверская,  д. 7 "), "ул тверская д 7");
        assert_eq!(normalize_text("Lenina St.\t12"), "lenina st 12");
    }

    #[test]
    fn test_cross_provider_repost_collapses() {
        let a = create_listing("avito", "1", "ул. Тверская, д. 7", 55.75581, 37.61731);
        let mut b = create_listing("domclick", "9", "ул Тверская д 7", 55.75578, 37.61735);
        b.photos = vec!["a.jpg".into(), "b.jpg".into()];

        let result = deduplicate(vec![a, b]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].provider, "domclick");
    }

    #[test]
    fn test_distinct_units_in_same_building_survive() {
        let a = create_listing("avito", "1", "ул. Тверская, д. 7", 55.7558, 37.6173);
        let mut b = create_listing("avito", "2", "ул. Тверская, д. 7", 55.7558, 37.6173);
        b.rooms = 3;
        b.area = 78.0;
        b.title = "3-комн. квартира, 78 м²".to_string();

        assert_eq!(deduplicate(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let a = create_listing("avito", "1", "Tverskaya 7", 55.7558, 37.6173);
        let b = create_listing("cian", "1", "Tverskaya 7", 55.7558, 37.6173);

        let result = deduplicate(vec![a, b]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].provider, "avito");
    }

    #[test]
    fn test_cheaper_duplicate_wins() {
        let a = create_listing("avito", "1", "Tverskaya 7", 55.7558, 37.6173);
        let mut b = create_listing("cian", "1", "Tverskaya 7", 55.7558, 37.6173);
        b.price = 11_000_000.0;

        assert_eq!(deduplicate(vec![a, b])[0].provider, "cian");
    }

    #[test]
    fn test_far_apart_listings_with_same_text_survive() {
        let a = create_listing("avito", "1", "Lenina 1", 55.7558, 37.6173);
        let b = create_listing("avito", "2", "Lenina 1", 59.9343, 30.3351);

        assert_eq!(deduplicate(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_dedup_is_fixed_point_and_preserves_order() {
        let listings = vec![
            create_listing("a", "1", "Lenina 1", 55.7558, 37.6173),
            create_listing("b", "1", "Mira 5", 55.7700, 37.6300),
            create_listing("c", "1", "Lenina 1", 55.7558, 37.6173),
            create_listing("d", "1", "Arbat 10", 55.7500, 37.5900),
        ];

        let once = deduplicate(listings);
        let ids: Vec<String> = once.iter().map(Listing::id).collect();
        assert_eq!(ids, vec!["a:1", "b:1", "d:1"]);

        let twice = deduplicate(once.clone());
        let again: Vec<String> = twice.iter().map(Listing::id).collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn test_quality_score_components() {
        let mut listing = create_listing("a", "1", "x", 0.0, 0.0);
        listing.price = 10_000_000.0;
        listing.photos = vec!["1".into(), "2".into()];
        listing.description = "Sunny".into();
        assert!((quality_score(&listing) - (1.0 + 1.2 + 10.0)).abs() < 1e-9);

        listing.price = 0.0;
        assert!((quality_score(&listing) - 2.2).abs() < 1e-9);
    }
}
