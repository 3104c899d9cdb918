// Criterion benchmarks for Estate Match

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use estate_match::core::{deduplicate, haversine_distance, Matcher};
use estate_match::models::{Budget, CommutePoint, EnrichmentRecord, GeoQuery, Listing, Query, SearchMode};

fn create_listing(id: usize, lat: f64, lng: f64) -> Listing {
    Listing {
        provider: if id % 2 == 0 { "avito" } else { "domclick" }.to_string(),
        external_id: id.to_string(),
        title: format!("{}-room apartment", 1 + id % 4),
        address: format!("Moscow, Street {}, {}", id % 50, id % 7),
        lat,
        lng,
        price: 6_000_000.0 + (id % 40) as f64 * 150_000.0,
        rooms: 1 + (id % 4) as u32,
        area: 35.0 + (id % 30) as f64,
        floor: (id % 16) as i32,
        total_floors: 17,
        year: Some(1990 + (id % 30) as i32),
        stage: None,
        photos: vec![],
        description: String::new(),
        has_parking: id % 3 == 0,
        is_new_building: id % 5 == 0,
        developer: None,
        deal_type: None,
        property_type: None,
        url: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn create_enrichment(listing: &Listing, id: usize) -> EnrichmentRecord {
    EnrichmentRecord {
        listing_id: listing.id(),
        schools_count: (id % 6) as u32,
        parks_count: (id % 4) as u32,
        metro_stations: (id % 3) as u32,
        nearest_metro_m: Some(150.0 + (id % 20) as f64 * 60.0),
        source: "overpass".to_string(),
        fetched_at: Utc::now(),
    }
}

fn create_query() -> Query {
    Query {
        mode: SearchMode::Life,
        budget: Budget { min: Some(7_000_000.0), max: Some(10_000_000.0) },
        geo: GeoQuery {
            city: "Moscow".to_string(),
            districts: vec![],
            commute_points: vec![CommutePoint {
                name: "office".to_string(),
                lat: 55.7558,
                lng: 37.6173,
                time_importance: 1.0,
            }],
        },
        ..Query::default()
    }
    .with_default_weights()
}

fn candidates(count: usize) -> Vec<(Listing, Option<EnrichmentRecord>)> {
    (0..count)
        .map(|i| {
            let offset = (i as f64 * 0.001) % 0.2;
            let listing = create_listing(i, 55.70 + offset, 37.55 + offset);
            let enrichment = create_enrichment(&listing, i);
            (listing, Some(enrichment))
        })
        .collect()
}

fn bench_haversine_distance(c: &mut Criterion) {
    c.bench_function("haversine_distance", |b| {
        b.iter(|| {
            haversine_distance(
                black_box(55.7558),
                black_box(37.6173),
                black_box(55.7600),
                black_box(37.6200),
            )
        });
    });
}

fn bench_ranking(c: &mut Criterion) {
    let matcher = Matcher::with_defaults();
    let query = create_query();

    let mut group = c.benchmark_group("ranking");

    for candidate_count in [10, 100, 500, 1000].iter() {
        let batch = candidates(*candidate_count);

        group.bench_with_input(BenchmarkId::new("rank", candidate_count), candidate_count, |b, _| {
            b.iter(|| matcher.rank(black_box(&query), black_box(batch.clone())));
        });
    }

    group.finish();
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup");

    for listing_count in [100, 1000].iter() {
        // Every listing appears twice, once per provider
        let listings: Vec<Listing> = (0..*listing_count)
            .flat_map(|i| {
                let offset = (i as f64 * 0.0007) % 0.2;
                let first = create_listing(i * 2, 55.70 + offset, 37.55 + offset);
                let mut second = first.clone();
                second.provider = "yandex".to_string();
                [first, second]
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("deduplicate", listing_count), listing_count, |b, _| {
            b.iter(|| deduplicate(black_box(listings.clone())));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_haversine_distance, bench_ranking, bench_dedup);

criterion_main!(benches);
