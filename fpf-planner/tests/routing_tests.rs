//! Routing enrichment integration tests

mod helpers;

use fpf_planner::config::RoutingConfig;
use fpf_planner::geo::centroids::seed_region_centroids;
use fpf_planner::routing::{EnrichOptions, RoutingEnricher, TripFilter};
use helpers::*;
use serde_json::json;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

const MOSCOW: (f64, f64) = (55.7558, 37.6173);
const SAINT_PETERSBURG: (f64, f64) = (59.9386, 30.3141);

async fn trip(pool: &SqlitePool, id: &str, status: &str) {
    insert_trip(pool, id, status, "2024-01-01T00:00:00+00:00", None, json!({})).await;
}

fn direct(text: &str, point: (f64, f64)) -> End<'_> {
    End {
        text: Some(text),
        region: None,
        point: Some(point),
    }
}

struct Enriched {
    road_km: Option<f64>,
    drive_sec: Option<i64>,
    source: Option<String>,
    tier: Option<i64>,
    polyline: Option<String>,
}

async fn segment(pool: &SqlitePool, id: i64) -> Enriched {
    let row = sqlx::query(
        "SELECT road_km, drive_sec, route_source, geo_tier, route_polyline FROM trip_segments WHERE id = ?",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .unwrap();
    Enriched {
        road_km: row.get("road_km"),
        drive_sec: row.get("drive_sec"),
        source: row.get("route_source"),
        tier: row.get("geo_tier"),
        polyline: row.get("route_polyline"),
    }
}

#[tokio::test]
async fn test_same_place_without_coordinates() {
    let pool = memory_pool().await;
    trip(&pool, "t-1", "planned").await;
    let both = || End {
        text: Some("Тверь"),
        region: None,
        point: None,
    };
    let id = insert_segment(&pool, "t-1", both(), both()).await;
    let router = Arc::new(FakeRouter::fixed(1.0, 60.0));

    let summary = enricher(&pool, Arc::clone(&router))
        .enrich(&EnrichOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.same_place_nocoords, 1);
    assert_eq!(router.call_count(), 0);

    let seg = segment(&pool, id).await;
    assert_eq!(seg.road_km, Some(50.0));
    assert_eq!(seg.drive_sec, Some(4500));
    assert_eq!(seg.source.as_deref(), Some("same_place"));
    assert_eq!(seg.tier, Some(5));
}

#[tokio::test]
async fn test_direct_coordinates_outrank_centroids() {
    let pool = memory_pool().await;
    seed_region_centroids(&pool).await.unwrap();
    trip(&pool, "t-1", "planned").await;

    let centroid_only = insert_segment(
        &pool,
        "t-1",
        End {
            text: Some("Москва"),
            region: Some("RU-MOW"),
            point: None,
        },
        End {
            text: Some("Санкт-Петербург"),
            region: Some("RU-LEN"),
            point: None,
        },
    )
    .await;
    let direct_id = insert_segment(
        &pool,
        "t-1",
        direct("Москва", MOSCOW),
        direct("Санкт-Петербург", SAINT_PETERSBURG),
    )
    .await;
    let router = Arc::new(FakeRouter::fixed(705.0, 32400.0));

    let options = EnrichOptions {
        limit: Some(1),
        ..Default::default()
    };
    let summary = enricher(&pool, Arc::clone(&router)).enrich(&options).await.unwrap();
    assert_eq!(summary.pool, 2);
    assert_eq!(summary.selected, 1);
    assert_eq!(summary.osrm_ok, 1);
    assert_eq!(summary.by_tier.get(&0), Some(&1));

    let seg = segment(&pool, direct_id).await;
    assert_eq!(seg.road_km, Some(705.0));
    assert_eq!(seg.drive_sec, Some(32400));
    assert_eq!(seg.source.as_deref(), Some("osrm"));
    assert_eq!(seg.tier, Some(0));
    assert!(seg.polyline.is_some());

    assert_eq!(segment(&pool, centroid_only).await.road_km, None);

    // Next run picks the centroid pair
    let next = enricher(&pool, router).enrich(&options).await.unwrap();
    assert_eq!(next.by_tier.get(&4), Some(&1));
    assert_eq!(next.centroid_both, 1);
    assert_eq!(segment(&pool, centroid_only).await.tier, Some(4));
}

#[tokio::test]
async fn test_unavailable_router_falls_back_to_great_circle() {
    let pool = memory_pool().await;
    trip(&pool, "t-1", "planned").await;
    let id = insert_segment(
        &pool,
        "t-1",
        direct("Москва", MOSCOW),
        direct("Санкт-Петербург", SAINT_PETERSBURG),
    )
    .await;

    let summary = enricher(&pool, Arc::new(FakeRouter::unavailable()))
        .enrich(&EnrichOptions::default())
        .await
        .unwrap();
    assert_eq!(summary.haversine_used, 1);
    assert_eq!(summary.osrm_ok, 0);

    let seg = segment(&pool, id).await;
    let km = seg.road_km.unwrap();
    assert!((km - 634.0).abs() < 5.0, "great-circle distance was {}", km);
    assert_eq!(seg.drive_sec, Some((km / 60.0 * 3600.0).round() as i64));
    assert_eq!(seg.source.as_deref(), Some("haversine"));
    assert_eq!(seg.polyline, None);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let pool = memory_pool().await;
    trip(&pool, "t-1", "planned").await;
    let id = insert_segment(
        &pool,
        "t-1",
        direct("Москва", MOSCOW),
        direct("Санкт-Петербург", SAINT_PETERSBURG),
    )
    .await;

    let options = EnrichOptions {
        dry_run: true,
        ..Default::default()
    };
    let summary = enricher(&pool, Arc::new(FakeRouter::fixed(700.0, 30000.0)))
        .enrich(&options)
        .await
        .unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(segment(&pool, id).await.road_km, None);
}

#[tokio::test]
async fn test_confirmed_filter_and_unresolvable_segments() {
    let pool = memory_pool().await;
    trip(&pool, "t-planned", "planned").await;
    trip(&pool, "t-confirmed", "confirmed").await;
    let planned = insert_segment(
        &pool,
        "t-planned",
        direct("Москва", MOSCOW),
        direct("Санкт-Петербург", SAINT_PETERSBURG),
    )
    .await;
    let confirmed = insert_segment(
        &pool,
        "t-confirmed",
        direct("Москва", MOSCOW),
        direct("Санкт-Петербург", SAINT_PETERSBURG),
    )
    .await;
    let nowhere = insert_segment(
        &pool,
        "t-confirmed",
        End {
            text: Some("Нигдеево"),
            region: None,
            point: None,
        },
        End {
            text: Some("Незнамово"),
            region: None,
            point: None,
        },
    )
    .await;

    let options = EnrichOptions {
        filter: TripFilter::Confirmed,
        ..Default::default()
    };
    let summary = enricher(&pool, Arc::new(FakeRouter::fixed(700.0, 30000.0)))
        .enrich(&options)
        .await
        .unwrap();
    assert_eq!(summary.pool, 2);
    assert_eq!(summary.resolvable, 1);
    assert_eq!(summary.updated, 1);

    assert!(segment(&pool, confirmed).await.road_km.is_some());
    assert_eq!(segment(&pool, planned).await.road_km, None);
    assert_eq!(segment(&pool, nowhere).await.road_km, None);
}

#[tokio::test]
async fn test_failed_update_keeps_other_segments() {
    let pool = memory_pool().await;
    trip(&pool, "t-1", "planned").await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(
            insert_segment(
                &pool,
                "t-1",
                direct("Москва", MOSCOW),
                direct("Санкт-Петербург", SAINT_PETERSBURG),
            )
            .await,
        );
    }
    sqlx::query(&format!(
        "CREATE TRIGGER fail_seg BEFORE UPDATE ON trip_segments WHEN NEW.id = {} \
         BEGIN SELECT RAISE(ABORT, 'boom'); END",
        ids[1]
    ))
    .execute(&pool)
    .await
    .unwrap();

    let config = RoutingConfig {
        commit_every: 1,
        ..Default::default()
    };
    let enricher = RoutingEnricher::new(pool.clone(), Arc::new(FakeRouter::fixed(705.0, 32400.0)), config);
    let summary = enricher.enrich(&EnrichOptions::default()).await.unwrap();
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.updated, 2);
    assert_eq!(summary.update_errors, 1);
    assert!(summary.first_error.unwrap().contains("boom"));

    assert_eq!(segment(&pool, ids[0]).await.road_km, Some(705.0));
    assert_eq!(segment(&pool, ids[1]).await.road_km, None);
    assert_eq!(segment(&pool, ids[2]).await.road_km, Some(705.0));
}

#[tokio::test]
async fn test_huge_limit_does_not_overflow() {
    let pool = memory_pool().await;
    trip(&pool, "t-1", "planned").await;
    let id = insert_segment(
        &pool,
        "t-1",
        direct("Москва", MOSCOW),
        direct("Санкт-Петербург", SAINT_PETERSBURG),
    )
    .await;

    let options = EnrichOptions {
        limit: Some(i64::MAX),
        ..Default::default()
    };
    let summary = enricher(&pool, Arc::new(FakeRouter::fixed(705.0, 32400.0)))
        .enrich(&options)
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);
    assert!(segment(&pool, id).await.road_km.is_some());
}
