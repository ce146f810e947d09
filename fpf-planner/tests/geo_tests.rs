//! GeoKey resolver integration tests

mod helpers;

use fpf_planner::geo::quota;
use fpf_planner::geo::resolver::AliasOutcome;
use fpf_planner::geo::{lookup_cached, normalize, upsert_alias};
use helpers::*;
use std::sync::Arc;

async fn status_of(pool: &sqlx::SqlitePool, norm: &str) -> String {
    sqlx::query_scalar("SELECT status FROM geo_aliases WHERE alias_norm = ?")
        .bind(norm)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_quota_exhaustion_mid_batch() {
    let pool = memory_pool().await;
    for place in ["Тверь", "Казань", "Самара", "Пермь", "Уфа"] {
        upsert_alias(&pool, place).await.unwrap();
    }
    let geocoder = Arc::new(FakeGeocoder::default());
    let resolver = geo_resolver(&pool, Arc::clone(&geocoder), 2);

    let summary = resolver.resolve_batch(5, false).await.unwrap();
    assert_eq!(summary.picked, 5);
    assert_eq!(summary.resolved, 2);
    assert_eq!(summary.skipped_quota, 3);
    assert_eq!(summary.quota_used_today, 2);
    assert_eq!(geocoder.call_count(), 2);

    let still_new: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM geo_aliases WHERE status = 'new'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(still_new, 3);

    // Refused without incrementing
    let today = fpf_common::time::today();
    assert!(!quota::try_consume(&pool, "fake", today, 2, 1).await.unwrap());
    assert_eq!(quota::usage(&pool, "fake", today).await.unwrap(), 2);
}

#[tokio::test]
async fn test_resolved_alias_is_cached_for_routing() {
    let pool = memory_pool().await;
    let geocoder = Arc::new(FakeGeocoder::default());
    let resolver = geo_resolver(&pool, Arc::clone(&geocoder), 100);

    let outcome = resolver.resolve_text("  г. Тверь ", false).await.unwrap();
    let AliasOutcome::Resolved(point) = outcome.clone() else {
        panic!("expected a resolved alias, got {:?}", outcome);
    };
    assert_eq!(lookup_cached(&pool, &normalize("Тверь")).await.unwrap(), Some(point));

    // Second lookup is served from the cache
    let again = resolver.resolve_text("Тверь", false).await.unwrap();
    assert!(matches!(again, AliasOutcome::Cached(_)));
    assert_eq!(geocoder.call_count(), 1);

    let geokey: Option<String> = sqlx::query_scalar("SELECT geokey FROM geo_aliases WHERE alias_norm = ?")
        .bind(normalize("Тверь"))
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(geokey.unwrap().starts_with("fake://"));
}

#[tokio::test]
async fn test_failures_move_alias_to_retry() {
    let pool = memory_pool().await;
    upsert_alias(&pool, "Вологда").await.unwrap();
    let geocoder = Arc::new(FakeGeocoder::failing());
    let resolver = geo_resolver(&pool, Arc::clone(&geocoder), 100);

    let summary = resolver.resolve_batch(10, false).await.unwrap();
    assert_eq!(summary.retry, 1);
    assert!(summary.first_error.is_some());
    assert_eq!(status_of(&pool, &normalize("Вологда")).await, "retry");

    // Still cooling down: not picked again unless forced
    let cooling = resolver.resolve_batch(10, false).await.unwrap();
    assert_eq!(cooling.picked, 0);
    let forced = resolver.resolve_batch(10, true).await.unwrap();
    assert_eq!(forced.picked, 1);
    assert_eq!(geocoder.call_count(), 2);
}

#[tokio::test]
async fn test_retry_alias_is_picked_after_cooldown() {
    let pool = memory_pool().await;
    upsert_alias(&pool, "Кострома").await.unwrap();
    let norm = normalize("Кострома");
    sqlx::query("UPDATE geo_aliases SET status = 'retry', last_attempt_at = ? WHERE alias_norm = ?")
        .bind(fpf_common::time::now_rfc3339())
        .bind(&norm)
        .execute(&pool)
        .await
        .unwrap();
    let geocoder = Arc::new(FakeGeocoder::default());
    let resolver = geo_resolver(&pool, Arc::clone(&geocoder), 100);

    assert_eq!(resolver.resolve_batch(10, false).await.unwrap().picked, 0);
    let outcome = resolver.resolve_text("Кострома", false).await.unwrap();
    assert!(matches!(outcome, AliasOutcome::CoolingDown));
    assert_eq!(geocoder.call_count(), 0);

    sqlx::query("UPDATE geo_aliases SET last_attempt_at = '2020-01-01T00:00:00+00:00' WHERE alias_norm = ?")
        .bind(&norm)
        .execute(&pool)
        .await
        .unwrap();
    let summary = resolver.resolve_batch(10, false).await.unwrap();
    assert_eq!(summary.picked, 1);
    assert_eq!(summary.resolved, 1);
    assert_eq!(geocoder.call_count(), 1);
    assert_eq!(status_of(&pool, &norm).await, "resolved");
}

#[tokio::test]
async fn test_junk_alias_is_blocked_without_a_call() {
    let pool = memory_pool().await;
    let geocoder = Arc::new(FakeGeocoder::default());
    let resolver = geo_resolver(&pool, Arc::clone(&geocoder), 100);

    let outcome = resolver.resolve_text("неизвестно", false).await.unwrap();
    assert!(matches!(outcome, AliasOutcome::Blocked));
    assert_eq!(geocoder.call_count(), 0);
}

#[test]
fn test_normalization_is_a_projection() {
    let a = normalize("Москва");
    assert_eq!(a, normalize("  москва "));
    assert_eq!(a, normalize("МОСКВА"));
    assert_eq!(normalize(&a), a);

    let region = normalize("Тверская обл.");
    assert_eq!(normalize(&region), region);
}
