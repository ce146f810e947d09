//! Alias seeding from trip segments
//!
//! Segments that still lack direct coordinates contribute their place texts
//! to the alias table, so the next geocoding batch has something to resolve.

use super::aliases::{upsert_alias, AliasStatus};
use fpf_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedSummary {
    pub ok: bool,
    /// Segments scanned
    pub scanned: usize,
    /// Place texts recorded (new or repeated sightings)
    pub upserted: usize,
    /// Of those, stored or kept as `blocked`
    pub blocked: usize,
}

pub async fn seed_aliases_from_trip_segments(pool: &SqlitePool, limit: i64) -> Result<SeedSummary> {
    let rows: Vec<(Option<String>, Option<String>)> = sqlx::query_as(
        r#"
        SELECT src_text, dst_text
        FROM trip_segments
        WHERE src_lat IS NULL OR src_lon IS NULL OR dst_lat IS NULL OR dst_lon IS NULL
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;

    let mut summary = SeedSummary {
        ok: true,
        scanned: rows.len(),
        ..Default::default()
    };

    for (src, dst) in rows {
        for text in [src, dst].into_iter().flatten() {
            if text.trim().is_empty() {
                continue;
            }
            if let Some(sighting) = upsert_alias(pool, &text).await? {
                summary.upserted += 1;
                if sighting.status == AliasStatus::Blocked {
                    summary.blocked += 1;
                }
            }
        }
    }

    info!(
        scanned = summary.scanned,
        upserted = summary.upserted,
        blocked = summary.blocked,
        "Seeded geo aliases from trip segments"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_counts_sightings_and_skips_located_segments() {
        let pool = fpf_common::db::init_memory_database().await.unwrap();
        sqlx::query("INSERT INTO trips (id, status, created_at) VALUES ('t1', 'planned', '2024-01-01')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO trip_segments (trip_id, src_text, dst_text, src_lat, src_lon, dst_lat, dst_lon)
            VALUES ('t1', 'Тверь', 'г. Москва', NULL, NULL, NULL, NULL),
                   ('t1', 'Тверь', 'Неизвестно', NULL, NULL, NULL, NULL),
                   ('t1', 'Казань', 'Самара', 55.79, 49.12, 53.19, 50.10)
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let summary = seed_aliases_from_trip_segments(&pool, 100).await.unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.upserted, 4);
        assert_eq!(summary.blocked, 1);

        let hits: i64 = sqlx::query_scalar("SELECT hits FROM geo_aliases WHERE alias_norm = 'тверь'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(hits, 2);

        let kazan: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM geo_aliases WHERE alias_norm = 'казань'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(kazan, 0);
    }
}
