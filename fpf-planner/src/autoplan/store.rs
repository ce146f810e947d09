//! Storage queries shared by the autoplan phases

use super::decision::EntityRef;
use chrono::NaiveDate;
use fpf_common::db::SchemaIntrospector;
use fpf_common::Result;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Region codes that stand for "unknown"
pub const PLACEHOLDER_REGIONS: &[&str] = &["", "RU-UNK", "UNK", "UNKNOWN", "XX", "RU-XX", "N/A"];

pub const PRICE_VIEW: &str = "freights_price_v";

pub fn is_placeholder_region(code: &str) -> bool {
    let code = code.trim().to_uppercase();
    PLACEHOLDER_REGIONS.contains(&code.as_str())
}

/// `'', 'RU-UNK', ...` for SQL `IN` lists
fn placeholder_sql_list() -> String {
    PLACEHOLDER_REGIONS
        .iter()
        .map(|c| format!("'{}'", c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Freshness and known-region filter over the price view; binds the cutoff date
fn candidate_filter() -> String {
    let placeholders = placeholder_sql_list();
    format!(
        "date(substr(ts, 1, 10)) >= date(?) \
         AND UPPER(TRIM(COALESCE(origin_region, ''))) NOT IN ({p}) \
         AND UPPER(TRIM(COALESCE(dest_region, ''))) NOT IN ({p})",
        p = placeholders
    )
}

/// Relations from `wanted` that do not exist
pub async fn missing_relations(pool: &SqlitePool, wanted: &[&str]) -> Result<Vec<String>> {
    SchemaIntrospector::missing_relations(pool, wanted).await
}

pub async fn count_fresh_freights(pool: &SqlitePool, cutoff: NaiveDate) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", PRICE_VIEW, candidate_filter());
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(cutoff.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_active_trucks(pool: &SqlitePool) -> Result<i64> {
    if !SchemaIntrospector::table_exists(pool, "trucks").await? {
        return Ok(0);
    }
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trucks WHERE is_active = 1")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Positive rates of fresh candidates
pub async fn fresh_rates(pool: &SqlitePool, cutoff: NaiveDate) -> Result<Vec<f64>> {
    let sql = format!(
        "SELECT rpm FROM {} WHERE {} AND rpm > 0",
        PRICE_VIEW,
        candidate_filter()
    );
    let rates: Vec<f64> = sqlx::query_scalar(&sql)
        .bind(cutoff.to_string())
        .fetch_all(pool)
        .await?;
    Ok(rates)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruckRow {
    pub id: i64,
    pub public_id: Option<String>,
}

impl TruckRow {
    /// Public id when the truck has one, else the internal id
    pub fn reference(&self) -> EntityRef {
        match self.public_id.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(public) => EntityRef::parse(public),
            None => EntityRef::Opaque(self.id.to_string()),
        }
    }
}

/// Lowest internal id among active trucks
pub async fn first_active_truck(pool: &SqlitePool) -> Result<Option<TruckRow>> {
    let row = sqlx::query("SELECT id, public_id FROM trucks WHERE is_active = 1 ORDER BY id ASC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| TruckRow {
        id: r.get("id"),
        public_id: r.get("public_id"),
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FreightCandidate {
    pub id: String,
    pub origin_region: Option<String>,
    pub dest_region: Option<String>,
    pub origin_place: Option<String>,
    pub dest_place: Option<String>,
    pub price: Option<f64>,
    pub road_km: Option<f64>,
    pub rpm: Option<f64>,
    pub ts: Option<String>,
}

/// Fresh candidates not yet linked to any trip, best rate first
pub async fn fetch_candidates(
    pool: &SqlitePool,
    cutoff: NaiveDate,
    rpm_min: f64,
    limit: i64,
) -> Result<Vec<FreightCandidate>> {
    let sql = format!(
        r#"
        SELECT CAST(f.id AS TEXT) AS id, origin_region, dest_region, origin_place, dest_place,
               price, road_km, rpm, CAST(ts AS TEXT) AS ts
        FROM {view} f
        WHERE {filter}
          AND (? <= 0 OR COALESCE(rpm, 0) >= ?)
          AND NOT EXISTS (
              SELECT 1 FROM trips t
              WHERE json_valid(t.meta)
                AND json_extract(t.meta, '$.autoplan.freight_id') = CAST(f.id AS TEXT)
          )
        ORDER BY COALESCE(rpm, 0) DESC, ts DESC
        LIMIT ?
        "#,
        view = PRICE_VIEW,
        filter = candidate_filter()
    );

    let rows = sqlx::query(&sql)
        .bind(cutoff.to_string())
        .bind(rpm_min)
        .bind(rpm_min)
        .bind(limit.max(0))
        .fetch_all(pool)
        .await?;

    Ok(rows
        .iter()
        .map(|r| FreightCandidate {
            id: r.get("id"),
            origin_region: r.get("origin_region"),
            dest_region: r.get("dest_region"),
            origin_place: r.get("origin_place"),
            dest_place: r.get("dest_place"),
            price: r.get("price"),
            road_km: r.get("road_km"),
            rpm: r.get("rpm"),
            ts: r.get("ts"),
        })
        .collect())
}

/// Insert a `planned` trip unless one already carries this freight id.
/// Returns whether a row was inserted.
pub async fn insert_planned_trip(
    conn: &mut SqliteConnection,
    trip_id: &str,
    truck_ref: &str,
    freight_id: &str,
    meta: &Value,
    now: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO trips (id, truck_id, status, created_at, updated_at, meta)
        SELECT ?, ?, 'planned', ?, ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM trips
            WHERE json_valid(meta) AND json_extract(meta, '$.autoplan.freight_id') = ?
        )
        "#,
    )
    .bind(trip_id)
    .bind(truck_ref)
    .bind(now)
    .bind(now)
    .bind(meta.to_string())
    .bind(freight_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn insert_segment(conn: &mut SqliteConnection, trip_id: &str, freight: &FreightCandidate) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO trip_segments (trip_id, segment_order, origin_region, dest_region, src_text, dst_text)
        VALUES (?, 0, ?, ?, ?, ?)
        "#,
    )
    .bind(trip_id)
    .bind(freight.origin_region.as_deref())
    .bind(freight.dest_region.as_deref())
    .bind(freight.origin_place.as_deref())
    .bind(freight.dest_place.as_deref())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Most recent `planned` trips
pub async fn planned_trip_ids(pool: &SqlitePool, limit: i64) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM trips WHERE status = 'planned' ORDER BY created_at DESC, id LIMIT ?",
    )
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_regions() {
        assert!(is_placeholder_region(" ru-unk "));
        assert!(is_placeholder_region(""));
        assert!(is_placeholder_region("n/a"));
        assert!(!is_placeholder_region("RU-MOW"));
    }

    #[test]
    fn test_truck_reference() {
        let with_public = TruckRow {
            id: 3,
            public_id: Some("TRK-1".into()),
        };
        assert_eq!(with_public.reference(), EntityRef::Opaque("TRK-1".into()));

        let bare = TruckRow { id: 3, public_id: None };
        assert_eq!(bare.reference(), EntityRef::Opaque("3".into()));
    }
}
