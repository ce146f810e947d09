//! Database initialization
//!
//! The production schema is owned by the deployment; these statements create
//! the same shape idempotently so local runs and tests have something to talk to.
//! Every statement is `IF NOT EXISTS`, so running against an existing database
//! never alters it.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Open a connection pool on a database file, creating the file if needed
pub async fn open_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();
    let pool = open_pool(db_path, 10).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the event sink pool write while business transactions are open
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full schema (single shared connection)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table and view (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_freights_tables(pool).await?;
    create_fleet_tables(pool).await?;
    create_trip_tables(pool).await?;
    create_autoplan_audit_table(pool).await?;
    create_geo_tables(pool).await?;
    create_ops_tables(pool).await?;
    Ok(())
}

pub async fn create_freights_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS freights (
            id TEXT PRIMARY KEY,
            loading_region TEXT,
            unloading_region TEXT,
            loading_place TEXT,
            unloading_place TEXT,
            price_rub REAL,
            distance_km REAL,
            loading_date TEXT,
            parsed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIEW IF NOT EXISTS freights_price_v AS
        SELECT
            id,
            loading_region AS origin_region,
            unloading_region AS dest_region,
            loading_place AS origin_place,
            unloading_place AS dest_place,
            price_rub AS price,
            distance_km AS road_km,
            CASE WHEN distance_km > 0 THEN price_rub / distance_km END AS rpm,
            COALESCE(loading_date, parsed_at) AS ts
        FROM freights
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_fleet_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trucks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id TEXT UNIQUE,
            plate TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_trip_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trips (
            id TEXT PRIMARY KEY,
            truck_id TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL,
            updated_at TEXT,
            confirmed_at TEXT,
            meta TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trips_status_created ON trips(status, created_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trip_segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trip_id TEXT NOT NULL REFERENCES trips(id) ON DELETE CASCADE,
            segment_order INTEGER NOT NULL DEFAULT 0,
            origin_region TEXT,
            dest_region TEXT,
            src_text TEXT,
            dst_text TEXT,
            src_lat REAL,
            src_lon REAL,
            dst_lat REAL,
            dst_lon REAL,
            road_km REAL,
            drive_sec INTEGER,
            route_polyline TEXT,
            route_source TEXT,
            geo_tier INTEGER,
            enriched_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trip_segments_trip ON trip_segments(trip_id)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_autoplan_audit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS autoplan_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            plan TEXT,
            phase TEXT,
            decision TEXT NOT NULL,
            reason TEXT,
            applied INTEGER NOT NULL DEFAULT 0,
            truck_id TEXT,
            trip_id TEXT,
            truck_ref TEXT,
            trip_ref TEXT,
            thresholds TEXT,
            payload TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_geo_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS geo_keys (
            geokey TEXT PRIMARY KEY,
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            precision TEXT,
            confidence REAL,
            kind TEXT,
            provider TEXT,
            provider_uri TEXT,
            label TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS geo_aliases (
            alias_norm TEXT PRIMARY KEY,
            raw_sample TEXT,
            kind TEXT NOT NULL DEFAULT 'locality',
            status TEXT NOT NULL DEFAULT 'new',
            geokey TEXT REFERENCES geo_keys(geokey),
            hits INTEGER NOT NULL DEFAULT 1,
            attempts INTEGER NOT NULL DEFAULT 0,
            first_seen TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            last_seen TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            last_attempt_at TEXT,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_geo_aliases_status ON geo_aliases(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS geo_api_usage_daily (
            provider TEXT NOT NULL,
            day TEXT NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            daily_limit INTEGER NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (provider, day)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS region_centroids (
            region_code TEXT PRIMARY KEY,
            name TEXT,
            lat REAL NOT NULL,
            lon REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn create_ops_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ops_event_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            source TEXT NOT NULL,
            event_type TEXT NOT NULL,
            severity TEXT NOT NULL DEFAULT 'info',
            correlation_id TEXT,
            payload TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_results (
            task_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            args TEXT NOT NULL DEFAULT '{}',
            result TEXT,
            error TEXT,
            parent_id TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
