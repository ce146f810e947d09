//! Test helper utilities shared by the fpf-planner integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fpf_planner::autoplan::AutoplanPipeline;
use fpf_planner::config::{GeocoderConfig, RoutingConfig};
use fpf_planner::flowlang::{SettingsCache, SettingsResolver};
use fpf_planner::geo::{GeoResolver, GeocodeHit, Geocoder, GeocoderError};
use fpf_planner::geo::GeoPoint;
use fpf_planner::routing::{RouteBackend, RouteError, RouteLeg, RoutingEnricher};
use fpf_planner::tasks::{register_all, LocalBroker, TaskRegistry, WorkerContext};
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_PLAN: &str = "test_plan";

/// In-memory database with the full schema
pub async fn memory_pool() -> SqlitePool {
    fpf_common::db::init_memory_database()
        .await
        .expect("in-memory database")
}

/// Settings cache over `dir`, ignoring the process environment
pub fn settings_in(dir: &Path) -> Arc<SettingsCache> {
    Arc::new(SettingsCache::with_active_plan(
        SettingsResolver::new(dir).without_env(),
        TEST_PLAN,
    ))
}

pub fn pipeline(pool: &SqlitePool, settings: &Arc<SettingsCache>) -> AutoplanPipeline {
    AutoplanPipeline::new(pool.clone(), Arc::clone(settings), None)
}

/// Geocoder answering every query with a point derived from the call count
#[derive(Default)]
pub struct FakeGeocoder {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeGeocoder {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    fn provider(&self) -> &str {
        "fake"
    }

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>, GeocoderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GeocoderError::Timeout);
        }
        Ok(Some(GeocodeHit {
            point: GeoPoint::new(50.0 + n as f64, 40.0 + n as f64),
            precision: "other".to_string(),
            kind: Some("locality".to_string()),
            uri: Some(format!("fake://{}", query)),
            label: Some(query.to_string()),
        }))
    }
}

/// Routing backend returning a fixed leg, or always failing
pub struct FakeRouter {
    pub calls: AtomicUsize,
    pub leg: Option<RouteLeg>,
}

impl FakeRouter {
    pub fn fixed(distance_km: f64, duration_sec: f64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            leg: Some(RouteLeg {
                distance_km,
                duration_sec,
                polyline: Some("_p~iF~ps|U".to_string()),
            }),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            leg: None,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteBackend for FakeRouter {
    async fn route(&self, _from: GeoPoint, _to: GeoPoint) -> Result<RouteLeg, RouteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.leg.clone().ok_or_else(|| RouteError::Network("connection refused".to_string()))
    }
}

pub fn enricher(pool: &SqlitePool, router: Arc<FakeRouter>) -> RoutingEnricher {
    RoutingEnricher::new(pool.clone(), router, RoutingConfig::default())
}

pub fn geo_resolver(pool: &SqlitePool, geocoder: Arc<FakeGeocoder>, daily_limit: i64) -> GeoResolver {
    let config = GeocoderConfig {
        api_key: Some("test-key".to_string()),
        daily_limit,
        ..Default::default()
    };
    GeoResolver::new(pool.clone(), geocoder, config)
}

pub fn worker_context(pool: &SqlitePool, settings: &Arc<SettingsCache>) -> Arc<WorkerContext> {
    Arc::new(WorkerContext {
        pool: pool.clone(),
        settings: Arc::clone(settings),
        autoplan: Arc::new(pipeline(pool, settings)),
        routing: Arc::new(enricher(pool, Arc::new(FakeRouter::fixed(120.0, 7200.0)))),
        geo: None,
        geocoder: GeocoderConfig::default(),
        sink: None,
    })
}

/// Broker with every handler registered over fakes
pub fn test_broker(pool: &SqlitePool, settings: &Arc<SettingsCache>) -> Arc<LocalBroker> {
    let mut registry = TaskRegistry::new();
    register_all(&mut registry);
    broker_with(pool, settings, registry)
}

pub fn broker_with(pool: &SqlitePool, settings: &Arc<SettingsCache>, registry: TaskRegistry) -> Arc<LocalBroker> {
    LocalBroker::new(pool.clone(), Arc::new(registry), worker_context(pool, settings), 2)
}

pub fn plans_dir() -> TempDir {
    TempDir::new().expect("temp dir")
}

/// Write `<plan>.plan` into `dir`
pub fn write_plan(dir: &Path, plan: &str, body: &str) {
    std::fs::write(dir.join(format!("{}.plan", plan)), body).expect("write plan file");
}

pub async fn insert_freight(pool: &SqlitePool, id: &str, from: &str, to: &str, price: f64, km: f64, date: &str) {
    sqlx::query(
        r#"
        INSERT INTO freights (id, loading_region, unloading_region, loading_place, unloading_place,
                              price_rub, distance_km, loading_date)
        VALUES (?, ?, ?, 'Москва', 'Санкт-Петербург', ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(from)
    .bind(to)
    .bind(price)
    .bind(km)
    .bind(date)
    .execute(pool)
    .await
    .expect("insert freight");
}

pub async fn insert_truck(pool: &SqlitePool, public_id: Option<&str>) -> i64 {
    sqlx::query("INSERT INTO trucks (public_id, plate, is_active) VALUES (?, 'A001AA77', 1)")
        .bind(public_id)
        .execute(pool)
        .await
        .expect("insert truck")
        .last_insert_rowid()
}

pub async fn insert_trip(pool: &SqlitePool, id: &str, status: &str, created_at: &str, confirmed_at: Option<&str>, meta: Value) {
    sqlx::query("INSERT INTO trips (id, status, created_at, confirmed_at, meta) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(status)
        .bind(created_at)
        .bind(confirmed_at)
        .bind(meta.to_string())
        .execute(pool)
        .await
        .expect("insert trip");
}

/// Segment endpoint: text, region, direct coordinates
pub struct End<'a> {
    pub text: Option<&'a str>,
    pub region: Option<&'a str>,
    pub point: Option<(f64, f64)>,
}

pub async fn insert_segment(pool: &SqlitePool, trip_id: &str, src: End<'_>, dst: End<'_>) -> i64 {
    sqlx::query(
        r#"
        INSERT INTO trip_segments (trip_id, origin_region, dest_region, src_text, dst_text,
                                   src_lat, src_lon, dst_lat, dst_lon)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(trip_id)
    .bind(src.region)
    .bind(dst.region)
    .bind(src.text)
    .bind(dst.text)
    .bind(src.point.map(|p| p.0))
    .bind(src.point.map(|p| p.1))
    .bind(dst.point.map(|p| p.0))
    .bind(dst.point.map(|p| p.1))
    .execute(pool)
    .await
    .expect("insert segment")
    .last_insert_rowid()
}

pub async fn audit_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM autoplan_audit")
        .fetch_one(pool)
        .await
        .expect("count audit rows")
}
