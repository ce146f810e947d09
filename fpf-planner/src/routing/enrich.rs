//! Segment enrichment: distance, duration and geometry for trip segments
//!
//! **Run:**
//! 1. Pull an oversized pool of segments lacking `road_km`/`drive_sec`,
//!    direct-coordinate segments first
//! 2. Locate each endpoint: direct columns → resolved alias → region centroid
//! 3. Rank by resolvability tier, keep the batch-limit prefix
//! 4. Same place → assumed distance/speed; else routing backend; else
//!    great-circle distance at the average speed
//! 5. Write in batches of `commit_every`, one savepoint per segment
//!
//! Network calls for a batch happen before its transaction opens, so no
//! write lock is held across a routing request.

use super::geometry::{drive_seconds, haversine_km};
use super::osrm_client::RouteBackend;
use super::tier::{same_key, segment_tier, Endpoint, EndpointSource, TIER_UNRESOLVABLE};
use crate::config::RoutingConfig;
use crate::geo::centroids::lookup_centroid;
use crate::geo::{lookup_cached, normalize, GeoPoint};
use fpf_common::db::{ColumnCache, ColumnSet, UpdateBuilder};
use fpf_common::Result;
use serde::Serialize;
use sqlx::{Connection, Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SEGMENT_TABLE: &str = "trip_segments";
const COLUMN_TTL: Duration = Duration::from_secs(300);

/// Which segments a run may touch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TripFilter {
    #[default]
    All,
    /// Segments of confirmed trips only
    Confirmed,
    /// Segments of one trip
    Trip(String),
}

#[derive(Debug, Clone, Default)]
pub struct EnrichOptions {
    /// Batch limit; the configured default when `None`
    pub limit: Option<i64>,
    pub dry_run: bool,
    pub filter: TripFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Osrm,
    Haversine,
    SamePlace,
}

impl RouteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteSource::Osrm => "osrm",
            RouteSource::Haversine => "haversine",
            RouteSource::SamePlace => "same_place",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichSummary {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub dry_run: bool,
    pub pool: usize,
    pub resolvable: usize,
    pub selected: usize,
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub skipped_no_coords: usize,
    pub skipped_bad_coords: usize,
    pub geokey_src: usize,
    pub geokey_dst: usize,
    pub geokey_both: usize,
    pub centroid_src: usize,
    pub centroid_dst: usize,
    pub centroid_both: usize,
    pub same_place_nocoords: usize,
    pub same_place_collapsed: usize,
    pub osrm_ok: usize,
    pub haversine_used: usize,
    pub update_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
    /// Selected segments per tier
    pub by_tier: BTreeMap<u8, usize>,
}

impl EnrichSummary {
    fn record_error(&mut self, message: String) {
        self.update_errors += 1;
        self.first_error.get_or_insert(message);
    }
}

struct SegmentRow {
    id: i64,
    origin_region: Option<String>,
    dest_region: Option<String>,
    src_text: Option<String>,
    dst_text: Option<String>,
    src_lat: Option<f64>,
    src_lon: Option<f64>,
    dst_lat: Option<f64>,
    dst_lon: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub segment_id: i64,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub tier: u8,
}

/// Values to write into one segment
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedRoute {
    pub segment_id: i64,
    pub tier: u8,
    pub road_km: f64,
    pub drive_sec: i64,
    pub polyline: Option<String>,
    pub source: RouteSource,
}

/// Rank candidates and keep the best `limit`
///
/// Sorting is stable, so the pool order (direct coordinates first, then id)
/// breaks ties inside a tier.
pub fn select_candidates(
    mut candidates: Vec<Candidate>,
    limit: usize,
    require_geo: bool,
) -> Vec<Candidate> {
    if require_geo {
        candidates.retain(|c| c.tier != TIER_UNRESOLVABLE);
    }
    candidates.sort_by_key(|c| c.tier);
    candidates.truncate(limit);
    candidates
}

pub struct RoutingEnricher {
    pool: SqlitePool,
    backend: Arc<dyn RouteBackend>,
    config: RoutingConfig,
    columns: ColumnCache,
}

impl RoutingEnricher {
    pub fn new(pool: SqlitePool, backend: Arc<dyn RouteBackend>, config: RoutingConfig) -> Self {
        Self {
            pool,
            backend,
            config,
            columns: ColumnCache::new(COLUMN_TTL),
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub async fn enrich(&self, options: &EnrichOptions) -> Result<EnrichSummary> {
        let limit = options.limit.unwrap_or(self.config.batch_limit).max(1);
        let mut summary = EnrichSummary {
            ok: true,
            dry_run: options.dry_run,
            ..Default::default()
        };

        let columns = self.columns.get(&self.pool, SEGMENT_TABLE).await?;
        if !["id", "trip_id", "road_km", "drive_sec"]
            .iter()
            .all(|c| columns.contains(c))
        {
            warn!("trip_segments table or its distance columns are missing, nothing to enrich");
            summary.ok = false;
            summary.reason = Some("storage_missing".to_string());
            return Ok(summary);
        }

        let rows = self
            .fetch_pool(pool_size(limit, self.config.pool_multiplier), &options.filter)
            .await?;
        summary.pool = rows.len();

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            candidates.push(self.classify(row).await?);
        }
        summary.resolvable = candidates
            .iter()
            .filter(|c| c.tier != TIER_UNRESOLVABLE)
            .count();

        let selected = select_candidates(candidates, limit as usize, self.config.require_geo);
        summary.selected = selected.len();
        for candidate in &selected {
            *summary.by_tier.entry(candidate.tier).or_insert(0) += 1;
        }

        for chunk in selected.chunks(self.config.commit_every) {
            let mut computed = Vec::with_capacity(chunk.len());
            for candidate in chunk {
                summary.processed += 1;
                if let Some(route) = self.compute(candidate, &mut summary).await {
                    computed.push(route);
                }
            }

            if !options.dry_run && !computed.is_empty() {
                self.write_batch(&computed, &columns, &mut summary).await?;
            }
        }

        info!(
            pool = summary.pool,
            selected = summary.selected,
            updated = summary.updated,
            osrm_ok = summary.osrm_ok,
            haversine = summary.haversine_used,
            same_place = summary.same_place_nocoords + summary.same_place_collapsed,
            errors = summary.update_errors,
            dry_run = summary.dry_run,
            "Routing enrichment finished"
        );
        Ok(summary)
    }

    async fn fetch_pool(&self, pool_size: i64, filter: &TripFilter) -> Result<Vec<SegmentRow>> {
        let mut sql = String::from(
            r#"
            SELECT s.id, s.origin_region, s.dest_region, s.src_text, s.dst_text,
                   s.src_lat, s.src_lon, s.dst_lat, s.dst_lon
            FROM trip_segments s
            JOIN trips t ON t.id = s.trip_id
            WHERE (s.road_km IS NULL OR s.drive_sec IS NULL)
            "#,
        );
        match filter {
            TripFilter::All => {}
            TripFilter::Confirmed => sql.push_str(" AND t.status = 'confirmed'"),
            TripFilter::Trip(_) => sql.push_str(" AND s.trip_id = ?"),
        }
        sql.push_str(
            r#"
            ORDER BY CASE WHEN s.src_lat IS NOT NULL AND s.src_lon IS NOT NULL
                           AND s.dst_lat IS NOT NULL AND s.dst_lon IS NOT NULL
                          THEN 0 ELSE 1 END,
                     s.id
            LIMIT ?
            "#,
        );

        let mut query = sqlx::query(&sql);
        if let TripFilter::Trip(trip_id) = filter {
            query = query.bind(trip_id.clone());
        }
        let rows = query.bind(pool_size.max(1)).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| SegmentRow {
                id: row.get("id"),
                origin_region: row.get("origin_region"),
                dest_region: row.get("dest_region"),
                src_text: row.get("src_text"),
                dst_text: row.get("dst_text"),
                src_lat: row.get("src_lat"),
                src_lon: row.get("src_lon"),
                dst_lat: row.get("dst_lat"),
                dst_lon: row.get("dst_lon"),
            })
            .collect())
    }

    async fn classify(&self, row: &SegmentRow) -> Result<Candidate> {
        let src = self
            .locate(row.src_lat, row.src_lon, row.src_text.as_deref(), row.origin_region.as_deref())
            .await?;
        let dst = self
            .locate(row.dst_lat, row.dst_lon, row.dst_text.as_deref(), row.dest_region.as_deref())
            .await?;
        let tier = segment_tier(&src, &dst);
        Ok(Candidate {
            segment_id: row.id,
            src,
            dst,
            tier,
        })
    }

    /// Direct columns, then the alias cache, then the region centroid
    async fn locate(
        &self,
        lat: Option<f64>,
        lon: Option<f64>,
        text: Option<&str>,
        region: Option<&str>,
    ) -> Result<Endpoint> {
        let key = text.map(normalize).unwrap_or_default();

        if let Some(point) = GeoPoint::from_columns(lat, lon) {
            return Ok(Endpoint::located(EndpointSource::Direct, point, key));
        }

        let mut endpoint = Endpoint::missing(key.clone());
        if !key.is_empty() {
            if let Some(point) = lookup_cached(&self.pool, &key).await? {
                endpoint = Endpoint::located(EndpointSource::Alias, point, key.clone());
            }
        }
        if endpoint.point.is_none() {
            if let Some(region) = region {
                if let Some(point) = lookup_centroid(&self.pool, region).await? {
                    endpoint = Endpoint::located(EndpointSource::Centroid, point, key);
                }
            }
        }

        endpoint.bad_direct = lat.is_some() || lon.is_some();
        Ok(endpoint)
    }

    async fn compute(&self, candidate: &Candidate, summary: &mut EnrichSummary) -> Option<ComputedRoute> {
        count_fallbacks(candidate, summary);

        if same_key(&candidate.src, &candidate.dst) {
            match (candidate.src.point, candidate.dst.point) {
                (Some(_), Some(_)) => summary.same_place_collapsed += 1,
                _ => summary.same_place_nocoords += 1,
            }
            return Some(self.same_place(candidate));
        }

        let (Some(from), Some(to)) = (candidate.src.point, candidate.dst.point) else {
            summary.skipped += 1;
            if candidate.src.bad_direct || candidate.dst.bad_direct {
                summary.skipped_bad_coords += 1;
            } else {
                summary.skipped_no_coords += 1;
            }
            return None;
        };

        let great_circle_km = haversine_km(from, to);
        if great_circle_km * 1000.0 <= self.config.same_place_eps_m {
            summary.same_place_collapsed += 1;
            return Some(self.same_place(candidate));
        }

        match self.backend.route(from, to).await {
            Ok(leg) => {
                summary.osrm_ok += 1;
                Some(ComputedRoute {
                    segment_id: candidate.segment_id,
                    tier: candidate.tier,
                    road_km: leg.distance_km,
                    drive_sec: leg.duration_sec.round() as i64,
                    polyline: leg.polyline,
                    source: RouteSource::Osrm,
                })
            }
            Err(e) => {
                debug!(segment_id = candidate.segment_id, error = %e, "Routing backend unavailable, using great-circle distance");
                summary.haversine_used += 1;
                Some(ComputedRoute {
                    segment_id: candidate.segment_id,
                    tier: candidate.tier,
                    road_km: great_circle_km,
                    drive_sec: drive_seconds(great_circle_km, self.config.avg_speed_kph),
                    polyline: None,
                    source: RouteSource::Haversine,
                })
            }
        }
    }

    fn same_place(&self, candidate: &Candidate) -> ComputedRoute {
        ComputedRoute {
            segment_id: candidate.segment_id,
            tier: candidate.tier,
            road_km: self.config.same_place_km,
            drive_sec: drive_seconds(self.config.same_place_km, self.config.same_place_kph),
            polyline: None,
            source: RouteSource::SamePlace,
        }
    }

    /// One transaction per batch, one savepoint per segment
    async fn write_batch(
        &self,
        routes: &[ComputedRoute],
        columns: &ColumnSet,
        summary: &mut EnrichSummary,
    ) -> Result<()> {
        let now = fpf_common::time::now_rfc3339();
        let mut tx = self.pool.begin().await?;

        for route in routes {
            let stmt = UpdateBuilder::new(SEGMENT_TABLE)
                .set("road_km", route.road_km)
                .set("drive_sec", route.drive_sec)
                .set("route_polyline", route.polyline.clone())
                .set("route_source", route.source.as_str())
                .set("geo_tier", route.tier as i64)
                .set("enriched_at", now.as_str())
                .where_eq("id", route.segment_id)
                .build(columns)?;

            let mut savepoint = Connection::begin(&mut *tx).await?;
            match stmt.execute(&mut *savepoint).await {
                Ok(_) => {
                    savepoint.commit().await?;
                    summary.updated += 1;
                }
                Err(e) => {
                    warn!(segment_id = route.segment_id, error = %e, "Segment update failed, rolled back to savepoint");
                    savepoint.rollback().await?;
                    summary.record_error(e.to_string());
                }
            }
        }

        tx.commit().await?;
        debug!(segments = routes.len(), "Enrichment batch committed");
        Ok(())
    }
}

/// Candidate rows to read for a run of `limit` segments
fn pool_size(limit: i64, multiplier: i64) -> i64 {
    limit.max(1).saturating_mul(multiplier.max(1))
}

fn count_fallbacks(candidate: &Candidate, summary: &mut EnrichSummary) {
    let alias = (
        candidate.src.source == EndpointSource::Alias,
        candidate.dst.source == EndpointSource::Alias,
    );
    match alias {
        (true, true) => summary.geokey_both += 1,
        (true, false) => summary.geokey_src += 1,
        (false, true) => summary.geokey_dst += 1,
        _ => {}
    }

    let centroid = (
        candidate.src.source == EndpointSource::Centroid,
        candidate.dst.source == EndpointSource::Centroid,
    );
    match centroid {
        (true, true) => summary.centroid_both += 1,
        (true, false) => summary.centroid_src += 1,
        (false, true) => summary.centroid_dst += 1,
        _ => {}
    }
}
