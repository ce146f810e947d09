//! Batch alias resolution through the geocoder
//!
//! **Per alias:**
//! 1. `resolved` → cached point, no API call
//! 2. junk text → `blocked`, no quota spent
//! 3. take one unit of today's quota; when exhausted, stop the whole batch
//! 4. geocode a Russia-biased query
//! 5. hit → upsert geo key and bind the alias (`resolved`)
//! 6. miss or error → `retry` with the error recorded
//!
//! Every alias commits on its own, so an interrupted batch loses at most
//! the alias in flight.

use super::aliases::{upsert_alias, AliasStatus};
use super::normalize::{is_junk, normalize};
use super::yandex_client::{precision_confidence, russia_query, GeocodeHit, Geocoder};
use super::{quota, GeoPoint};
use crate::config::GeocoderConfig;
use crate::utils::retry_on_lock;
use chrono::Duration as ChronoDuration;
use fpf_common::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

const LOCK_WAIT_MS: u64 = 5000;

/// Outcome for a single alias
#[derive(Debug, Clone, PartialEq)]
pub enum AliasOutcome {
    Cached(GeoPoint),
    Resolved(GeoPoint),
    Blocked,
    Retry(String),
    CoolingDown,
    QuotaExhausted,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveSummary {
    pub ok: bool,
    pub provider: String,
    pub picked: usize,
    pub resolved: usize,
    pub cached: usize,
    pub blocked: usize,
    pub retry: usize,
    /// Aliases left untouched because the daily quota ran out
    pub skipped_quota: usize,
    pub quota_used_today: i64,
    pub daily_limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
}

/// Canonical geo key: provider URI, else a digest of the normalized text
pub fn geokey_for(hit: &GeocodeHit, alias_norm: &str) -> String {
    match hit.uri.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(uri) => uri.to_string(),
        None => synthetic_geokey(alias_norm),
    }
}

pub fn synthetic_geokey(alias_norm: &str) -> String {
    let digest = Sha256::digest(alias_norm.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("text:{}", &hex[..20])
}

struct Candidate {
    alias_norm: String,
    raw_sample: Option<String>,
    status: AliasStatus,
}

pub struct GeoResolver {
    pool: SqlitePool,
    geocoder: Arc<dyn Geocoder>,
    config: GeocoderConfig,
}

impl GeoResolver {
    pub fn new(pool: SqlitePool, geocoder: Arc<dyn Geocoder>, config: GeocoderConfig) -> Self {
        Self {
            pool,
            geocoder,
            config,
        }
    }

    /// Resolve up to `limit` pending aliases (`new`, and `retry` past cooldown
    /// unless `force`)
    pub async fn resolve_batch(&self, limit: i64, force: bool) -> Result<ResolveSummary> {
        let provider = self.geocoder.provider().to_string();
        let cutoff = (fpf_common::time::now() - ChronoDuration::minutes(self.config.retry_cooldown_min))
            .to_rfc3339();

        let rows = sqlx::query(
            r#"
            SELECT alias_norm, raw_sample, status
            FROM geo_aliases
            WHERE status = 'new'
               OR (status = 'retry' AND (? OR last_attempt_at IS NULL OR last_attempt_at <= ?))
            ORDER BY CASE status WHEN 'new' THEN 0 ELSE 1 END, hits DESC, last_seen DESC
            LIMIT ?
            "#,
        )
        .bind(force)
        .bind(&cutoff)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| Candidate {
                alias_norm: row.get("alias_norm"),
                raw_sample: row.get("raw_sample"),
                status: AliasStatus::parse(row.get::<String, _>("status").as_str())
                    .unwrap_or(AliasStatus::New),
            })
            .collect();

        let mut summary = ResolveSummary {
            ok: true,
            provider: provider.clone(),
            picked: candidates.len(),
            daily_limit: self.config.daily_limit,
            ..Default::default()
        };

        for (idx, candidate) in candidates.iter().enumerate() {
            match self.process(candidate).await? {
                AliasOutcome::Cached(_) => summary.cached += 1,
                AliasOutcome::Resolved(_) => summary.resolved += 1,
                AliasOutcome::Blocked => summary.blocked += 1,
                AliasOutcome::Retry(err) => {
                    summary.retry += 1;
                    summary.first_error.get_or_insert(err);
                }
                AliasOutcome::CoolingDown => {}
                AliasOutcome::QuotaExhausted => {
                    summary.skipped_quota = candidates.len() - idx;
                    break;
                }
            }
        }

        summary.quota_used_today =
            quota::usage(&self.pool, &provider, fpf_common::time::today()).await?;

        info!(
            picked = summary.picked,
            resolved = summary.resolved,
            blocked = summary.blocked,
            retry = summary.retry,
            skipped_quota = summary.skipped_quota,
            "Geo alias batch finished"
        );
        Ok(summary)
    }

    /// Resolve one free-text place name, recording the sighting first
    pub async fn resolve_text(&self, raw: &str, force: bool) -> Result<AliasOutcome> {
        let norm = normalize(raw);
        let Some(sighting) = upsert_alias(&self.pool, raw).await? else {
            return Ok(AliasOutcome::Blocked);
        };

        if sighting.status == AliasStatus::Retry && !force && self.cooling_down(&norm).await? {
            return Ok(AliasOutcome::CoolingDown);
        }

        self.process(&Candidate {
            alias_norm: sighting.alias_norm,
            raw_sample: Some(raw.trim().to_string()),
            status: sighting.status,
        })
        .await
    }

    async fn cooling_down(&self, alias_norm: &str) -> Result<bool> {
        let last: Option<String> =
            sqlx::query_scalar("SELECT last_attempt_at FROM geo_aliases WHERE alias_norm = ?")
                .bind(alias_norm)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        let Some(last) = last.as_deref().and_then(fpf_common::time::parse_timestamp) else {
            return Ok(false);
        };
        Ok(fpf_common::time::now() - last < ChronoDuration::minutes(self.config.retry_cooldown_min))
    }

    async fn process(&self, candidate: &Candidate) -> Result<AliasOutcome> {
        let norm = candidate.alias_norm.as_str();

        if candidate.status == AliasStatus::Resolved {
            if let Some(point) = super::aliases::lookup_cached(&self.pool, norm).await? {
                return Ok(AliasOutcome::Cached(point));
            }
        }

        if candidate.status == AliasStatus::Blocked || is_junk(norm) {
            self.mark(norm, AliasStatus::Blocked, None, false).await?;
            return Ok(AliasOutcome::Blocked);
        }

        let provider = self.geocoder.provider().to_string();
        let day = fpf_common::time::today();
        let daily_limit = self.config.daily_limit;
        let consumed = retry_on_lock("geo quota consume", LOCK_WAIT_MS, || {
            quota::try_consume(&self.pool, &provider, day, daily_limit, 1)
        })
        .await?;
        if !consumed {
            return Ok(AliasOutcome::QuotaExhausted);
        }

        let query = russia_query(candidate.raw_sample.as_deref().unwrap_or(norm));
        match self.geocoder.geocode(&query).await {
            Ok(Some(hit)) => {
                self.bind_resolved(norm, &hit).await?;
                debug!(alias = norm, lat = hit.point.lat, lon = hit.point.lon, "Alias resolved");
                Ok(AliasOutcome::Resolved(hit.point))
            }
            Ok(None) => {
                let msg = "geocoder returned no result".to_string();
                self.mark(norm, AliasStatus::Retry, Some(&msg), true).await?;
                Ok(AliasOutcome::Retry(msg))
            }
            Err(e) => {
                warn!(alias = norm, error = %e, "Geocoder call failed, alias set to retry");
                let msg = e.to_string();
                self.mark(norm, AliasStatus::Retry, Some(&msg), true).await?;
                Ok(AliasOutcome::Retry(msg))
            }
        }
    }

    async fn mark(
        &self,
        alias_norm: &str,
        status: AliasStatus,
        error: Option<&str>,
        attempted: bool,
    ) -> Result<()> {
        let now = fpf_common::time::now_rfc3339();
        retry_on_lock("geo alias status", LOCK_WAIT_MS, || async {
            sqlx::query(
                r#"
                UPDATE geo_aliases
                SET status = ?,
                    last_error = ?,
                    attempts = attempts + ?,
                    last_attempt_at = CASE WHEN ? THEN ? ELSE last_attempt_at END
                WHERE alias_norm = ?
                "#,
            )
            .bind(status.as_str())
            .bind(error)
            .bind(if attempted { 1i64 } else { 0 })
            .bind(attempted)
            .bind(&now)
            .bind(alias_norm)
            .execute(&self.pool)
            .await?;
            Ok::<_, fpf_common::Error>(())
        })
        .await
    }

    async fn bind_resolved(&self, alias_norm: &str, hit: &GeocodeHit) -> Result<()> {
        let geokey = geokey_for(hit, alias_norm);
        let confidence = precision_confidence(&hit.precision);
        let provider = self.geocoder.provider().to_string();
        let now = fpf_common::time::now_rfc3339();

        retry_on_lock("geo key bind", LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                r#"
                INSERT INTO geo_keys (geokey, lat, lon, precision, confidence, kind, provider, provider_uri, label, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(geokey) DO UPDATE SET
                    lat = excluded.lat,
                    lon = excluded.lon,
                    precision = excluded.precision,
                    confidence = excluded.confidence,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&geokey)
            .bind(hit.point.lat)
            .bind(hit.point.lon)
            .bind(&hit.precision)
            .bind(confidence)
            .bind(hit.kind.as_deref())
            .bind(&provider)
            .bind(hit.uri.as_deref())
            .bind(hit.label.as_deref())
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE geo_aliases
                SET status = 'resolved', geokey = ?, last_error = NULL,
                    attempts = attempts + 1, last_attempt_at = ?
                WHERE alias_norm = ?
                "#,
            )
            .bind(&geokey)
            .bind(&now)
            .bind(alias_norm)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, fpf_common::Error>(())
        })
        .await
    }
}
