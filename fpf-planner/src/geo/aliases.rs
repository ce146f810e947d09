//! Geo alias storage
//!
//! **Lifecycle:** `new → {resolved | retry | blocked}`. `blocked` and
//! `resolved` are terminal; `retry` is picked up again after a cooldown.

use super::normalize::{classify_kind, is_junk, normalize, AliasKind};
use super::GeoPoint;
use fpf_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasStatus {
    New,
    Retry,
    Blocked,
    Resolved,
}

impl AliasStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasStatus::New => "new",
            AliasStatus::Retry => "retry",
            AliasStatus::Blocked => "blocked",
            AliasStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(AliasStatus::New),
            "retry" => Some(AliasStatus::Retry),
            "blocked" => Some(AliasStatus::Blocked),
            "resolved" => Some(AliasStatus::Resolved),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AliasStatus::Blocked | AliasStatus::Resolved)
    }
}

/// Result of recording one sighting of a place name
#[derive(Debug, Clone, PartialEq)]
pub struct AliasSighting {
    pub alias_norm: String,
    pub kind: AliasKind,
    pub status: AliasStatus,
    pub hits: i64,
}

/// Insert a new alias or bump hits/last_seen of an existing one.
///
/// Junk text is stored as `blocked` so it is never sent to the geocoder.
/// Returns `None` when nothing is left after normalization.
pub async fn upsert_alias(pool: &SqlitePool, raw: &str) -> Result<Option<AliasSighting>> {
    let norm = normalize(raw);
    if norm.is_empty() {
        return Ok(None);
    }

    let kind = classify_kind(&norm);
    let initial = if is_junk(&norm) {
        AliasStatus::Blocked
    } else {
        AliasStatus::New
    };
    let now = fpf_common::time::now_rfc3339();

    let row = sqlx::query(
        r#"
        INSERT INTO geo_aliases (alias_norm, raw_sample, kind, status, hits, first_seen, last_seen)
        VALUES (?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT(alias_norm) DO UPDATE SET
            hits = geo_aliases.hits + 1,
            last_seen = excluded.last_seen,
            status = CASE WHEN excluded.status = 'blocked' THEN 'blocked' ELSE geo_aliases.status END
        RETURNING status, hits
        "#,
    )
    .bind(&norm)
    .bind(raw.trim())
    .bind(kind.as_str())
    .bind(initial.as_str())
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    let status: String = row.get("status");
    let hits: i64 = row.get("hits");
    debug!(alias = %norm, status = %status, hits, "Alias sighting recorded");

    Ok(Some(AliasSighting {
        alias_norm: norm,
        kind,
        status: AliasStatus::parse(&status).unwrap_or(initial),
        hits,
    }))
}

/// Coordinates for a resolved alias, without any external call
pub async fn lookup_cached(pool: &SqlitePool, alias_norm: &str) -> Result<Option<GeoPoint>> {
    let row: Option<(f64, f64)> = sqlx::query_as(
        r#"
        SELECT k.lat, k.lon
        FROM geo_aliases a
        JOIN geo_keys k ON k.geokey = a.geokey
        WHERE a.alias_norm = ? AND a.status = 'resolved'
        "#,
    )
    .bind(alias_norm)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(lat, lon)| GeoPoint::new(lat, lon)).filter(GeoPoint::is_valid))
}

/// Current status of an alias
pub async fn alias_status(pool: &SqlitePool, alias_norm: &str) -> Result<Option<AliasStatus>> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM geo_aliases WHERE alias_norm = ?")
            .bind(alias_norm)
            .fetch_optional(pool)
            .await?;
    Ok(status.as_deref().and_then(AliasStatus::parse))
}
