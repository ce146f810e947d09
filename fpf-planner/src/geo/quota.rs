//! Daily provider quota
//!
//! One row per (provider, day). Consumption is a conditional increment
//! (`used + n <= limit`), so concurrent workers can never overrun the limit;
//! the UPDATE itself is the mutex.

use chrono::NaiveDate;
use fpf_common::Result;
use sqlx::SqlitePool;
use tracing::{debug, info};

/// Atomically take `n` units of today's quota. `false` means exhausted.
pub async fn try_consume(
    pool: &SqlitePool,
    provider: &str,
    day: NaiveDate,
    daily_limit: i64,
    n: i64,
) -> Result<bool> {
    let day = day.to_string();
    let now = fpf_common::time::now_rfc3339();

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO geo_api_usage_daily (provider, day, used, daily_limit, updated_at)
        VALUES (?, ?, 0, ?, ?)
        "#,
    )
    .bind(provider)
    .bind(&day)
    .bind(daily_limit)
    .bind(&now)
    .execute(pool)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE geo_api_usage_daily
        SET used = used + ?, daily_limit = ?, updated_at = ?
        WHERE provider = ? AND day = ? AND used + ? <= ?
        "#,
    )
    .bind(n)
    .bind(daily_limit)
    .bind(&now)
    .bind(provider)
    .bind(&day)
    .bind(n)
    .bind(daily_limit)
    .execute(pool)
    .await?;

    let consumed = result.rows_affected() == 1;
    if consumed {
        debug!(provider, day = %day, n, "Quota consumed");
    } else {
        info!(provider, day = %day, daily_limit, "Daily geocoder quota exhausted");
    }
    Ok(consumed)
}

/// Units used so far on `day`
pub async fn usage(pool: &SqlitePool, provider: &str, day: NaiveDate) -> Result<i64> {
    let used: Option<i64> =
        sqlx::query_scalar("SELECT used FROM geo_api_usage_daily WHERE provider = ? AND day = ?")
            .bind(provider)
            .bind(day.to_string())
            .fetch_optional(pool)
            .await?;
    Ok(used.unwrap_or(0))
}
