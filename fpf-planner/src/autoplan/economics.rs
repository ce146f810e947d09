//! Rate-per-km thresholds
//!
//! The static minimum comes from the plan. With `dyn_rpm_enabled` the
//! quantile of current market rates is computed as well, clamped to
//! `[floor, cap]` (a zero cap means unbounded), and the stricter of the two
//! is applied.

use super::store;
use crate::flowlang::Settings;
use chrono::NaiveDate;
use fpf_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RpmThreshold {
    pub static_min: f64,
    pub dynamic: Option<f64>,
    /// Samples behind the dynamic value
    pub samples: usize,
    pub effective: f64,
}

/// Quantile with linear interpolation between closest ranks
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

pub fn clamp_dynamic(value: f64, floor: f64, cap: f64) -> f64 {
    let value = value.max(floor);
    if cap > 0.0 {
        value.min(cap)
    } else {
        value
    }
}

/// Threshold in effect for the candidates fresh since `cutoff`
pub async fn rpm_threshold(pool: &SqlitePool, settings: &Settings, cutoff: NaiveDate) -> Result<RpmThreshold> {
    let econ = &settings.economics;
    let static_min = econ.rpm_min;

    if !econ.dyn_rpm_enabled {
        return Ok(RpmThreshold {
            static_min,
            dynamic: None,
            samples: 0,
            effective: static_min,
        });
    }

    let rates = store::fresh_rates(pool, cutoff).await?;
    let dynamic = quantile(&rates, econ.dyn_rpm_quantile)
        .map(|q| clamp_dynamic(q, econ.dyn_rpm_floor, econ.dyn_rpm_cap));

    Ok(RpmThreshold {
        static_min,
        dynamic,
        samples: rates.len(),
        effective: dynamic.map_or(static_min, |d| d.max(static_min)),
    })
}
