//! Service configuration resolution for fpf-planner
//!
//! Each field resolves ENV → TOML → compiled default. Plan-level settings
//! (thresholds, windows, chain flags) are not here; see [`crate::flowlang`].

use fpf_common::config::{env_bool, env_nonempty, env_parse, TomlConfig};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_OSRM_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_GEOCODER_URL: &str = "https://geocode-maps.yandex.ru/1.x/";

/// Pick the first configured tier and log where the value came from
fn pick<T: Display>(field: &str, env: Option<T>, toml: Option<T>, default: T) -> T {
    if let Some(v) = env {
        debug!(field, value = %v, "Config value from environment");
        return v;
    }
    if let Some(v) = toml {
        debug!(field, value = %v, "Config value from TOML");
        return v;
    }
    default
}

/// Routing backend and enrichment batch configuration
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// OSRM-compatible base URL
    pub osrm_url: String,
    /// OSRM profile (`driving`)
    pub osrm_profile: String,
    /// Per-request timeout for the routing backend
    pub osrm_timeout: Duration,
    /// Default segments per enrichment run
    pub batch_limit: i64,
    /// Candidate pool size as a multiple of the batch limit
    pub pool_multiplier: i64,
    /// Segments per committed batch
    pub commit_every: usize,
    /// Drop unresolvable (tier 9) segments from selection
    pub require_geo: bool,
    /// Speed used to derive duration from great-circle distance
    pub avg_speed_kph: f64,
    /// Assumed distance for same-place segments
    pub same_place_km: f64,
    /// Assumed speed for same-place segments
    pub same_place_kph: f64,
    /// Points closer than this are treated as the same place
    pub same_place_eps_m: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            osrm_url: DEFAULT_OSRM_URL.to_string(),
            osrm_profile: "driving".to_string(),
            osrm_timeout: Duration::from_secs(5),
            batch_limit: 200,
            pool_multiplier: 5,
            commit_every: 200,
            require_geo: true,
            avg_speed_kph: 60.0,
            same_place_km: 50.0,
            same_place_kph: 40.0,
            same_place_eps_m: 200.0,
        }
    }
}

impl RoutingConfig {
    pub fn resolve(toml: &TomlConfig) -> Self {
        let d = Self::default();
        let t = &toml.routing;

        let timeout_secs = pick(
            "routing.osrm_timeout",
            env_parse::<f64>("OSRM_TIMEOUT"),
            t.osrm_timeout_secs.map(|s| s as f64),
            d.osrm_timeout.as_secs_f64(),
        );

        let cfg = Self {
            osrm_url: pick("routing.osrm_url", env_nonempty("OSRM_URL"), t.osrm_url.clone(), d.osrm_url),
            osrm_profile: pick(
                "routing.osrm_profile",
                env_nonempty("OSRM_PROFILE"),
                t.osrm_profile.clone(),
                d.osrm_profile,
            ),
            osrm_timeout: timeout_or(timeout_secs, d.osrm_timeout),
            batch_limit: pick(
                "routing.batch_limit",
                env_parse("ROUTING_BATCH_LIMIT"),
                t.batch_limit,
                d.batch_limit,
            )
            .max(1),
            pool_multiplier: pick(
                "routing.pool_multiplier",
                env_parse("ROUTING_POOL_MULTIPLIER"),
                t.pool_multiplier,
                d.pool_multiplier,
            )
            .max(1),
            commit_every: pick(
                "routing.commit_every",
                env_parse("ROUTING_COMMIT_EVERY"),
                t.commit_every,
                d.commit_every,
            )
            .max(1),
            require_geo: pick(
                "routing.require_geo",
                env_bool("ROUTING_REQUIRE_GEO"),
                t.require_geo,
                d.require_geo,
            ),
            avg_speed_kph: positive_or(
                pick(
                    "routing.avg_speed_kph",
                    env_parse("ROUTING_AVG_SPEED_KPH"),
                    t.avg_speed_kph,
                    d.avg_speed_kph,
                ),
                d.avg_speed_kph,
            ),
            same_place_km: positive_or(
                pick(
                    "routing.same_place_km",
                    env_parse("ROUTING_SAME_PLACE_KM"),
                    t.same_place_km,
                    d.same_place_km,
                ),
                d.same_place_km,
            ),
            same_place_kph: positive_or(
                pick(
                    "routing.same_place_kph",
                    env_parse("ROUTING_SAME_PLACE_KPH"),
                    t.same_place_kph,
                    d.same_place_kph,
                ),
                d.same_place_kph,
            ),
            same_place_eps_m: pick(
                "routing.same_place_eps_m",
                env_parse("ROUTING_SAME_PLACE_EPS_M"),
                t.same_place_eps_m,
                d.same_place_eps_m,
            )
            .max(0.0),
        };

        info!(
            osrm_url = %cfg.osrm_url,
            profile = %cfg.osrm_profile,
            timeout_ms = cfg.osrm_timeout.as_millis() as u64,
            commit_every = cfg.commit_every,
            "Routing configuration resolved"
        );
        cfg
    }
}

/// Speeds and distances must be positive to be divided by
fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

/// Request timeout kept within 0.1..=60 seconds; non-finite input gets `fallback`
fn timeout_or(secs: f64, fallback: Duration) -> Duration {
    if secs.is_finite() {
        Duration::from_secs_f64(secs.clamp(0.1, 60.0))
    } else {
        fallback
    }
}

/// Geocoder provider configuration
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    /// Provider API key; geocoding is disabled without one
    pub api_key: Option<String>,
    pub base_url: String,
    /// Calls allowed per provider per calendar day
    pub daily_limit: i64,
    pub timeout: Duration,
    pub requests_per_second: u32,
    /// Minutes before a `retry` alias is attempted again
    pub retry_cooldown_min: i64,
    /// Default aliases per resolution batch
    pub batch_limit: i64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_GEOCODER_URL.to_string(),
            daily_limit: 1000,
            timeout: Duration::from_secs(5),
            requests_per_second: 5,
            retry_cooldown_min: 180,
            batch_limit: 50,
        }
    }
}

impl GeocoderConfig {
    pub fn resolve(toml: &TomlConfig) -> Self {
        let d = Self::default();
        let t = &toml.geocoder;

        let api_key = env_nonempty("YANDEX_GEOCODER_API_KEY")
            .or_else(|| t.api_key.clone().filter(|k| !k.trim().is_empty()));
        match &api_key {
            Some(_) => info!("Geocoder API key configured"),
            None => info!("Geocoder API key not configured, geocoding batches disabled"),
        }

        Self {
            api_key,
            base_url: pick(
                "geocoder.base_url",
                env_nonempty("YANDEX_GEOCODER_URL"),
                t.base_url.clone(),
                d.base_url,
            ),
            daily_limit: pick(
                "geocoder.daily_limit",
                env_parse("YANDEX_GEOCODER_DAILY_LIMIT"),
                t.daily_limit,
                d.daily_limit,
            )
            .max(0),
            timeout: timeout_or(
                pick(
                    "geocoder.timeout_secs",
                    env_parse::<f64>("YANDEX_GEOCODER_TIMEOUT"),
                    t.timeout_secs.map(|s| s as f64),
                    d.timeout.as_secs_f64(),
                ),
                d.timeout,
            ),
            requests_per_second: pick(
                "geocoder.requests_per_second",
                env_parse("YANDEX_GEOCODER_RPS"),
                t.requests_per_second,
                d.requests_per_second,
            )
            .max(1),
            retry_cooldown_min: pick(
                "geocoder.retry_cooldown_min",
                env_parse("GEO_RETRY_COOLDOWN_MIN"),
                t.retry_cooldown_min,
                d.retry_cooldown_min,
            )
            .max(0),
            batch_limit: pick(
                "geocoder.batch_limit",
                env_parse("GEO_BATCH_LIMIT"),
                t.batch_limit,
                d.batch_limit,
            )
            .max(1),
        }
    }
}

/// Periodic scheduling configuration
///
/// The autoplan chain cadence comes from the active plan (`chain_every_min`);
/// the cadences here cover the background geo and routing batches.
#[derive(Debug, Clone)]
pub struct BeatConfig {
    pub enabled: bool,
    /// 0 disables the schedule
    pub geocode_every_min: u64,
    /// 0 disables the schedule
    pub routing_every_min: u64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            geocode_every_min: 0,
            routing_every_min: 0,
        }
    }
}

impl BeatConfig {
    pub fn resolve(toml: &TomlConfig) -> Self {
        let d = Self::default();
        let t = &toml.beat;
        Self {
            enabled: pick("beat.enabled", env_bool("FPF_BEAT_ENABLED"), t.enabled, d.enabled),
            geocode_every_min: pick(
                "beat.geocode_every_min",
                env_parse("FPF_BEAT_GEOCODE_EVERY_MIN"),
                t.geocode_every_min,
                d.geocode_every_min,
            ),
            routing_every_min: pick(
                "beat.routing_every_min",
                env_parse("FPF_BEAT_ROUTING_EVERY_MIN"),
                t.routing_every_min,
                d.routing_every_min,
            ),
        }
    }
}

/// Directory holding `<plan>.flow` and `<plan>.plan` files
pub fn resolve_plans_dir(data_dir: &Path, toml: &TomlConfig) -> PathBuf {
    if let Some(dir) = env_nonempty("AUTOPLAN_PLANS_DIR") {
        return PathBuf::from(dir);
    }
    match &toml.plans_dir {
        Some(dir) => fpf_common::config::within_data_dir(data_dir, dir),
        None => data_dir.join("plans"),
    }
}

/// Everything the service resolves once at startup
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub routing: RoutingConfig,
    pub geocoder: GeocoderConfig,
    pub beat: BeatConfig,
}

impl ServiceConfig {
    pub fn resolve(toml: &TomlConfig) -> Self {
        Self {
            routing: RoutingConfig::resolve(toml),
            geocoder: GeocoderConfig::resolve(toml),
            beat: BeatConfig::resolve(toml),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_priority() {
        assert_eq!(pick("f", Some(1), Some(2), 3), 1);
        assert_eq!(pick("f", None, Some(2), 3), 2);
        assert_eq!(pick("f", None::<i32>, None, 3), 3);
    }

    #[test]
    fn test_positive_or() {
        assert_eq!(positive_or(0.0, 40.0), 40.0);
        assert_eq!(positive_or(f64::NAN, 40.0), 40.0);
        assert_eq!(positive_or(55.0, 40.0), 55.0);
    }

    #[test]
    fn test_timeout_or() {
        let fallback = Duration::from_secs(5);
        assert_eq!(timeout_or(f64::NAN, fallback), fallback);
        assert_eq!(timeout_or(f64::INFINITY, fallback), fallback);
        assert_eq!(timeout_or(2.5, fallback), Duration::from_millis(2500));
        assert_eq!(timeout_or(0.0, fallback), Duration::from_millis(100));
        assert_eq!(timeout_or(1e12, fallback), Duration::from_secs(60));
    }

    #[test]
    fn test_plans_dir_relative_to_data_dir() {
        let toml = TomlConfig {
            plans_dir: Some(PathBuf::from("flows")),
            ..Default::default()
        };
        let dir = resolve_plans_dir(Path::new("/data"), &toml);
        assert!(dir == PathBuf::from("/data/flows") || std::env::var("AUTOPLAN_PLANS_DIR").is_ok());
    }
}
