//! Bootstrap configuration loading and data folder resolution
//!
//! Bootstrap settings are read once at startup from an optional TOML file.
//! Anything that changes per plan lives in FlowLang plan files instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bootstrap configuration loaded from TOML file
///
/// Every field is optional in the file; missing values fall back to
/// environment variables and then to compiled defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Data folder holding the database and plan files
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Path to SQLite database file (relative to data_dir if not absolute)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP server port
    #[serde(default)]
    pub port: Option<u16>,

    /// Directory containing `<plan>.flow` / `<plan>.plan` files
    #[serde(default)]
    pub plans_dir: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Routing backend section
    #[serde(default)]
    pub routing: RoutingSection,

    /// Geocoder section
    #[serde(default)]
    pub geocoder: GeocoderSection,

    /// Periodic scheduling section
    #[serde(default)]
    pub beat: BeatSection,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `[routing]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoutingSection {
    pub osrm_url: Option<String>,
    pub osrm_profile: Option<String>,
    pub osrm_timeout_secs: Option<u64>,
    pub batch_limit: Option<i64>,
    pub pool_multiplier: Option<i64>,
    pub commit_every: Option<usize>,
    pub require_geo: Option<bool>,
    pub avg_speed_kph: Option<f64>,
    pub same_place_km: Option<f64>,
    pub same_place_kph: Option<f64>,
    pub same_place_eps_m: Option<f64>,
}

/// `[geocoder]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeocoderSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub daily_limit: Option<i64>,
    pub timeout_secs: Option<u64>,
    pub requests_per_second: Option<u32>,
    pub retry_cooldown_min: Option<i64>,
    pub batch_limit: Option<i64>,
}

/// `[beat]` table
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BeatSection {
    pub enabled: Option<bool>,
    pub geocode_every_min: Option<u64>,
    pub routing_every_min: Option<u64>,
}

impl TomlConfig {
    /// Load TOML configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Load configuration following the lookup order:
    /// 1. Explicit path (CLI argument)
    /// 2. `FPF_CONFIG` environment variable
    /// 3. Platform config file (`~/.config/foxproflow/planner.toml`, `/etc/foxproflow/planner.toml`)
    ///
    /// A missing file yields defaults; an unreadable or malformed file is an error.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var("FPF_CONFIG") {
            return Self::load(Path::new(&path));
        }

        match default_config_file() {
            Some(path) => {
                info!("Loading bootstrap config from {}", path.display());
                Self::load(&path)
            }
            None => {
                debug!("No bootstrap config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Find the first existing platform config file
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("foxproflow").join("planner.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/foxproflow/planner.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Data folder resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_dir(cli_arg: Option<&Path>, env_var_name: &str, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml.data_dir {
        return path.clone();
    }

    default_data_dir()
}

/// Get OS-dependent default data folder path
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("foxproflow"))
        .unwrap_or_else(|| PathBuf::from("./foxproflow_data"))
}

/// Resolve a possibly-relative path against the data folder
pub fn within_data_dir(data_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

/// Read an environment variable, treating blank values as unset
pub fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse an environment variable; unparseable values are ignored with a warning
pub fn env_parse<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_nonempty(name)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(var = name, value = %raw, error = %e, "Ignoring unparseable environment value");
            None
        }
    }
}

/// Parse a boolean environment value (`true/false/1/0/yes/no/on/off`)
pub fn env_bool(name: &str) -> Option<bool> {
    let raw = env_nonempty(name)?;
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparseable boolean environment value");
            None
        }
    }
}
