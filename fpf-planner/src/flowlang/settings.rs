//! Typed autoplan settings resolved per plan
//!
//! **Priority per field (highest wins):**
//! 1. `<plan>.flow` structured profile (`section { key: value }`)
//! 2. `<plan>.plan` flat file (`key = value` or `section.key = value`)
//! 3. Environment variable `AUTOPLAN_<KEY>`
//! 4. Compiled default
//!
//! A value that does not coerce to the field's type is logged and the next
//! source is consulted. Resolution never fails.

use super::parser::{parse_flow, FlowDocument};
use super::plan_file::{coerce_scalar, parse_plan_file, FromPlanValue, PlanValue};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Plan used when `AUTOPLAN_FLOW_PLAN` is unset
pub const DEFAULT_PLAN: &str = "rolling_msk";

/// Plan names map to file stems under the plans directory: ASCII letters,
/// digits, `_` and `-` only
pub fn is_valid_plan_name(plan: &str) -> bool {
    !plan.is_empty()
        && plan
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Where a resolved field came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingSource {
    Profile,
    Plan,
    Env,
    Default,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WindowSettings {
    pub freights_days_back: i64,
    pub apply_window_min: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EconomicsSettings {
    pub rpm_min: f64,
    pub rph_min: f64,
    pub dyn_rpm_enabled: bool,
    pub dyn_rpm_quantile: f64,
    pub dyn_rpm_floor: f64,
    /// 0 means no cap
    pub dyn_rpm_cap: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlaSettings {
    pub p_arrive_min: f64,
    pub fallback_km: f64,
    pub avg_speed_kmh: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChainSettings {
    pub chain_enable_audit: bool,
    pub chain_enable_apply: bool,
    pub chain_enable_confirm: bool,
    pub chain_every_min: i64,
    pub confirm_trigger_routing: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SafetySettings {
    pub dry_run: bool,
    pub smoke_mode: bool,
}

/// Settings for one named plan. Immutable once resolved.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub plan: String,
    pub window: WindowSettings,
    pub economics: EconomicsSettings,
    pub sla: SlaSettings,
    pub chain: ChainSettings,
    pub safety: SafetySettings,
    /// `section.key` → source of the resolved value
    pub sources: BTreeMap<String, SettingSource>,
}

impl Settings {
    /// All defaults, no files, no environment
    pub fn defaults(plan: &str) -> Self {
        Layers::empty().resolve(plan)
    }

    /// Limit for one phase run: requested or plan default, at least 1,
    /// and at most 1 in smoke mode
    pub fn effective_limit(&self, requested: Option<i64>) -> i64 {
        let limit = requested.unwrap_or(self.window.limit).max(1);
        if self.safety.smoke_mode {
            limit.min(1)
        } else {
            limit
        }
    }

    /// Snapshot written into every audit row
    pub fn thresholds(&self) -> Value {
        json!({
            "plan": self.plan,
            "freights_days_back": self.window.freights_days_back,
            "apply_window_min": self.window.apply_window_min,
            "limit": self.window.limit,
            "rpm_min": self.economics.rpm_min,
            "rph_min": self.economics.rph_min,
            "dyn_rpm_enabled": self.economics.dyn_rpm_enabled,
            "dyn_rpm_quantile": self.economics.dyn_rpm_quantile,
            "p_arrive_min": self.sla.p_arrive_min,
            "fallback_km": self.sla.fallback_km,
            "avg_speed_kmh": self.sla.avg_speed_kmh,
            "dry_run": self.safety.dry_run,
            "smoke_mode": self.safety.smoke_mode,
        })
    }
}

/// The raw sources consulted for one plan
#[derive(Debug, Default)]
struct Layers {
    profile: Option<FlowDocument>,
    plan: Option<BTreeMap<String, PlanValue>>,
    use_env: bool,
}

impl Layers {
    fn empty() -> Self {
        Self::default()
    }

    fn field<T>(
        &self,
        section: &str,
        key: &str,
        default: T,
        sources: &mut BTreeMap<String, SettingSource>,
    ) -> T
    where
        T: FromPlanValue + Display,
    {
        let name = format!("{}.{}", section, key);

        if let Some(raw) = self.profile.as_ref().and_then(|p| p.get(section, key)) {
            match T::from_plan_value(&coerce_scalar(raw)) {
                Some(v) => {
                    sources.insert(name, SettingSource::Profile);
                    return v;
                }
                None => warn!(field = %name, value = raw, "Unusable profile value, trying next source"),
            }
        }

        if let Some(plan) = &self.plan {
            if let Some(value) = plan.get(&name).or_else(|| plan.get(key)) {
                match T::from_plan_value(value) {
                    Some(v) => {
                        sources.insert(name, SettingSource::Plan);
                        return v;
                    }
                    None => warn!(field = %name, value = ?value, "Unusable plan value, trying next source"),
                }
            }
        }

        if self.use_env {
            let env_name = format!("AUTOPLAN_{}", key.to_uppercase());
            if let Some(raw) = fpf_common::config::env_nonempty(&env_name) {
                match T::from_plan_value(&coerce_scalar(&raw)) {
                    Some(v) => {
                        sources.insert(name, SettingSource::Env);
                        return v;
                    }
                    None => warn!(field = %name, var = %env_name, value = %raw, "Unusable environment value, using default"),
                }
            }
        }

        debug!(field = %name, value = %default, "Using default");
        sources.insert(name, SettingSource::Default);
        default
    }

    fn resolve(&self, plan: &str) -> Settings {
        let mut s = BTreeMap::new();

        let window = WindowSettings {
            freights_days_back: self.field("window", "freights_days_back", 3i64, &mut s).max(0),
            apply_window_min: self.field("window", "apply_window_min", 240i64, &mut s).max(0),
            limit: self.field("window", "limit", 50i64, &mut s).max(1),
        };
        let economics = EconomicsSettings {
            rpm_min: self.field("economics", "rpm_min", 0.0f64, &mut s).max(0.0),
            rph_min: self.field("economics", "rph_min", 0.0f64, &mut s).max(0.0),
            dyn_rpm_enabled: self.field("economics", "dyn_rpm_enabled", false, &mut s),
            dyn_rpm_quantile: self
                .field("economics", "dyn_rpm_quantile", 0.6f64, &mut s)
                .clamp(0.0, 1.0),
            dyn_rpm_floor: self.field("economics", "dyn_rpm_floor", 0.0f64, &mut s).max(0.0),
            dyn_rpm_cap: self.field("economics", "dyn_rpm_cap", 0.0f64, &mut s).max(0.0),
        };
        let sla = SlaSettings {
            p_arrive_min: self.field("sla", "p_arrive_min", 0.9f64, &mut s).clamp(0.0, 1.0),
            fallback_km: positive(self.field("sla", "fallback_km", 300.0f64, &mut s), 300.0),
            avg_speed_kmh: positive(self.field("sla", "avg_speed_kmh", 60.0f64, &mut s), 60.0),
        };
        let chain = ChainSettings {
            chain_enable_audit: self.field("chain", "chain_enable_audit", true, &mut s),
            chain_enable_apply: self.field("chain", "chain_enable_apply", true, &mut s),
            chain_enable_confirm: self.field("chain", "chain_enable_confirm", true, &mut s),
            chain_every_min: self.field("chain", "chain_every_min", 10i64, &mut s).max(1),
            confirm_trigger_routing: self.field("chain", "confirm_trigger_routing", true, &mut s),
        };
        let safety = SafetySettings {
            dry_run: self.field("safety", "dry_run", false, &mut s),
            smoke_mode: self.field("safety", "smoke_mode", false, &mut s),
        };

        Settings {
            plan: plan.to_string(),
            window,
            economics,
            sla,
            chain,
            safety,
            sources: s,
        }
    }
}

fn positive(value: f64, fallback: f64) -> f64 {
    if value > 0.0 {
        value
    } else {
        fallback
    }
}

/// Resolves settings from the plan directory
#[derive(Debug, Clone)]
pub struct SettingsResolver {
    plans_dir: PathBuf,
    use_env: bool,
}

impl SettingsResolver {
    pub fn new(plans_dir: impl Into<PathBuf>) -> Self {
        Self {
            plans_dir: plans_dir.into(),
            use_env: true,
        }
    }

    /// Ignore the process environment (tests, offline inspection)
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn plans_dir(&self) -> &Path {
        &self.plans_dir
    }

    pub fn resolve(&self, plan: &str) -> Settings {
        let layers = Layers {
            profile: self.load_profile(plan),
            plan: self.load_plan_file(plan),
            use_env: self.use_env,
        };
        let settings = layers.resolve(plan);

        let overridden = settings
            .sources
            .values()
            .filter(|s| **s != SettingSource::Default)
            .count();
        info!(
            plan,
            profile = layers.profile.is_some(),
            plan_file = layers.plan.is_some(),
            overridden,
            "Resolved autoplan settings"
        );
        settings
    }

    fn load_profile(&self, plan: &str) -> Option<FlowDocument> {
        if !is_valid_plan_name(plan) {
            warn!(plan, "Invalid plan name, plan files skipped");
            return None;
        }
        let path = self.plans_dir.join(format!("{}.flow", plan));
        let text = read_optional(&path)?;
        match parse_flow(&text) {
            Ok(doc) => {
                if let Some(name) = &doc.plan_name {
                    if name != plan {
                        warn!(plan, declared = %name, path = %path.display(), "Profile declares a different plan name");
                    }
                }
                Some(doc)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed FlowLang profile");
                None
            }
        }
    }

    fn load_plan_file(&self, plan: &str) -> Option<BTreeMap<String, PlanValue>> {
        if !is_valid_plan_name(plan) {
            return None;
        }
        let path = self.plans_dir.join(format!("{}.plan", plan));
        read_optional(&path).map(|text| parse_plan_file(&text))
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read plan file");
            None
        }
    }
}

/// Active plan name from `AUTOPLAN_FLOW_PLAN`
pub fn active_plan_name() -> String {
    match fpf_common::config::env_nonempty("AUTOPLAN_FLOW_PLAN") {
        Some(plan) if is_valid_plan_name(&plan) => plan,
        Some(plan) => {
            warn!(plan = %plan, fallback = DEFAULT_PLAN, "Invalid AUTOPLAN_FLOW_PLAN");
            DEFAULT_PLAN.to_string()
        }
        None => DEFAULT_PLAN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_defaults() {
        let s = Settings::defaults("p");
        assert_eq!(s.window.freights_days_back, 3);
        assert_eq!(s.window.limit, 50);
        assert!(s.chain.chain_enable_confirm);
        assert!(!s.safety.dry_run);
        assert!(s.sources.values().all(|src| *src == SettingSource::Default));
    }

    #[test]
    fn test_profile_beats_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "msk.flow",
            "plan msk {\n window {\n  limit: 20\n }\n}\n",
        );
        write(dir.path(), "msk.plan", "limit = 30\nfreights_days_back = 7\n");

        let s = SettingsResolver::new(dir.path()).without_env().resolve("msk");
        assert_eq!(s.window.limit, 20);
        assert_eq!(s.sources["window.limit"], SettingSource::Profile);
        assert_eq!(s.window.freights_days_back, 7);
        assert_eq!(s.sources["window.freights_days_back"], SettingSource::Plan);
    }

    #[test]
    fn test_bad_profile_value_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "p.flow", "economics {\n rpm_min: lots\n}\n");
        write(dir.path(), "p.plan", "economics.rpm_min = 70,5\n");

        let s = SettingsResolver::new(dir.path()).without_env().resolve("p");
        assert_eq!(s.economics.rpm_min, 70.5);
        assert_eq!(s.sources["economics.rpm_min"], SettingSource::Plan);
    }

    #[test]
    fn test_malformed_profile_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "p.flow", "window {\n limit: 5\n");
        let s = SettingsResolver::new(dir.path()).without_env().resolve("p");
        assert_eq!(s.window.limit, 50);
    }

    #[test]
    fn test_effective_limit_and_smoke_mode() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "smoke.plan", "smoke_mode = true\n");
        let smoke = SettingsResolver::new(dir.path()).without_env().resolve("smoke");
        assert_eq!(smoke.effective_limit(Some(10)), 1);

        let normal = Settings::defaults("x");
        assert_eq!(normal.effective_limit(Some(10)), 10);
        assert_eq!(normal.effective_limit(None), 50);
        assert_eq!(normal.effective_limit(Some(0)), 1);
    }

    #[test]
    fn test_plan_name_validation() {
        assert!(is_valid_plan_name("rolling_msk"));
        assert!(is_valid_plan_name("spb-2"));
        assert!(!is_valid_plan_name(""));
        assert!(!is_valid_plan_name("../outside"));
        assert!(!is_valid_plan_name("a/b"));
        assert!(!is_valid_plan_name("msk.plan"));
        assert!(!is_valid_plan_name("москва"));
    }

    #[test]
    fn test_invalid_plan_name_reads_no_files() {
        let root = tempfile::tempdir().unwrap();
        let plans = root.path().join("plans");
        std::fs::create_dir(&plans).unwrap();
        write(root.path(), "outside.plan", "limit = 9\n");
        write(root.path(), "outside.flow", "window {\n limit: 9\n}\n");

        let s = SettingsResolver::new(&plans).without_env().resolve("../outside");
        assert_eq!(s.window.limit, 50);
        assert_eq!(s.sources["window.limit"], SettingSource::Default);
    }

    #[test]
    fn test_thresholds_snapshot() {
        let t = Settings::defaults("rolling_msk").thresholds();
        assert_eq!(t["plan"], "rolling_msk");
        assert_eq!(t["freights_days_back"], 3);
        assert_eq!(t["rpm_min"], 0.0);
    }
}
