//! FlowLang plan settings
//!
//! Named plans configure the autoplan pipeline. Sources are layered: a
//! structured `.flow` profile, a flat `.plan` file, `AUTOPLAN_*` environment
//! variables, then compiled defaults.

pub mod cache;
pub mod parser;
pub mod plan_file;
pub mod settings;

pub use cache::SettingsCache;
pub use parser::{parse_flow, FlowDocument, FlowParseError};
pub use plan_file::{coerce_scalar, parse_plan_file, PlanValue};
pub use settings::{
    active_plan_name, is_valid_plan_name, ChainSettings, EconomicsSettings, SafetySettings, SettingSource, Settings, SettingsResolver,
    SlaSettings, WindowSettings, DEFAULT_PLAN,
};
