//! Task names
//!
//! Other services enqueue these by name, so they are a wire contract.

pub const AUTOPLAN_AUDIT: &str = "planner.autoplan.audit";
pub const AUTOPLAN_APPLY: &str = "planner.autoplan.apply";
pub const AUTOPLAN_PUSH: &str = "planner.autoplan.push_to_trips";
pub const AUTOPLAN_CONFIRM: &str = "planner.autoplan.confirm";

pub const AUTOPLAN_CHAIN: &str = "task_autoplan_chain";
pub const AUTOPLAN_CHAIN_ALIAS: &str = "autoplan.chain";
pub const AUTOPLAN_CHAIN_PLANNER: &str = "planner.autoplan.chain";
pub const AUTOPLAN_KICK: &str = "autoplan.kick";

pub const ROUTING_ENRICH_TRIPS: &str = "routing.enrich.trips";
pub const ROUTING_ENRICH_CONFIRMED: &str = "routing.enrich.confirmed";

pub const GEO_RESOLVE_BATCH: &str = "geo.geokey.resolve_yandex_batch";
pub const GEO_SEED_ALIASES: &str = "geo.geokey.seed_aliases_from_trip_segments";

/// Names a registered chain task may go by, in probe order
pub const CHAIN_TASK_NAMES: &[&str] = &[AUTOPLAN_CHAIN, AUTOPLAN_CHAIN_ALIAS, AUTOPLAN_CHAIN_PLANNER];

/// Steps of the manually built chain, in execution order
pub const CANVAS_STEPS: &[&str] = &[AUTOPLAN_AUDIT, AUTOPLAN_APPLY, AUTOPLAN_PUSH, AUTOPLAN_CONFIRM];

/// Tasks `/health` requires to be registered
pub const CRITICAL_TASKS: &[&str] = &[
    AUTOPLAN_AUDIT,
    AUTOPLAN_APPLY,
    AUTOPLAN_CONFIRM,
    AUTOPLAN_CHAIN,
    AUTOPLAN_KICK,
];
