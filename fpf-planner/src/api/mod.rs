//! HTTP boundary
//!
//! Thin handlers over the dispatcher, broker results and settings cache.

pub mod config;
pub mod health;
pub mod results;
pub mod run;

pub use config::config_routes;
pub use health::health_routes;
pub use results::result_routes;
pub use run::run_routes;
