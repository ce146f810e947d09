//! # FoxProFlow Common Library
//!
//! Shared code for the FoxProFlow planner services including:
//! - Error types
//! - Bootstrap configuration loading
//! - Database initialization and schema introspection
//! - Time helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
