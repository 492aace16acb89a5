//! # EquiTag Common Library
//!
//! Shared code for the EquiTag fairness audit tools including:
//! - Error taxonomy (structural failures only; statistical edge cases are values)
//! - Configuration loading (TOML bootstrap + layered resolution)
//! - Audit parameter record with documented defaults and validation

pub mod config;
pub mod error;
pub mod params;

pub use config::{load_config, ConfigSource, TomlConfig};
pub use error::{Error, Result};
pub use params::{AuditParams, IntersectionSpec};
