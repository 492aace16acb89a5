//! Threshold Mitigation Optimizer
//!
//! **Purpose:** Replace the single global decision threshold with learned
//! subgroup-aware thresholds that shrink the chosen fairness gap, then
//! re-materialize predictions in the input listing format so they can be
//! evaluated again.

pub mod search;
pub mod thresholds;

pub use search::{grid_search_min, threshold_grid, SearchOutcome, GRID_POINTS};
pub use thresholds::{
    learn_thresholds, rebuild, LearnedThresholds, Objective, ObjectiveKind, ThresholdAuditRow, ThresholdMap,
};
