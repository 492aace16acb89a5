//! # EquiTag Fairness Audit Library (equitag-audit)
//!
//! Fairness evaluation and post-processing mitigation for multi-label video
//! classifiers.
//!
//! **Purpose:** Expand per-video predictions into a long-form table, resolve
//! protected-group membership, compute per-subgroup and per-intersection
//! parity gaps with Holm-corrected significance, compare engagement between
//! groups, and learn subgroup-conditional decision thresholds.
//!
//! **Architecture:** Immutable inputs (`PredictionTable`, `MembershipMap`)
//! flow through pure engines (`metrics`, `engagement`, `mitigation`); the
//! `pipeline` module owns all artifact I/O.

pub mod compare;
pub mod engagement;
pub mod membership;
pub mod metrics;
pub mod mitigation;
pub mod pipeline;
pub mod predictions;
pub mod report;
pub mod stats;
pub mod tables;

pub use equitag_common::{AuditParams, Error, Result};
pub use membership::{Grouping, MembershipMap};
pub use metrics::GroupStat;
pub use predictions::PredictionTable;
