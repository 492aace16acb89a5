//! Audit parameter record
//!
//! Every entry point of the fairness core receives an `AuditParams` value
//! explicitly. There is no ambient tuning state.
//!
//! # Usage
//!
//! ```rust
//! use equitag_common::AuditParams;
//!
//! let params = AuditParams {
//!     min_support: 50,
//!     ..AuditParams::default()
//! };
//! params.validate().unwrap();
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Namespaces evaluated when none are configured
pub const DEFAULT_NAMESPACES: &[&str] = &[
    "race_ethnicity",
    "gender",
    "sexuality",
    "nationality",
    "hair_color",
    "age",
];

/// Separator used in intersection combination keys (`gender*race_ethnicity`)
pub const COMBO_SEPARATOR: char = '*';

/// Tunable parameters of a fairness audit / mitigation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditParams {
    /// Minimum subgroup size to report or learn a threshold
    ///
    /// Valid range: >= 1
    /// Default: 100
    pub min_support: usize,

    /// Global score cutoff for a positive prediction
    ///
    /// Valid range: [0.0, 1.0]
    /// Default: 0.5
    /// Also anchors the population reference rates of the optimizer
    pub base_threshold: f64,

    /// Weight of the FPR term in the equal-opportunity objective
    ///
    /// Valid range: >= 0.0
    /// Default: 0.5
    pub lambda_fpr: f64,

    /// Weight of the precision term in the demographic-parity objective
    ///
    /// Valid range: >= 0.0
    /// Default: 0.0 (disabled)
    pub lambda_precision: f64,

    /// Significance cutoff for annotation only (never filters rows)
    ///
    /// Valid range: (0.0, 1.0)
    /// Default: 0.05
    pub alpha: f64,

    /// Namespaces to evaluate, in reporting order
    pub namespaces: Vec<String>,

    /// Requested intersections (`ALL2`, `ALL3`, `ns1*ns2`, ...)
    pub intersections: Vec<IntersectionSpec>,
}

impl Default for AuditParams {
    fn default() -> Self {
        Self {
            min_support: 100,
            base_threshold: 0.5,
            lambda_fpr: 0.5,
            lambda_precision: 0.0,
            alpha: 0.05,
            namespaces: DEFAULT_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            intersections: Vec::new(),
        }
    }
}

impl AuditParams {
    /// Check every field against its valid range
    ///
    /// # Errors
    /// `Error::Config` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        if self.min_support == 0 {
            return Err(Error::Config("min_support must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.base_threshold) {
            return Err(Error::Config(format!(
                "base_threshold must be within [0, 1], got {}",
                self.base_threshold
            )));
        }
        for (name, value) in [
            ("lambda_fpr", self.lambda_fpr),
            ("lambda_precision", self.lambda_precision),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "{} must be a finite value >= 0, got {}",
                    name, value
                )));
            }
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(Error::Config(format!(
                "alpha must be within (0, 1), got {}",
                self.alpha
            )));
        }
        Ok(())
    }

    /// Expand the intersection requests into concrete namespace tuples
    ///
    /// Only namespaces contained in `available` participate. Duplicate
    /// combinations (e.g. `ALL2` plus an explicit pair) are emitted once, in
    /// first-requested order.
    pub fn intersection_combos(&self, available: &[String]) -> Vec<Vec<String>> {
        let mut combos: Vec<Vec<String>> = Vec::new();
        for spec in &self.intersections {
            for combo in spec.expand(available) {
                if !combos.contains(&combo) {
                    combos.push(combo);
                }
            }
        }
        combos
    }
}

/// One requested family of intersections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntersectionSpec {
    /// Every 2-way combination of the evaluated namespaces
    AllPairs,
    /// Every 3-way combination of the evaluated namespaces
    AllTriples,
    /// One explicit combination (2 or 3 namespaces)
    Explicit(Vec<String>),
}

impl IntersectionSpec {
    /// Concrete namespace tuples for this request
    ///
    /// Combinations keep the order of `available`; explicit combinations are
    /// dropped when any member namespace is unavailable.
    pub fn expand(&self, available: &[String]) -> Vec<Vec<String>> {
        match self {
            IntersectionSpec::AllPairs => combinations(available, 2),
            IntersectionSpec::AllTriples => combinations(available, 3),
            IntersectionSpec::Explicit(names) => {
                if names.iter().all(|n| available.contains(n)) {
                    vec![names.clone()]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

/// Key used in artifact names for a namespace combination
pub fn combo_key(combo: &[String]) -> String {
    combo.join(COMBO_SEPARATOR.to_string().as_str())
}

fn combinations(items: &[String], k: usize) -> Vec<Vec<String>> {
    fn recurse(
        items: &[String],
        k: usize,
        start: usize,
        current: &mut Vec<String>,
        out: &mut Vec<Vec<String>>,
    ) {
        if current.len() == k {
            out.push(current.clone());
            return;
        }
        for i in start..items.len() {
            current.push(items[i].clone());
            recurse(items, k, i + 1, current, out);
            current.pop();
        }
    }

    let mut out = Vec::new();
    if k <= items.len() {
        recurse(items, k, 0, &mut Vec::with_capacity(k), &mut out);
    }
    out
}

impl FromStr for IntersectionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "ALL2" => return Ok(IntersectionSpec::AllPairs),
            "ALL3" => return Ok(IntersectionSpec::AllTriples),
            _ => {}
        }

        let names: Vec<String> = trimmed
            .split(COMBO_SEPARATOR)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        if names.len() < 2 || names.len() > 3 {
            return Err(Error::Config(format!(
                "intersection '{}' must be ALL2, ALL3 or 2-3 namespaces joined by '{}'",
                s, COMBO_SEPARATOR
            )));
        }
        let mut seen = names.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != names.len() {
            return Err(Error::Config(format!(
                "intersection '{}' repeats a namespace",
                s
            )));
        }
        Ok(IntersectionSpec::Explicit(names))
    }
}

impl fmt::Display for IntersectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntersectionSpec::AllPairs => write!(f, "ALL2"),
            IntersectionSpec::AllTriples => write!(f, "ALL3"),
            IntersectionSpec::Explicit(names) => write!(f, "{}", combo_key(names)),
        }
    }
}

impl Serialize for IntersectionSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for IntersectionSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
