//! Subgroup-conditional thresholds
//!
//! **Purpose:** Learn one decision threshold per (namespace, subgroup, class)
//! cell, resolve the effective threshold of a (video, class) pair across
//! every cell the video belongs to, and rebuild the prediction listing.
//!
//! Reference rates are always taken at the base threshold over the whole
//! class population.

use super::search::{grid_search_min, SearchOutcome};
use crate::membership::{Grouping, MembershipMap};
use crate::metrics::GroupCounts;
use crate::predictions::{CompactPrediction, PredictionTable};
use equitag_common::{AuditParams, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Objective family selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveKind {
    EqualOpportunity,
    DemographicParity,
}

impl ObjectiveKind {
    /// Objective with the regularization weight taken from `params`
    pub fn with_params(self, params: &AuditParams) -> Objective {
        match self {
            ObjectiveKind::EqualOpportunity => Objective::EqualOpportunity {
                lambda_fpr: params.lambda_fpr,
            },
            ObjectiveKind::DemographicParity => Objective::DemographicParity {
                lambda_precision: params.lambda_precision,
            },
        }
    }
}

impl FromStr for ObjectiveKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eo" => Ok(ObjectiveKind::EqualOpportunity),
            "dp" => Ok(ObjectiveKind::DemographicParity),
            other => Err(Error::InvalidInput(format!(
                "unknown objective '{}' (expected eo or dp)",
                other
            ))),
        }
    }
}

/// Fairness objective minimized per cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Objective {
    /// `|TPR_g - TPR_all| + lambda_fpr * |FPR_g - FPR_all|`
    EqualOpportunity { lambda_fpr: f64 },
    /// `|PR_g - PR_all|`, plus `lambda_precision * |precision_g - precision_all|`
    /// when the weight is positive and both precisions are defined
    DemographicParity { lambda_precision: f64 },
}

impl Objective {
    /// Short name used in artifact names
    pub fn name(&self) -> &'static str {
        match self {
            Objective::EqualOpportunity { .. } => "eo",
            Objective::DemographicParity { .. } => "dp",
        }
    }

    /// Objective value of group counts against the reference counts
    ///
    /// # Returns
    /// `None` for an EO candidate where either group rate is undefined
    pub fn evaluate(&self, group: &GroupCounts, reference: &GroupCounts) -> Option<f64> {
        match *self {
            Objective::EqualOpportunity { lambda_fpr } => {
                let (tpr, fpr) = (group.tpr(), group.fpr());
                if tpr.is_nan() || fpr.is_nan() {
                    return None;
                }
                Some((tpr - reference.tpr()).abs() + lambda_fpr * (fpr - reference.fpr()).abs())
            }
            Objective::DemographicParity { lambda_precision } => {
                let mut value = (group.pr() - reference.pr()).abs();
                let (precision, precision_all) = (group.precision(), reference.precision());
                if lambda_precision > 0.0 && !precision.is_nan() && !precision_all.is_nan() {
                    value += lambda_precision * (precision - precision_all).abs();
                }
                Some(value)
            }
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::EqualOpportunity { lambda_fpr } => write!(f, "eo (lambda_fpr={})", lambda_fpr),
            Objective::DemographicParity { lambda_precision } => {
                write!(f, "dp (lambda_precision={})", lambda_precision)
            }
        }
    }
}

/// Audit row of one learned cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdAuditRow {
    pub namespace: String,
    pub subgroup: String,
    pub class: String,
    pub objective: String,
    pub threshold_base: f64,
    pub threshold_star: f64,
    pub objective_star: f64,
    pub n_group: usize,

    pub pr_all_base: f64,
    pub tpr_all_base: f64,
    pub fpr_all_base: f64,
    pub precision_all_base: f64,

    pub pr_group_base: f64,
    pub tpr_group_base: f64,
    pub fpr_group_base: f64,
    pub precision_group_base: f64,

    pub pr_group_star: f64,
    pub tpr_group_star: f64,
    pub fpr_group_star: f64,
    pub precision_group_star: f64,

    pub npos_group_base: usize,
    pub npos_group_star: usize,
    pub tp_group_base: usize,
    pub tp_group_star: usize,
    pub fp_group_base: usize,
    pub fp_group_star: usize,
}

/// Learned thresholds, keyed by (namespace, subgroup) then class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdMap {
    cells: BTreeMap<(String, String), BTreeMap<String, f64>>,
}

impl ThresholdMap {
    pub fn insert(&mut self, namespace: &str, subgroup: &str, class: &str, threshold: f64) {
        self.cells
            .entry((namespace.to_string(), subgroup.to_string()))
            .or_default()
            .insert(class.to_string(), threshold);
    }

    pub fn get(&self, namespace: &str, subgroup: &str, class: &str) -> Option<f64> {
        self.cells
            .get(&(namespace.to_string(), subgroup.to_string()))
            .and_then(|by_class| by_class.get(class))
            .copied()
    }

    /// Number of learned cells
    pub fn len(&self) -> usize {
        self.cells.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-class thresholds of every cell `video_id` belongs to
    fn applicable<'a>(&'a self, video_id: i64, membership: &MembershipMap) -> Vec<&'a BTreeMap<String, f64>> {
        let Some(namespaces) = membership.of(video_id) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for (ns, subgroups) in namespaces {
            for sg in subgroups {
                if let Some(by_class) = self.cells.get(&(ns.clone(), sg.clone())) {
                    found.push(by_class);
                }
            }
        }
        found
    }

    /// Effective threshold of a (video, class) pair
    ///
    /// The maximum learned threshold over every (namespace, subgroup) cell
    /// the video belongs to, or `base_threshold` when no cell applies.
    pub fn effective_threshold(&self, video_id: i64, class: &str, membership: &MembershipMap, base_threshold: f64) -> f64 {
        resolve(&self.applicable(video_id, membership), class, base_threshold)
    }
}

fn resolve(cells: &[&BTreeMap<String, f64>], class: &str, base_threshold: f64) -> f64 {
    cells
        .iter()
        .filter_map(|by_class| by_class.get(class).copied())
        .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))))
        .unwrap_or(base_threshold)
}

/// Result of a mitigation run
#[derive(Debug, Clone, Default)]
pub struct LearnedThresholds {
    pub thresholds: ThresholdMap,
    /// Audit rows sorted by (namespace, subgroup, class)
    pub audit: Vec<ThresholdAuditRow>,
}

#[allow(clippy::too_many_arguments)]
fn audit_row(
    namespace: &str,
    subgroup: &str,
    class: &str,
    objective: &Objective,
    base_threshold: f64,
    outcome: &SearchOutcome,
    reference: &GroupCounts,
    base: &GroupCounts,
    star: &GroupCounts,
) -> ThresholdAuditRow {
    ThresholdAuditRow {
        namespace: namespace.to_string(),
        subgroup: subgroup.to_string(),
        class: class.to_string(),
        objective: objective.name().to_string(),
        threshold_base: base_threshold,
        threshold_star: outcome.threshold,
        objective_star: outcome.objective,
        n_group: base.n,
        pr_all_base: reference.pr(),
        tpr_all_base: reference.tpr(),
        fpr_all_base: reference.fpr(),
        precision_all_base: reference.precision(),
        pr_group_base: base.pr(),
        tpr_group_base: base.tpr(),
        fpr_group_base: base.fpr(),
        precision_group_base: base.precision(),
        pr_group_star: star.pr(),
        tpr_group_star: star.tpr(),
        fpr_group_star: star.fpr(),
        precision_group_star: star.precision(),
        npos_group_base: base.n_pred_pos,
        npos_group_star: star.n_pred_pos,
        tp_group_base: base.n_tp,
        tp_group_star: star.n_tp,
        fp_group_base: base.n_fp,
        fp_group_star: star.n_fp,
    }
}

/// Learn thresholds for every qualifying cell
///
/// Namespaces absent from `membership` are skipped. Subgroups below
/// `min_support` are not learned. A supported cell whose search finds no
/// defined candidate is stored at the base threshold with a NaN objective, so
/// the max rule still holds its videos to at least the base.
///
/// # Arguments
/// * `table` - Reference predictions (its base threshold anchors the reference rates)
/// * `membership` - Resolved membership
/// * `namespaces` - Namespaces to learn cells for
/// * `objective` - Objective minimized per cell
/// * `min_support` - Minimum subgroup size
pub fn learn_thresholds(
    table: &PredictionTable,
    membership: &MembershipMap,
    namespaces: &[String],
    objective: &Objective,
    min_support: usize,
) -> LearnedThresholds {
    let base_threshold = table.base_threshold();
    let references: Vec<GroupCounts> = table
        .slices()
        .map(|slice| GroupCounts::at_threshold(slice.records, base_threshold))
        .collect();

    let mut learned = LearnedThresholds::default();
    let mut undefined = 0usize;

    for ns in namespaces {
        if !membership.has_namespace(ns) {
            info!(namespace = %ns, "No subgroup matched; skipping namespace");
            continue;
        }
        let grouping = Grouping::for_namespace(membership, ns, table.video_ids());
        for (subgroup, members) in grouping.iter() {
            if members.len() < min_support {
                debug!(namespace = %ns, subgroup, n = members.len(), min_support, "Subgroup below minimum support");
                continue;
            }
            for (class_index, slice) in table.slices().enumerate() {
                let reference = &references[class_index];
                let group_records: Vec<_> = members.iter().map(|&pos| &slice.records[pos]).collect();
                let outcome = grid_search_min(|t| {
                    let counts = GroupCounts::at_threshold(group_records.iter().copied(), t);
                    objective.evaluate(&counts, reference)
                });
                let outcome = outcome.unwrap_or_else(|| {
                    debug!(namespace = %ns, subgroup, class = slice.class, "No defined candidate threshold; keeping base");
                    undefined += 1;
                    SearchOutcome {
                        threshold: base_threshold,
                        objective: f64::NAN,
                    }
                });

                let base = GroupCounts::at_threshold(group_records.iter().copied(), base_threshold);
                let star = GroupCounts::at_threshold(group_records.iter().copied(), outcome.threshold);
                learned.thresholds.insert(ns, subgroup, slice.class, outcome.threshold);
                learned.audit.push(audit_row(
                    ns,
                    subgroup,
                    slice.class,
                    objective,
                    base_threshold,
                    &outcome,
                    reference,
                    &base,
                    &star,
                ));
            }
        }
    }

    learned.audit.sort_by(|a, b| {
        (a.namespace.as_str(), a.subgroup.as_str(), a.class.as_str()).cmp(&(
            b.namespace.as_str(),
            b.subgroup.as_str(),
            b.class.as_str(),
        ))
    });

    info!(
        objective = objective.name(),
        cells = learned.thresholds.len(),
        undefined,
        "Learned subgroup thresholds"
    );
    learned
}

/// Rebuild the prediction listing with effective thresholds
///
/// For every video, classes are ranked by score descending (ties keep
/// vocabulary order) and kept when `score >= effective threshold`. True
/// labels are listed in vocabulary order.
pub fn rebuild(table: &PredictionTable, membership: &MembershipMap, thresholds: &ThresholdMap) -> Vec<CompactPrediction> {
    let classes = table.classes();
    table
        .video_ids()
        .iter()
        .enumerate()
        .map(|(position, &video_id)| {
            let cells = thresholds.applicable(video_id, membership);
            let mut true_labels = Vec::new();
            let mut candidates: Vec<(String, f64)> = Vec::new();

            for (class_index, class) in classes.iter().enumerate() {
                let record = table.record(class_index, position);
                if record.ground_truth {
                    true_labels.push(class.clone());
                }
                if record.score >= resolve(&cells, class, table.base_threshold()) {
                    candidates.push((class.clone(), record.score));
                }
            }
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

            CompactPrediction {
                video_id,
                true_labels,
                ranked: candidates,
            }
        })
        .collect()
}
