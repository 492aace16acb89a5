//! Group Metrics Engine
//!
//! **Purpose:** Per (family, class, group label) counts, Positive Rate /
//! TPR / FPR against the whole class slice, the three parity differences,
//! two-proportion p-values against the complement, and Holm–Bonferroni
//! adjustment within each (family, class, metric).
//!
//! Reference rates use the entire class slice (the group included), while
//! significance tests compare the group with its complement (slice totals
//! minus the group). Both conventions are kept on purpose.

pub mod gaps;

pub use gaps::{top_gaps, worst_gaps, GapMetric, WorstGaps};

use crate::membership::Grouping;
use crate::predictions::{ClassSlice, PredictionRecord, PredictionTable};
use crate::stats::{holm_bonferroni, rate, two_proportion_pvalue};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Confusion-style counts of a set of records
///
/// Invariants: `n_pred_pos <= n`, `n_tp <= n_y1`, `n_fp <= n_y0`,
/// `n_y1 + n_y0 == n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCounts {
    pub n: usize,
    pub n_pred_pos: usize,
    pub n_y1: usize,
    pub n_tp: usize,
    pub n_y0: usize,
    pub n_fp: usize,
}

impl GroupCounts {
    /// Tally records using their `predicted` flag
    pub fn tally<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a PredictionRecord>,
    {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.ground_truth, record.predicted);
        }
        counts
    }

    /// Tally records re-thresholded at `threshold` (`score >= threshold`)
    pub fn at_threshold<'a, I>(records: I, threshold: f64) -> Self
    where
        I: IntoIterator<Item = &'a PredictionRecord>,
    {
        let mut counts = Self::default();
        for record in records {
            counts.add(record.ground_truth, record.score >= threshold);
        }
        counts
    }

    /// Add one (ground truth, prediction) outcome
    pub fn add(&mut self, ground_truth: bool, predicted: bool) {
        self.n += 1;
        if predicted {
            self.n_pred_pos += 1;
        }
        if ground_truth {
            self.n_y1 += 1;
            if predicted {
                self.n_tp += 1;
            }
        } else {
            self.n_y0 += 1;
            if predicted {
                self.n_fp += 1;
            }
        }
    }

    /// Counts of `total` outside `self`
    pub fn complement_in(&self, total: &GroupCounts) -> GroupCounts {
        GroupCounts {
            n: total.n.saturating_sub(self.n),
            n_pred_pos: total.n_pred_pos.saturating_sub(self.n_pred_pos),
            n_y1: total.n_y1.saturating_sub(self.n_y1),
            n_tp: total.n_tp.saturating_sub(self.n_tp),
            n_y0: total.n_y0.saturating_sub(self.n_y0),
            n_fp: total.n_fp.saturating_sub(self.n_fp),
        }
    }

    /// Positive (predicted) rate
    pub fn pr(&self) -> f64 {
        rate(self.n_pred_pos, self.n)
    }

    /// True-positive rate, NaN without ground-truth positives
    pub fn tpr(&self) -> f64 {
        rate(self.n_tp, self.n_y1)
    }

    /// False-positive rate, NaN without ground-truth negatives
    pub fn fpr(&self) -> f64 {
        rate(self.n_fp, self.n_y0)
    }

    /// Precision, NaN without predicted positives
    pub fn precision(&self) -> f64 {
        rate(self.n_tp, self.n_pred_pos)
    }
}

/// One output row of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStat {
    /// Namespace name or combination key
    pub namespace: String,
    pub class: String,
    /// Subgroup or intersection label
    pub subgroup: String,

    pub n_sub: usize,
    pub n_all: usize,

    pub n_pred_pos: usize,
    pub pr_sub: f64,
    pub pr_all: f64,
    pub dp_diff: f64,

    pub n_y1_sub: usize,
    pub n_tp: usize,
    pub tpr_sub: f64,
    pub tpr_all: f64,
    pub eo_diff: f64,

    pub n_y0_sub: usize,
    pub n_fp: usize,
    pub fpr_sub: f64,
    pub fpr_all: f64,
    pub fpr_diff: f64,

    pub p_dp: f64,
    pub p_dp_adj: f64,
    pub p_eo: f64,
    pub p_eo_adj: f64,
    pub p_fpr: f64,
    pub p_fpr_adj: f64,
}

impl GroupStat {
    /// Row for one group against its class population
    ///
    /// Adjusted p-values start equal to the raw ones; [`adjust_family`]
    /// replaces them.
    pub fn new(family: &str, class: &str, label: &str, group: &GroupCounts, population: &GroupCounts) -> Self {
        let complement = group.complement_in(population);
        let (pr_sub, pr_all) = (group.pr(), population.pr());
        let (tpr_sub, tpr_all) = (group.tpr(), population.tpr());
        let (fpr_sub, fpr_all) = (group.fpr(), population.fpr());

        let p_dp = two_proportion_pvalue(group.n_pred_pos, group.n, complement.n_pred_pos, complement.n);
        let p_eo = two_proportion_pvalue(group.n_tp, group.n_y1, complement.n_tp, complement.n_y1);
        let p_fpr = two_proportion_pvalue(group.n_fp, group.n_y0, complement.n_fp, complement.n_y0);

        Self {
            namespace: family.to_string(),
            class: class.to_string(),
            subgroup: label.to_string(),
            n_sub: group.n,
            n_all: population.n,
            n_pred_pos: group.n_pred_pos,
            pr_sub,
            pr_all,
            dp_diff: pr_sub - pr_all,
            n_y1_sub: group.n_y1,
            n_tp: group.n_tp,
            tpr_sub,
            tpr_all,
            eo_diff: tpr_sub - tpr_all,
            n_y0_sub: group.n_y0,
            n_fp: group.n_fp,
            fpr_sub,
            fpr_all,
            fpr_diff: fpr_sub - fpr_all,
            p_dp,
            p_dp_adj: p_dp,
            p_eo,
            p_eo_adj: p_eo,
            p_fpr,
            p_fpr_adj: p_fpr,
        }
    }

    /// Group counts recovered from the row
    pub fn counts(&self) -> GroupCounts {
        GroupCounts {
            n: self.n_sub,
            n_pred_pos: self.n_pred_pos,
            n_y1: self.n_y1_sub,
            n_tp: self.n_tp,
            n_y0: self.n_y0_sub,
            n_fp: self.n_fp,
        }
    }
}

/// Holm-adjust every metric across the rows of one (family, class)
pub fn adjust_family(rows: &mut [GroupStat]) {
    let dp = holm_bonferroni(&rows.iter().map(|r| r.p_dp).collect::<Vec<_>>());
    let eo = holm_bonferroni(&rows.iter().map(|r| r.p_eo).collect::<Vec<_>>());
    let fpr = holm_bonferroni(&rows.iter().map(|r| r.p_fpr).collect::<Vec<_>>());
    for (i, row) in rows.iter_mut().enumerate() {
        row.p_dp_adj = dp[i];
        row.p_eo_adj = eo[i];
        row.p_fpr_adj = fpr[i];
    }
}

/// Evaluate every group of `grouping` within one class slice
///
/// Groups below `min_support` are dropped before testing. Returns an empty
/// vector when nothing qualifies.
pub fn evaluate_class(slice: &ClassSlice<'_>, grouping: &Grouping, min_support: usize) -> Vec<GroupStat> {
    let population = GroupCounts::tally(slice.records);
    let mut rows: Vec<GroupStat> = grouping
        .iter()
        .filter(|(_, members)| members.len() >= min_support)
        .map(|(label, members)| {
            let group = GroupCounts::tally(members.iter().map(|&pos| &slice.records[pos]));
            GroupStat::new(grouping.family(), slice.class, label, &group, &population)
        })
        .collect();

    let dropped = grouping.len() - rows.len();
    if dropped > 0 {
        debug!(
            family = grouping.family(),
            class = slice.class,
            dropped,
            min_support,
            "Groups below minimum support"
        );
    }

    adjust_family(&mut rows);
    rows
}

/// Evaluate a grouping over every class, in vocabulary order
pub fn evaluate_grouping(table: &PredictionTable, grouping: &Grouping, min_support: usize) -> Vec<GroupStat> {
    if grouping.is_empty() {
        return Vec::new();
    }
    let rows: Vec<GroupStat> = table
        .slices()
        .flat_map(|slice| evaluate_class(&slice, grouping, min_support))
        .collect();
    debug!(family = grouping.family(), rows = rows.len(), "Evaluated grouping");
    rows
}
