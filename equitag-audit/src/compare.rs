//! Before/after comparison of two Group-stats tables
//!
//! **Purpose:** Measure mitigation impact: join a reference table and a
//! re-evaluated table on (class, subgroup) and report, per metric, both
//! differences, sign agreement, joint significance and the change in |diff|.

use crate::metrics::{GapMetric, GroupStat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One metric of one joined row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricComparison {
    pub before: f64,
    pub after: f64,
    pub p_adj_before: f64,
    pub p_adj_after: f64,
    /// Both differences defined with the same sign
    pub same_sign: bool,
    /// Both adjusted p-values below alpha
    pub sig_both: bool,
    /// `|after| - |before|` (negative when the gap shrank)
    pub abs_change: f64,
}

impl MetricComparison {
    fn new(metric: GapMetric, before: &GroupStat, after: &GroupStat, alpha: f64) -> Self {
        let (b, a) = (metric.diff(before), metric.diff(after));
        let (pb, pa) = (metric.p_adj(before), metric.p_adj(after));
        Self {
            before: b,
            after: a,
            p_adj_before: pb,
            p_adj_after: pa,
            same_sign: !b.is_nan() && !a.is_nan() && b.signum() == a.signum(),
            // NaN comparisons are false
            sig_both: pb < alpha && pa < alpha,
            abs_change: a.abs() - b.abs(),
        }
    }
}

/// Flat comparison row (one per joined (class, subgroup))
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub namespace: String,
    pub class: String,
    pub subgroup: String,
    pub n_sub_before: usize,
    pub n_sub_after: usize,

    pub dp_diff_before: f64,
    pub dp_diff_after: f64,
    pub p_dp_adj_before: f64,
    pub p_dp_adj_after: f64,
    pub dp_same_sign: bool,
    pub dp_sig_both: bool,
    pub dp_abs_change: f64,

    pub eo_diff_before: f64,
    pub eo_diff_after: f64,
    pub p_eo_adj_before: f64,
    pub p_eo_adj_after: f64,
    pub eo_same_sign: bool,
    pub eo_sig_both: bool,
    pub eo_abs_change: f64,

    pub fpr_diff_before: f64,
    pub fpr_diff_after: f64,
    pub p_fpr_adj_before: f64,
    pub p_fpr_adj_after: f64,
    pub fpr_same_sign: bool,
    pub fpr_sig_both: bool,
    pub fpr_abs_change: f64,

    /// Some metric keeps its sign and is significant in both tables
    pub consistent: bool,
}

impl ComparisonRow {
    /// Comparison of one metric
    pub fn metric(&self, metric: GapMetric) -> MetricComparison {
        match metric {
            GapMetric::DemographicParity => MetricComparison {
                before: self.dp_diff_before,
                after: self.dp_diff_after,
                p_adj_before: self.p_dp_adj_before,
                p_adj_after: self.p_dp_adj_after,
                same_sign: self.dp_same_sign,
                sig_both: self.dp_sig_both,
                abs_change: self.dp_abs_change,
            },
            GapMetric::EqualOpportunity => MetricComparison {
                before: self.eo_diff_before,
                after: self.eo_diff_after,
                p_adj_before: self.p_eo_adj_before,
                p_adj_after: self.p_eo_adj_after,
                same_sign: self.eo_same_sign,
                sig_both: self.eo_sig_both,
                abs_change: self.eo_abs_change,
            },
            GapMetric::FalsePositiveRate => MetricComparison {
                before: self.fpr_diff_before,
                after: self.fpr_diff_after,
                p_adj_before: self.p_fpr_adj_before,
                p_adj_after: self.p_fpr_adj_after,
                same_sign: self.fpr_same_sign,
                sig_both: self.fpr_sig_both,
                abs_change: self.fpr_abs_change,
            },
        }
    }
}

/// Inner-join two tables on (class, subgroup)
///
/// Rows follow the order of `before`. `alpha` only drives the
/// `sig_both` / `consistent` annotations; nothing is filtered.
pub fn compare_tables(before: &[GroupStat], after: &[GroupStat], alpha: f64) -> Vec<ComparisonRow> {
    let index: BTreeMap<(&str, &str), &GroupStat> = after
        .iter()
        .map(|row| ((row.class.as_str(), row.subgroup.as_str()), row))
        .collect();

    before
        .iter()
        .filter_map(|b| {
            let a = index.get(&(b.class.as_str(), b.subgroup.as_str()))?;
            let dp = MetricComparison::new(GapMetric::DemographicParity, b, a, alpha);
            let eo = MetricComparison::new(GapMetric::EqualOpportunity, b, a, alpha);
            let fpr = MetricComparison::new(GapMetric::FalsePositiveRate, b, a, alpha);
            let consistent = [dp, eo, fpr].iter().any(|m| m.same_sign && m.sig_both);
            Some(ComparisonRow {
                namespace: b.namespace.clone(),
                class: b.class.clone(),
                subgroup: b.subgroup.clone(),
                n_sub_before: b.n_sub,
                n_sub_after: a.n_sub,
                dp_diff_before: dp.before,
                dp_diff_after: dp.after,
                p_dp_adj_before: dp.p_adj_before,
                p_dp_adj_after: dp.p_adj_after,
                dp_same_sign: dp.same_sign,
                dp_sig_both: dp.sig_both,
                dp_abs_change: dp.abs_change,
                eo_diff_before: eo.before,
                eo_diff_after: eo.after,
                p_eo_adj_before: eo.p_adj_before,
                p_eo_adj_after: eo.p_adj_after,
                eo_same_sign: eo.same_sign,
                eo_sig_both: eo.sig_both,
                eo_abs_change: eo.abs_change,
                fpr_diff_before: fpr.before,
                fpr_diff_after: fpr.after,
                p_fpr_adj_before: fpr.p_adj_before,
                p_fpr_adj_after: fpr.p_adj_after,
                fpr_same_sign: fpr.same_sign,
                fpr_sig_both: fpr.sig_both,
                fpr_abs_change: fpr.abs_change,
                consistent,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GroupCounts;

    fn stat(class: &str, subgroup: &str, n_pred_pos: usize, p_dp_adj: f64) -> GroupStat {
        let group = GroupCounts { n: 100, n_pred_pos, n_y1: 50, n_tp: n_pred_pos / 2, n_y0: 50, n_fp: n_pred_pos - n_pred_pos / 2 };
        let total = GroupCounts { n: 1000, n_pred_pos: 500, n_y1: 500, n_tp: 250, n_y0: 500, n_fp: 250 };
        let mut row = GroupStat::new("gender", class, subgroup, &group, &total);
        row.p_dp_adj = p_dp_adj;
        row
    }

    #[test]
    fn test_join_and_annotations() {
        let before = vec![
            stat("pov", "female", 80, 0.001),
            stat("pov", "male", 20, 0.01),
            stat("solo", "female", 50, 0.5),
        ];
        let after = vec![stat("pov", "female", 70, 0.02), stat("pov", "male", 60, 0.01)];
        let rows = compare_tables(&before, &after, 0.05);

        assert_eq!(rows.len(), 2);
        let female = &rows[0];
        assert_eq!(female.subgroup, "female");
        assert!(female.dp_same_sign && female.dp_sig_both);
        assert!(female.consistent);
        // 0.3 -> 0.2
        assert!((female.dp_abs_change + 0.1).abs() < 1e-9);
        assert!(female.metric(GapMetric::DemographicParity).abs_change < 0.0);

        let male = &rows[1];
        // -0.3 -> +0.1
        assert!(!male.dp_same_sign);
        assert!(male.dp_sig_both);
    }

    #[test]
    fn test_undefined_differences_never_agree() {
        let mut before = stat("pov", "female", 80, 0.001);
        before.eo_diff = f64::NAN;
        before.p_eo_adj = f64::NAN;
        let after = stat("pov", "female", 80, 0.001);
        let rows = compare_tables(&[before], &[after], 0.05);
        assert!(!rows[0].eo_same_sign);
        assert!(!rows[0].eo_sig_both);
        assert!(rows[0].eo_abs_change.is_nan());
    }
}
