//! Worst and top gaps across engine rows

use super::GroupStat;
use crate::tables::nan_or_null;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One of the three parity differences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapMetric {
    DemographicParity,
    EqualOpportunity,
    FalsePositiveRate,
}

impl GapMetric {
    pub const ALL: [GapMetric; 3] = [
        GapMetric::DemographicParity,
        GapMetric::EqualOpportunity,
        GapMetric::FalsePositiveRate,
    ];

    /// Difference column of a row
    pub fn diff(&self, row: &GroupStat) -> f64 {
        match self {
            GapMetric::DemographicParity => row.dp_diff,
            GapMetric::EqualOpportunity => row.eo_diff,
            GapMetric::FalsePositiveRate => row.fpr_diff,
        }
    }

    /// Subgroup rate behind the difference
    pub fn sub_rate(&self, row: &GroupStat) -> f64 {
        match self {
            GapMetric::DemographicParity => row.pr_sub,
            GapMetric::EqualOpportunity => row.tpr_sub,
            GapMetric::FalsePositiveRate => row.fpr_sub,
        }
    }

    /// Holm-adjusted p-value of the difference
    pub fn p_adj(&self, row: &GroupStat) -> f64 {
        match self {
            GapMetric::DemographicParity => row.p_dp_adj,
            GapMetric::EqualOpportunity => row.p_eo_adj,
            GapMetric::FalsePositiveRate => row.p_fpr_adj,
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            GapMetric::DemographicParity => "DP",
            GapMetric::EqualOpportunity => "EO",
            GapMetric::FalsePositiveRate => "FPR",
        }
    }
}

/// Row of the per-model summary table: the largest absolute gap of each
/// metric for one (namespace, class)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorstGaps {
    pub namespace: String,
    pub class: String,
    pub dp_subgroup: String,
    #[serde(deserialize_with = "nan_or_null")]
    pub dp_diff: f64,
    #[serde(deserialize_with = "nan_or_null")]
    pub dp_sub_rate: f64,
    pub eo_subgroup: String,
    #[serde(deserialize_with = "nan_or_null")]
    pub eo_diff: f64,
    #[serde(deserialize_with = "nan_or_null")]
    pub eo_sub_tpr: f64,
    pub fpr_subgroup: String,
    #[serde(deserialize_with = "nan_or_null")]
    pub fpr_diff: f64,
    #[serde(deserialize_with = "nan_or_null")]
    pub fpr_sub_fpr: f64,
}

/// Row with the largest defined |diff| (first one on ties)
fn worst_row<'a>(rows: &[&'a GroupStat], metric: GapMetric) -> Option<&'a GroupStat> {
    let mut best: Option<&GroupStat> = None;
    for row in rows {
        let gap = metric.diff(row).abs();
        if gap.is_nan() {
            continue;
        }
        if best.map_or(true, |b| gap > metric.diff(b).abs()) {
            best = Some(row);
        }
    }
    best
}

fn pick(rows: &[&GroupStat], metric: GapMetric) -> (String, f64, f64) {
    match worst_row(rows, metric) {
        Some(row) => (row.subgroup.clone(), metric.diff(row), metric.sub_rate(row)),
        None => (String::new(), f64::NAN, f64::NAN),
    }
}

/// Worst gaps per (namespace, class), classes in name order
///
/// A metric whose differences are all undefined yields an empty subgroup
/// and NaN values rather than naming an arbitrary first row.
pub fn worst_gaps(rows: &[GroupStat]) -> Vec<WorstGaps> {
    let mut by_cell: BTreeMap<(&str, &str), Vec<&GroupStat>> = BTreeMap::new();
    for row in rows {
        by_cell
            .entry((row.namespace.as_str(), row.class.as_str()))
            .or_default()
            .push(row);
    }

    by_cell
        .into_iter()
        .map(|((namespace, class), cell)| {
            let (dp_subgroup, dp_diff, dp_sub_rate) = pick(&cell, GapMetric::DemographicParity);
            let (eo_subgroup, eo_diff, eo_sub_tpr) = pick(&cell, GapMetric::EqualOpportunity);
            let (fpr_subgroup, fpr_diff, fpr_sub_fpr) = pick(&cell, GapMetric::FalsePositiveRate);
            WorstGaps {
                namespace: namespace.to_string(),
                class: class.to_string(),
                dp_subgroup,
                dp_diff,
                dp_sub_rate,
                eo_subgroup,
                eo_diff,
                eo_sub_tpr,
                fpr_subgroup,
                fpr_diff,
                fpr_sub_fpr,
            }
        })
        .collect()
}

/// The `n` largest absolute gaps of `metric`
///
/// Ordered by |diff| descending, then support descending, then label;
/// undefined differences sort last.
pub fn top_gaps(rows: &[GroupStat], metric: GapMetric, n: usize) -> Vec<&GroupStat> {
    let mut ranked: Vec<&GroupStat> = rows.iter().collect();
    ranked.sort_by(|a, b| {
        let (ga, gb) = (metric.diff(a).abs(), metric.diff(b).abs());
        match (ga.is_nan(), gb.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => gb.total_cmp(&ga),
        }
        .then_with(|| b.n_sub.cmp(&a.n_sub))
        .then_with(|| a.subgroup.cmp(&b.subgroup))
    });
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GroupCounts;

    fn row(namespace: &str, class: &str, subgroup: &str, n: usize, n_pred_pos: usize) -> GroupStat {
        let group = GroupCounts { n, n_pred_pos, n_y1: n / 2, n_tp: n_pred_pos / 2, n_y0: n - n / 2, n_fp: n_pred_pos - n_pred_pos / 2 };
        let total = GroupCounts { n: 1000, n_pred_pos: 500, n_y1: 500, n_tp: 250, n_y0: 500, n_fp: 250 };
        GroupStat::new(namespace, class, subgroup, &group, &total)
    }

    #[test]
    fn test_worst_gaps_per_cell() {
        let rows = vec![
            row("gender", "pov", "female", 200, 120),
            row("gender", "pov", "male", 200, 60),
            row("gender", "amateur", "female", 100, 50),
        ];
        let summary = worst_gaps(&rows);
        assert_eq!(summary.len(), 2);
        // classes in name order
        assert_eq!(summary[0].class, "amateur");
        assert_eq!(summary[1].class, "pov");
        assert_eq!(summary[1].dp_subgroup, "male");
        assert!((summary[1].dp_diff + 0.2).abs() < 1e-9);
        assert!((summary[1].dp_sub_rate - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_worst_gaps_all_undefined() {
        let mut female = row("gender", "pov", "female", 200, 160);
        let mut male = row("gender", "pov", "male", 200, 120);
        female.eo_diff = f64::NAN;
        male.eo_diff = f64::NAN;
        let summary = worst_gaps(&[female, male]);
        assert_eq!(summary.len(), 1);
        // no row is named when nothing is defined, not even the first
        assert_eq!(summary[0].eo_subgroup, "");
        assert!(summary[0].eo_diff.is_nan());
        assert!(summary[0].eo_sub_tpr.is_nan());
        assert!(!summary[0].dp_subgroup.is_empty());
    }

    #[test]
    fn test_top_gaps_order() {
        let mut undefined = row("gender", "solo", "female", 500, 100);
        undefined.dp_diff = f64::NAN;
        let rows = vec![
            undefined,
            row("gender", "pov", "female", 200, 150),
            row("gender", "pov", "male", 300, 75),
            row("gender", "amateur", "female", 100, 50),
        ];
        let top = top_gaps(&rows, GapMetric::DemographicParity, 3);
        assert_eq!(top.len(), 3);
        // equal |0.25| gaps: larger support first
        assert_eq!(top[0].subgroup, "male");
        assert_eq!(top[1].subgroup, "female");
        assert_eq!(top[1].class, "pov");
        assert_eq!(top[2].class, "amateur");

        let all = top_gaps(&rows, GapMetric::DemographicParity, 10);
        assert!(all[3].dp_diff.is_nan());
    }
}
