//! End-to-end scenarios over in-memory tables
//!
//! Tests cover:
//! - Demographic-parity gaps against the whole class population
//! - Threshold search selecting the closest-TPR grid point
//! - Cells with no positive example staying at the base threshold
//! - Max rule for videos in several learned cells
//! - Deterministic re-evaluation of rebuilt predictions
//! - Intersection label cardinality

use equitag_audit::membership::grouping::intersection_labels;
use equitag_audit::membership::VideoMembership;
use equitag_audit::metrics::evaluate_grouping;
use equitag_audit::mitigation::{learn_thresholds, rebuild, Objective};
use equitag_audit::predictions::{read_predictions, write_predictions, CompactPrediction};
use equitag_audit::tables::write_rows;
use equitag_audit::{Grouping, MembershipMap, PredictionTable};
use std::fs;
use tempfile::TempDir;

// ============================================================================
// Helpers
// ============================================================================

/// One single-class video
fn video(video_id: i64, class: &str, positive: bool, score: f64) -> CompactPrediction {
    CompactPrediction {
        video_id,
        true_labels: if positive { vec![class.to_string()] } else { Vec::new() },
        ranked: vec![(class.to_string(), score)],
    }
}

fn member_of(cells: &[(&str, &str)]) -> VideoMembership {
    let mut m = VideoMembership::new();
    for (ns, sg) in cells {
        m.entry(ns.to_string()).or_default().insert(sg.to_string());
    }
    m
}

fn namespaces(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Threshold-search scenario for class "c"
///
/// Videos 0..100 are female: 50 positives (25 at 0.9, 9 at 0.45, 16 at 0.395)
/// and 50 negatives at 0.05. Videos 100..200 have no membership: 50
/// positives (45 at 0.9, 5 at 0.1) and 50 negatives at 0.05.
fn threshold_scenario() -> (PredictionTable, MembershipMap) {
    let mut rows = Vec::new();
    let mut entries = Vec::new();
    for i in 0..100 {
        let score = match i {
            0..=24 => 0.9,
            25..=33 => 0.45,
            34..=49 => 0.395,
            _ => 0.05,
        };
        rows.push(video(i, "c", i < 50, score));
        entries.push((i, member_of(&[("gender", "female")])));
    }
    for i in 100..200 {
        let score = match i {
            100..=144 => 0.9,
            145..=149 => 0.1,
            _ => 0.05,
        };
        rows.push(video(i, "c", i < 150, score));
    }
    let table = PredictionTable::expand(&rows, &["c".to_string()], 0.5);
    (table, MembershipMap::from_entries(entries))
}

// ============================================================================
// Group metrics
// ============================================================================

/// Given: female n=500 (300 predicted), male n=400 (100 predicted)
/// When: the gender namespace is evaluated for "amateur"
/// Then: gaps are taken against the 900-video class population
#[test]
fn test_demographic_parity_against_population() {
    let mut rows = Vec::new();
    let mut entries = Vec::new();
    for i in 0..900 {
        let (subgroup, predicted) = if i < 500 { ("female", i < 300) } else { ("male", i < 600) };
        rows.push(video(i, "amateur", false, if predicted { 0.8 } else { 0.2 }));
        entries.push((i, member_of(&[("gender", subgroup)])));
    }
    let table = PredictionTable::expand(&rows, &["amateur".to_string()], 0.5);
    let membership = MembershipMap::from_entries(entries);

    let grouping = Grouping::for_namespace(&membership, "gender", table.video_ids());
    let stats = evaluate_grouping(&table, &grouping, 100);
    assert_eq!(stats.len(), 2);

    let female = stats.iter().find(|r| r.subgroup == "female").unwrap();
    let male = stats.iter().find(|r| r.subgroup == "male").unwrap();
    assert_eq!(female.n_all, 900);
    assert!((female.pr_all - 400.0 / 900.0).abs() < 1e-12);
    assert!((female.pr_sub - 0.6).abs() < 1e-12);
    assert!((female.dp_diff - 0.1556).abs() < 1e-3);
    assert!((male.pr_sub - 0.25).abs() < 1e-12);
    assert!((male.dp_diff + 0.1944).abs() < 1e-3);

    // no positive example anywhere
    assert!(female.tpr_sub.is_nan());
    assert!(female.eo_diff.is_nan());
}

// ============================================================================
// Threshold mitigation
// ============================================================================

/// Given: reference TPR 0.70 at base 0.5 and a subgroup at TPR 0.50
/// When: thresholds are learned under pure EO (lambda_fpr = 0)
/// Then: t = 0.40 is selected, lifting the subgroup TPR to 0.68
#[test]
fn test_eo_search_selects_closest_threshold() {
    let (table, membership) = threshold_scenario();
    let objective = Objective::EqualOpportunity { lambda_fpr: 0.0 };

    let learned = learn_thresholds(&table, &membership, &namespaces(&["gender"]), &objective, 50);
    assert_eq!(learned.thresholds.len(), 1);
    let star = learned.thresholds.get("gender", "female", "c").unwrap();
    assert!((star - 0.40).abs() < 1e-12);

    let row = &learned.audit[0];
    assert_eq!(row.objective, "eo");
    assert_eq!(row.n_group, 100);
    assert!((row.tpr_all_base - 0.70).abs() < 1e-12);
    assert!((row.tpr_group_base - 0.50).abs() < 1e-12);
    assert!((row.tpr_group_star - 0.68).abs() < 1e-12);
    assert!((row.objective_star - 0.02).abs() < 1e-9);
    assert_eq!(row.tp_group_base, 25);
    assert_eq!(row.tp_group_star, 34);
}

/// Given: a subgroup below the support floor
/// Then: no cell is learned for it
#[test]
fn test_min_support_blocks_learning() {
    let (table, membership) = threshold_scenario();
    let objective = Objective::EqualOpportunity { lambda_fpr: 0.0 };

    let learned = learn_thresholds(&table, &membership, &namespaces(&["gender"]), &objective, 101);
    assert!(learned.thresholds.is_empty());
    assert!(learned.audit.is_empty());
}

/// Given: a subgroup whose videos are all negatives for the class
/// When: EO thresholds are learned
/// Then: every candidate is undefined and the cell is stored at the base
#[test]
fn test_negative_only_subgroup_keeps_base() {
    let mut rows = Vec::new();
    let mut entries = Vec::new();
    for i in 0..60 {
        rows.push(video(i, "c", false, 0.3));
        entries.push((i, member_of(&[("age", "teen")])));
    }
    for i in 60..120 {
        rows.push(video(i, "c", i % 2 == 0, 0.7));
    }
    let table = PredictionTable::expand(&rows, &["c".to_string()], 0.5);
    let membership = MembershipMap::from_entries(entries);

    let objective = Objective::EqualOpportunity { lambda_fpr: 0.5 };
    let learned = learn_thresholds(&table, &membership, &namespaces(&["age"]), &objective, 50);
    assert_eq!(learned.thresholds.get("age", "teen", "c"), Some(0.5));
    assert_eq!(learned.thresholds.effective_threshold(0, "c", &membership, 0.5), 0.5);

    assert_eq!(learned.audit.len(), 1);
    let row = &learned.audit[0];
    assert_eq!(row.threshold_star, 0.5);
    assert!(row.objective_star.is_nan());
    assert_eq!(row.tp_group_star, row.tp_group_base);
    assert_eq!(row.fp_group_star, row.fp_group_base);

    // DP is defined for the same cell
    let objective = Objective::DemographicParity { lambda_precision: 0.0 };
    let learned = learn_thresholds(&table, &membership, &namespaces(&["age"]), &objective, 50);
    assert!(learned.audit[0].objective_star.is_finite());
}

/// Given: a video in an all-negative supported cell and in a cell learned at 0.0
/// When: predictions are rebuilt
/// Then: the undefined cell still holds the video to the base threshold
#[test]
fn test_undefined_cell_caps_lower_threshold() {
    let mut rows = Vec::new();
    let mut entries = Vec::new();
    for i in 0..100 {
        rows.push(video(i, "c", false, 0.4));
        entries.push((i, member_of(&[("gender", "female"), ("race_ethnicity", "asian")])));
    }
    for i in 100..200 {
        rows.push(video(i, "c", true, 0.35));
        entries.push((i, member_of(&[("gender", "female")])));
    }
    for i in 200..300 {
        rows.push(video(i, "c", true, 0.9));
    }
    let table = PredictionTable::expand(&rows, &["c".to_string()], 0.5);
    let membership = MembershipMap::from_entries(entries);

    let objective = Objective::EqualOpportunity { lambda_fpr: 0.0 };
    let learned = learn_thresholds(
        &table,
        &membership,
        &namespaces(&["gender", "race_ethnicity"]),
        &objective,
        50,
    );
    assert_eq!(learned.thresholds.get("gender", "female", "c"), Some(0.0));
    assert_eq!(learned.thresholds.get("race_ethnicity", "asian", "c"), Some(0.5));
    assert_eq!(learned.thresholds.effective_threshold(0, "c", &membership, 0.5), 0.5);
    assert_eq!(learned.thresholds.effective_threshold(150, "c", &membership, 0.5), 0.0);

    let rebuilt = rebuild(&table, &membership, &learned.thresholds);
    let first = rebuilt.iter().find(|r| r.video_id == 0).unwrap();
    assert!(first.score_of("c").is_none());
    let lowered = rebuilt.iter().find(|r| r.video_id == 150).unwrap();
    assert!(lowered.score_of("c").is_some());
}

/// Given: thresholds learned for two namespaces
/// When: predictions are rebuilt
/// Then: a video in both cells is held to the stricter threshold
#[test]
fn test_rebuild_uses_stricter_cell() {
    let (table, _) = threshold_scenario();
    let mut entries = Vec::new();
    for i in 0..200 {
        let mut cells = Vec::new();
        if i < 100 {
            cells.push(("gender", "female"));
        }
        if i % 2 == 0 {
            cells.push(("age", "adult"));
        }
        if !cells.is_empty() {
            entries.push((i, member_of(&cells)));
        }
    }
    let membership = MembershipMap::from_entries(entries);
    let objective = Objective::EqualOpportunity { lambda_fpr: 0.0 };

    let learned = learn_thresholds(&table, &membership, &namespaces(&["gender", "age"]), &objective, 50);
    let female = learned.thresholds.get("gender", "female", "c").unwrap();
    let adult = learned.thresholds.get("age", "adult", "c").unwrap();
    let strictest = female.max(adult);

    for (video_id, memberships) in membership.iter() {
        let t = learned.thresholds.effective_threshold(*video_id, "c", &membership, 0.5);
        let in_both = memberships.contains_key("gender") && memberships.contains_key("age");
        if in_both {
            assert_eq!(t, strictest);
        }
        assert!(t >= female.min(adult));
    }

    let rebuilt = rebuild(&table, &membership, &learned.thresholds);
    for row in &rebuilt {
        let t = learned.thresholds.effective_threshold(row.video_id, "c", &membership, 0.5);
        let score = table.record(0, row.video_id as usize).score;
        assert_eq!(row.score_of("c").is_some(), score >= t);
    }
}

// ============================================================================
// Determinism
// ============================================================================

/// Given: a rebuilt prediction file
/// When: it is evaluated twice
/// Then: both group-stats tables are byte-identical
#[test]
fn test_reevaluation_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let (table, membership) = threshold_scenario();
    let objective = Objective::EqualOpportunity { lambda_fpr: 0.5 };
    let learned = learn_thresholds(&table, &membership, &namespaces(&["gender"]), &objective, 50);

    let rebuilt_path = dir.path().join("predictions_test_rebuilt.csv");
    write_predictions(&rebuilt_path, &rebuild(&table, &membership, &learned.thresholds)).unwrap();

    let mut outputs = Vec::new();
    for run in 0..2 {
        let rows = read_predictions(&rebuilt_path).unwrap();
        let table = PredictionTable::expand(&rows, &["c".to_string()], 0.5);
        let grouping = Grouping::for_namespace(&membership, "gender", table.video_ids());
        let stats = evaluate_grouping(&table, &grouping, 50);
        let path = dir.path().join(format!("details_run{}.csv", run));
        write_rows(&path, &stats).unwrap();
        outputs.push(fs::read(&path).unwrap());
    }
    assert!(!outputs[0].is_empty());
    assert_eq!(outputs[0], outputs[1]);
}

// ============================================================================
// Intersections
// ============================================================================

/// Given: a video in 2 subgroups of A and 1 subgroup of B
/// Then: it contributes to exactly 2 labels of combination (A, B)
#[test]
fn test_intersection_cardinality() {
    let membership = MembershipMap::from_entries(vec![
        (7, member_of(&[("gender", "female"), ("gender", "male"), ("age", "teen")])),
        (8, member_of(&[("gender", "female")])),
    ]);
    let combo = namespaces(&["gender", "age"]);

    let labels = intersection_labels(&membership, 7, &combo);
    assert_eq!(labels.len(), 2);
    assert!(labels.contains(&"gender=female & age=teen".to_string()));
    assert!(labels.contains(&"gender=male & age=teen".to_string()));
    assert!(intersection_labels(&membership, 8, &combo).is_empty());

    let grouping = Grouping::for_combination(&membership, &combo, &[7, 8]);
    assert_eq!(grouping.family(), "gender*age");
    assert_eq!(grouping.len(), 2);
    for (_, members) in grouping.iter() {
        assert_eq!(members, &[0]);
    }
}
