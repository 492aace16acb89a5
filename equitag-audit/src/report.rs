//! Report generation and formatting
//!
//! **Purpose:** JSON run reports and plain-text / Markdown rendering of
//! audit results for the command line.

use crate::compare::ComparisonRow;
use crate::membership::{LexiconAudit, TermHit};
use crate::metrics::{top_gaps, GapMetric, GroupStat, WorstGaps};
use crate::mitigation::{LearnedThresholds, Objective};
use equitag_common::{AuditParams, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Rows surfaced per namespace in the Markdown summary
pub const MARKDOWN_TOP_N: usize = 5;

/// Report format version
pub const REPORT_VERSION: &str = "1.0";

/// Kind of a grouping family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyKind {
    Namespace,
    Intersection,
}

/// Row counts produced for one family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySummary {
    /// Namespace name or combination key
    pub family: String,
    pub kind: FamilyKind,
    pub group_rows: usize,
    pub engagement_rows: usize,
}

/// Run session metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session start timestamp (RFC 3339)
    pub timestamp: String,

    /// Run duration in seconds
    pub duration_seconds: f64,

    /// Report format version
    pub version: String,
}

/// Complete report of one command run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub session: SessionInfo,

    /// Subcommand that produced the report
    pub command: String,

    /// Model or mitigation tag the artifacts are named after
    pub model: String,

    /// Effective parameters after config and CLI overrides
    pub params: AuditParams,

    pub families: Vec<FamilySummary>,

    /// Worst gaps per (namespace, class)
    pub worst_gaps: Vec<WorstGaps>,

    /// Learned threshold cells (mitigation runs only)
    pub learned_cells: Option<usize>,

    /// Every artifact written, in write order
    pub artifacts: Vec<PathBuf>,
}

impl AuditReport {
    /// Create an empty report stamped with the current time
    pub fn new(command: &str, model: &str, params: AuditParams) -> Self {
        Self {
            session: SessionInfo {
                timestamp: chrono::Utc::now().to_rfc3339(),
                duration_seconds: 0.0,
                version: REPORT_VERSION.to_string(),
            },
            command: command.to_string(),
            model: model.to_string(),
            params,
            families: Vec::new(),
            worst_gaps: Vec::new(),
            learned_cells: None,
            artifacts: Vec::new(),
        }
    }

    /// Export report to JSON file
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Import report from JSON file
    pub fn import_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let report: AuditReport = serde_json::from_reader(file)?;
        Ok(report)
    }
}

/// Signed gap with three decimals, `-` when undefined
pub fn fmt_gap(value: f64) -> String {
    if value.is_nan() {
        "-".to_string()
    } else {
        format!("{:+.3}", value)
    }
}

/// Rate with three decimals, `-` when undefined
pub fn fmt_rate(value: f64) -> String {
    if value.is_nan() {
        "-".to_string()
    } else {
        format!("{:.3}", value)
    }
}

/// p-value with significance stars (`***` < 0.001, `**` < 0.01, `*` < alpha)
pub fn fmt_p(value: f64, alpha: f64) -> String {
    if value.is_nan() {
        return "-".to_string();
    }
    let stars = if value < 0.001 {
        "***"
    } else if value < 0.01 {
        "**"
    } else if value < alpha {
        "*"
    } else {
        ""
    };
    format!("{:.3}{}", value, stars)
}

/// CLI formatter for audit results
pub struct CliFormatter;

impl CliFormatter {
    /// Format the parameter header printed before a run
    pub fn format_params_header(command: &str, model: &str, params: &AuditParams) -> String {
        let mut output = String::new();
        output.push_str(&format!("\nEquiTag {}: {}\n", command, model));
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        output.push_str(&format!("min_support = {}\n", params.min_support));
        output.push_str(&format!("base_threshold = {}\n", params.base_threshold));
        output.push_str(&format!("lambda_fpr = {}\n", params.lambda_fpr));
        output.push_str(&format!("lambda_precision = {}\n", params.lambda_precision));
        output.push_str(&format!("alpha = {}\n", params.alpha));
        output.push_str(&format!("namespaces = {}\n", params.namespaces.join(", ")));
        if !params.intersections.is_empty() {
            let requested: Vec<String> = params.intersections.iter().map(|i| i.to_string()).collect();
            output.push_str(&format!("intersections = {}\n", requested.join(", ")));
        }
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        output
    }

    /// Format the largest gaps of one metric as a table
    pub fn format_top_gaps(rows: &[GroupStat], metric: GapMetric, n: usize, alpha: f64) -> String {
        let mut output = String::new();
        output.push_str(&format!("\nTop {} gaps:\n", metric.short_name()));
        output.push_str("┌────┬──────────────────────┬────────────────────────────────┬────────┬─────────┬────────────┐\n");
        output.push_str("│  # │ Class                │ Subgroup                       │      n │     Gap │ p_adj      │\n");
        output.push_str("├────┼──────────────────────┼────────────────────────────────┼────────┼─────────┼────────────┤\n");

        for (i, row) in top_gaps(rows, metric, n).into_iter().enumerate() {
            output.push_str(&format!(
                "│ {:>2} │ {:<20} │ {:<30} │ {:>6} │ {:>7} │ {:<10} │\n",
                i + 1,
                truncate(&row.class, 20),
                truncate(&row.subgroup, 30),
                row.n_sub,
                fmt_gap(metric.diff(row)),
                fmt_p(metric.p_adj(row), alpha)
            ));
        }

        output.push_str("└────┴──────────────────────┴────────────────────────────────┴────────┴─────────┴────────────┘\n");
        output
    }

    /// Markdown summary of the per-namespace tables
    ///
    /// # Arguments
    /// * `sections` - (namespace, details path, rows) in reporting order
    pub fn format_markdown_summary(model: &str, sections: &[(String, PathBuf, Vec<GroupStat>)]) -> String {
        let mut lines: Vec<String> = vec![format!("# Fairness Summary ({})\n", model)];
        for (namespace, details, rows) in sections {
            lines.push(format!("## {}\n", namespace));
            lines.push(format!("- Details: `{}`", details.display()));
            for row in top_gaps(rows, GapMetric::DemographicParity, MARKDOWN_TOP_N) {
                lines.push(format!(
                    "- **DP gap** {} for `{}` in class `{}` (n={}); Holm-adj p={}",
                    fmt_gap(row.dp_diff),
                    row.subgroup,
                    row.class,
                    row.n_sub,
                    fmt_rate(row.p_dp_adj)
                ));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    /// Format a mitigation run summary
    pub fn format_mitigation_summary(objective: &Objective, learned: &LearnedThresholds) -> String {
        let mut output = String::new();
        output.push_str("\nMitigation:\n");
        output.push_str(&format!("Objective: {}\n", objective));
        output.push_str(&format!("Learned cells: {}\n", learned.thresholds.len()));
        if learned.audit.is_empty() {
            output.push_str("No cell met the minimum support; base threshold applies everywhere\n");
            return output;
        }

        let raised = learned.audit.iter().filter(|r| r.threshold_star > r.threshold_base).count();
        let lowered = learned.audit.iter().filter(|r| r.threshold_star < r.threshold_base).count();
        output.push_str(&format!("Raised above base: {}\n", raised));
        output.push_str(&format!("Lowered below base: {}\n", lowered));

        output.push_str("┌──────────────────────┬──────────────────────┬──────────────────────┬────────┬────────┐\n");
        output.push_str("│ Namespace            │ Subgroup             │ Class                │  Base  │  Star  │\n");
        output.push_str("├──────────────────────┼──────────────────────┼──────────────────────┼────────┼────────┤\n");
        let mut shifted: Vec<_> = learned.audit.iter().collect();
        shifted.sort_by(|a, b| {
            let da = (a.threshold_star - a.threshold_base).abs();
            let db = (b.threshold_star - b.threshold_base).abs();
            db.total_cmp(&da)
        });
        for row in shifted.into_iter().take(10) {
            output.push_str(&format!(
                "│ {:<20} │ {:<20} │ {:<20} │ {:>6.2} │ {:>6.2} │\n",
                truncate(&row.namespace, 20),
                truncate(&row.subgroup, 20),
                truncate(&row.class, 20),
                row.threshold_base,
                row.threshold_star
            ));
        }
        output.push_str("└──────────────────────┴──────────────────────┴──────────────────────┴────────┴────────┘\n");
        output
    }

    /// Format a before/after comparison summary
    pub fn format_comparison_summary(rows: &[ComparisonRow]) -> String {
        let mut output = String::new();
        output.push_str(&format!("\nJoined rows: {}\n", rows.len()));
        output.push_str(&format!(
            "Consistent significant gaps: {}\n",
            rows.iter().filter(|r| r.consistent).count()
        ));
        for metric in GapMetric::ALL {
            let shrank = rows
                .iter()
                .filter(|r| r.metric(metric).abs_change < 0.0)
                .count();
            let grew = rows
                .iter()
                .filter(|r| r.metric(metric).abs_change > 0.0)
                .count();
            output.push_str(&format!(
                "{:<4} gaps shrank: {}, grew: {}\n",
                metric.short_name(),
                shrank,
                grew
            ));
        }
        output
    }

    /// Format a lexicon structure audit
    pub fn format_lexicon_audit(audit: &LexiconAudit) -> String {
        let mut output = String::new();
        output.push_str("\nLexicon:\n");
        output.push_str(&format!("Namespaces: {}\n", audit.namespaces));
        output.push_str(&format!("Subgroups: {}\n", audit.subgroups));
        output.push_str(&format!("Terms: {}\n", audit.terms));
        if !audit.empty_groups.is_empty() {
            output.push_str("Empty subgroups:\n");
            for (ns, sg) in &audit.empty_groups {
                output.push_str(&format!("  {}/{}\n", ns, sg));
            }
        }
        output.push_str(&format!("Overlapping terms: {}\n", audit.overlap_terms_count));
        for (term, owners) in &audit.overlap_examples {
            let owners: Vec<String> = owners.iter().map(|(ns, sg)| format!("{}/{}", ns, sg)).collect();
            output.push_str(&format!("  '{}': {}\n", term, owners.join(", ")));
        }
        output
    }

    /// Format lexicon matches of a sample text
    pub fn format_term_hits(text: &str, hits: &[TermHit]) -> String {
        let mut output = format!("\nSample: \"{}\"\n", text);
        if hits.is_empty() {
            output.push_str("No subgroup matched\n");
        }
        for hit in hits {
            output.push_str(&format!(
                "[✓] {}/{}: {}\n",
                hit.namespace,
                hit.subgroup,
                hit.terms.join(", ")
            ));
        }
        output
    }

    /// Format session summary
    pub fn format_session_summary(report: &AuditReport) -> String {
        let mut output = String::new();

        output.push_str("\n╔════════════════════════════════════════╗\n");
        output.push_str(&format!("║ {:^38} ║\n", format!("EquiTag {} complete", report.command)));
        output.push_str("╚════════════════════════════════════════╝\n\n");

        output.push_str(&format!("Duration: {:.1} seconds\n", report.session.duration_seconds));
        output.push_str(&format!("Families evaluated: {}\n", report.families.len()));
        let rows: usize = report.families.iter().map(|f| f.group_rows).sum();
        output.push_str(&format!("Group rows: {}\n", rows));
        if let Some(cells) = report.learned_cells {
            output.push_str(&format!("Learned cells: {}\n", cells));
        }
        output.push_str(&format!("Artifacts written: {}\n", report.artifacts.len()));

        output
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GroupCounts;
    use tempfile::TempDir;

    fn stat(subgroup: &str, n_pred_pos: usize) -> GroupStat {
        let group = GroupCounts { n: 200, n_pred_pos, n_y1: 100, n_tp: n_pred_pos / 2, n_y0: 100, n_fp: n_pred_pos - n_pred_pos / 2 };
        let total = GroupCounts { n: 1000, n_pred_pos: 500, n_y1: 500, n_tp: 250, n_y0: 500, n_fp: 250 };
        GroupStat::new("gender", "pov", subgroup, &group, &total)
    }

    #[test]
    fn test_create_report() {
        let report = AuditReport::new("eval", "lr", AuditParams::default());
        assert_eq!(report.session.version, REPORT_VERSION);
        assert!(!report.session.timestamp.is_empty());
        assert!(report.learned_cells.is_none());
    }

    #[test]
    fn test_json_export_import() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let mut report = AuditReport::new("mitigate", "lr_eo", AuditParams::default());
        report.learned_cells = Some(12);
        report.families.push(FamilySummary {
            family: "gender".to_string(),
            kind: FamilyKind::Namespace,
            group_rows: 4,
            engagement_rows: 2,
        });

        report.export_json(&path).unwrap();
        let imported = AuditReport::import_json(&path).unwrap();

        assert_eq!(imported.command, "mitigate");
        assert_eq!(imported.learned_cells, Some(12));
        assert_eq!(imported.families, report.families);
        assert_eq!(imported.params, report.params);
    }

    #[test]
    fn test_value_formatting() {
        assert_eq!(fmt_gap(0.15555), "+0.156");
        assert_eq!(fmt_gap(-0.19444), "-0.194");
        assert_eq!(fmt_gap(f64::NAN), "-");
        assert_eq!(fmt_p(0.0004, 0.05), "0.000***");
        assert_eq!(fmt_p(0.03, 0.05), "0.030*");
        assert_eq!(fmt_p(0.2, 0.05), "0.200");
    }

    #[test]
    fn test_markdown_summary_lines() {
        let rows = vec![stat("female", 150), stat("male", 50)];
        let sections = vec![("gender".to_string(), PathBuf::from("out/details_lr_gender.csv"), rows)];
        let md = CliFormatter::format_markdown_summary("lr", &sections);

        assert!(md.starts_with("# Fairness Summary (lr)"));
        assert!(md.contains("## gender"));
        assert!(md.contains("- **DP gap** +0.250 for `female` in class `pov` (n=200); Holm-adj p="));
        assert!(md.contains("`male`"));
    }

    #[test]
    fn test_format_top_gaps() {
        let rows = vec![stat("female", 150), stat("male", 90)];
        let formatted = CliFormatter::format_top_gaps(&rows, GapMetric::DemographicParity, 5, 0.05);
        assert!(formatted.contains("Top DP gaps"));
        assert!(formatted.contains("female"));
        assert!(formatted.contains("+0.250"));
    }
}
