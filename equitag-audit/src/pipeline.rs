//! Audit pipeline
//!
//! **Purpose:** Load the configured artifacts, run the fairness engines and
//! write every output table. Each stage computes all of its results in
//! memory before the first file is written, so a structural input error
//! never leaves partial output behind.

use crate::compare::{compare_tables, ComparisonRow};
use crate::engagement::{compare_engagement, EngagementMetadata, EngagementStat};
use crate::membership::{read_texts, Boundary, Grouping, MembershipMap, ProtectedLexicon};
use crate::metrics::{evaluate_grouping, worst_gaps, GroupStat, WorstGaps};
use crate::mitigation::{learn_thresholds, rebuild, LearnedThresholds, Objective};
use crate::predictions::{read_predictions, read_vocabulary, write_predictions, PredictionTable};
use crate::report::{AuditReport, CliFormatter, FamilyKind, FamilySummary};
use crate::tables::{read_rows, write_rows, write_text, OutputLayout};
use equitag_common::config::PathsConfig;
use equitag_common::{AuditParams, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Everything a command needs besides its own flags
#[derive(Debug, Clone)]
pub struct RunContext {
    pub paths: PathsConfig,
    pub params: AuditParams,
    /// Label embedded in evaluation artifact names
    pub model: String,
    /// Evaluate only the first N videos of the prediction source
    pub limit: Option<usize>,
}

impl RunContext {
    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.paths.output_dir)
    }
}

fn required<'a>(path: &'a Option<PathBuf>, key: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| Error::Config(format!("no path configured for '{}' (set [paths] {} or pass --{})", key, key, key)))
}

/// Read the prediction source and expand it against the vocabulary
pub fn load_table(ctx: &RunContext) -> Result<PredictionTable> {
    let classes = read_vocabulary(required(&ctx.paths.classes, "classes")?)?;
    let mut rows = read_predictions(required(&ctx.paths.predictions, "predictions")?)?;
    if let Some(limit) = ctx.limit {
        rows.truncate(limit);
    }
    let table = PredictionTable::expand(&rows, &classes, ctx.params.base_threshold);
    info!(
        videos = table.n_videos(),
        classes = table.classes().len(),
        base_threshold = table.base_threshold(),
        "Built prediction table"
    );
    Ok(table)
}

/// Resolve membership from the precomputed JSON, or from lexicon + texts
///
/// Only the requested namespaces are kept.
///
/// # Errors
/// `Config` when neither source is configured; `MissingInput` / `Malformed`
/// from the configured source
pub fn load_membership(ctx: &RunContext) -> Result<MembershipMap> {
    let namespaces = &ctx.params.namespaces;
    let membership = match (&ctx.paths.membership, &ctx.paths.lexicon, &ctx.paths.texts) {
        (Some(json), _, _) => MembershipMap::from_json(json)?.restricted_to(namespaces),
        (None, Some(lexicon), Some(texts)) => {
            let compiled = ProtectedLexicon::from_json(lexicon)?.compile(Boundary::Word)?;
            compiled.resolve(&read_texts(texts)?, namespaces)
        }
        _ => {
            return Err(Error::Config(
                "no membership source configured (set [paths] membership, or lexicon and texts)".to_string(),
            ))
        }
    };
    info!(videos = membership.len(), "Resolved membership");
    Ok(membership)
}

/// Rows of one evaluated family
#[derive(Debug, Clone)]
pub struct FamilyResult {
    /// Namespace name or combination key
    pub family: String,
    pub kind: FamilyKind,
    pub rows: Vec<GroupStat>,
    pub engagement: Vec<EngagementStat>,
}

/// In-memory result of an evaluation
#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    pub families: Vec<FamilyResult>,
    /// Worst gaps over the single-namespace families
    pub worst: Vec<WorstGaps>,
}

impl EvalOutcome {
    pub fn namespaces(&self) -> impl Iterator<Item = &FamilyResult> {
        self.families.iter().filter(|f| f.kind == FamilyKind::Namespace)
    }
}

/// Run the Group Metrics Engine (and the Engagement Comparator when
/// metadata is given) for every namespace and requested intersection
///
/// Namespaces without any matched video are skipped.
pub fn evaluate(
    table: &PredictionTable,
    membership: &MembershipMap,
    metadata: Option<&EngagementMetadata>,
    params: &AuditParams,
) -> EvalOutcome {
    let mut available = Vec::new();
    for ns in &params.namespaces {
        if membership.has_namespace(ns) {
            available.push(ns.clone());
        } else {
            info!(namespace = %ns, "No subgroup matched; skipping namespace");
        }
    }

    let mut groupings: Vec<(Grouping, FamilyKind)> = available
        .iter()
        .map(|ns| (Grouping::for_namespace(membership, ns, table.video_ids()), FamilyKind::Namespace))
        .collect();
    for combo in params.intersection_combos(&available) {
        groupings.push((
            Grouping::for_combination(membership, &combo, table.video_ids()),
            FamilyKind::Intersection,
        ));
    }

    let mut outcome = EvalOutcome::default();
    for (grouping, kind) in groupings {
        if grouping.is_empty() {
            info!(family = grouping.family(), "No video in any group; skipping");
            continue;
        }
        let rows = evaluate_grouping(table, &grouping, params.min_support);
        let engagement = metadata
            .map(|m| compare_engagement(&grouping, table.video_ids(), m))
            .unwrap_or_default();
        info!(family = grouping.family(), groups = grouping.len(), rows = rows.len(), "Evaluated family");
        outcome.families.push(FamilyResult {
            family: grouping.family().to_string(),
            kind,
            rows,
            engagement,
        });
    }

    let namespace_rows: Vec<GroupStat> = outcome.namespaces().flat_map(|f| f.rows.iter().cloned()).collect();
    outcome.worst = worst_gaps(&namespace_rows);
    outcome
}

/// Write evaluation tables, the Markdown summary and the JSON report
fn write_eval(layout: &OutputLayout, model: &str, outcome: &EvalOutcome, report: &mut AuditReport) -> Result<()> {
    let mut sections = Vec::new();
    for family in &outcome.families {
        if !family.rows.is_empty() {
            let path = match family.kind {
                FamilyKind::Namespace => layout.details(model, &family.family),
                FamilyKind::Intersection => layout.details_intersections(model, &family.family),
            };
            write_rows(&path, &family.rows)?;
            if family.kind == FamilyKind::Namespace {
                sections.push((family.family.clone(), path.clone(), family.rows.clone()));
            }
            report.artifacts.push(path);
        }
        if !family.engagement.is_empty() {
            let path = match family.kind {
                FamilyKind::Namespace => layout.engagement(model, &family.family),
                FamilyKind::Intersection => layout.engagement_intersections(model, &family.family),
            };
            write_rows(&path, &family.engagement)?;
            report.artifacts.push(path);
        }
        report.families.push(FamilySummary {
            family: family.family.clone(),
            kind: family.kind,
            group_rows: family.rows.len(),
            engagement_rows: family.engagement.len(),
        });
    }

    if !outcome.worst.is_empty() {
        let path = layout.summary(model);
        write_rows(&path, &outcome.worst)?;
        report.artifacts.push(path);
    }

    let path = layout.markdown_summary(model);
    write_text(&path, &CliFormatter::format_markdown_summary(model, &sections))?;
    report.artifacts.push(path);
    report.worst_gaps = outcome.worst.clone();
    Ok(())
}

/// `eval`: evaluate the configured predictions and write every table
pub fn run_eval(ctx: &RunContext) -> Result<(AuditReport, EvalOutcome)> {
    let started = Instant::now();
    let table = load_table(ctx)?;
    let membership = load_membership(ctx)?;
    let metadata = match &ctx.paths.metadata {
        Some(path) => Some(EngagementMetadata::from_csv(path)?),
        None => None,
    };

    let outcome = evaluate(&table, &membership, metadata.as_ref(), &ctx.params);
    if outcome.families.is_empty() {
        warn!("No requested namespace matched any video");
    }

    let layout = ctx.layout();
    fs::create_dir_all(layout.root())?;
    let mut report = AuditReport::new("eval", &ctx.model, ctx.params.clone());
    write_eval(&layout, &ctx.model, &outcome, &mut report)?;

    report.session.duration_seconds = started.elapsed().as_secs_f64();
    let path = layout.report("eval", &ctx.model);
    report.artifacts.push(path.clone());
    report.export_json(&path)?;
    info!(path = %path.display(), "Wrote run report");
    Ok((report, outcome))
}

/// `mitigate`: learn thresholds and write the audit table and the rebuilt
/// predictions
///
/// The audit table is omitted when no cell is learned.
pub fn run_mitigate(ctx: &RunContext, objective: &Objective, tag: &str) -> Result<(AuditReport, LearnedThresholds)> {
    let started = Instant::now();
    let table = load_table(ctx)?;
    let membership = load_membership(ctx)?;

    let learned = learn_thresholds(&table, &membership, &ctx.params.namespaces, objective, ctx.params.min_support);
    let rebuilt = rebuild(&table, &membership, &learned.thresholds);

    let layout = ctx.layout();
    fs::create_dir_all(layout.root())?;
    let mut report = AuditReport::new("mitigate", tag, ctx.params.clone());
    report.learned_cells = Some(learned.thresholds.len());

    if learned.audit.is_empty() {
        info!(objective = objective.name(), "No cell learned; skipping threshold table");
    } else {
        let audit_path = layout.thresholds(objective.name(), tag);
        write_rows(&audit_path, &learned.audit)?;
        report.artifacts.push(audit_path);
    }

    let predictions_path = layout.predictions(tag);
    write_predictions(&predictions_path, &rebuilt)?;
    info!(path = %predictions_path.display(), videos = rebuilt.len(), "Wrote rebuilt predictions");
    report.artifacts.push(predictions_path);

    report.session.duration_seconds = started.elapsed().as_secs_f64();
    let path = layout.report("mitigate", tag);
    report.artifacts.push(path.clone());
    report.export_json(&path)?;
    Ok((report, learned))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string())
}

/// `compare`: join two Group-stats tables and write the comparison
pub fn run_compare(layout: &OutputLayout, before: &Path, after: &Path, alpha: f64) -> Result<(Vec<ComparisonRow>, PathBuf)> {
    let before_rows: Vec<GroupStat> = read_rows(before, "group stats (before)")?;
    let after_rows: Vec<GroupStat> = read_rows(after, "group stats (after)")?;
    let rows = compare_tables(&before_rows, &after_rows, alpha);

    let path = layout.comparison(&file_stem(before), &file_stem(after));
    write_rows(&path, &rows)?;
    Ok((rows, path))
}

