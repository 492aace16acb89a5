//! EquiTag fairness audit - command-line entry point
//!
//! **Usage:**
//! ```bash
//! equitag-audit [--config <file>] eval
//! equitag-audit mitigate --objective eo|dp [--tag <tag>]
//! equitag-audit compare --before <csv> --after <csv>
//! equitag-audit lexicon [--audit] [--sample <text>]
//! ```
//!
//! Configuration comes from `equitag.toml` (see `equitag_common::config`);
//! every flag below overrides the corresponding TOML value.

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use equitag_audit::membership::{Boundary, ProtectedLexicon};
use equitag_audit::metrics::GapMetric;
use equitag_audit::mitigation::ObjectiveKind;
use equitag_audit::pipeline::{run_compare, run_eval, run_mitigate, RunContext};
use equitag_audit::report::CliFormatter;
use equitag_common::params::IntersectionSpec;
use equitag_common::{load_config, TomlConfig};
use std::path::PathBuf;
use tracing::info;

/// Rows shown per namespace in the console top-gap tables
const CONSOLE_TOP_N: usize = 5;

/// Fairness audit and threshold mitigation for multi-label video classifiers
#[derive(Parser, Debug)]
#[command(name = "equitag-audit")]
#[command(about = "Fairness audit and threshold mitigation for multi-label video classifiers")]
#[command(version)]
struct Args {
    /// Configuration file (overrides EQUITAG_CONFIG and ./equitag.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Per-run overrides of the TOML configuration
#[derive(ClapArgs, Debug, Default)]
struct Overrides {
    /// Directory receiving every output table
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Label embedded in evaluation artifact names
    #[arg(long, global = true)]
    model: Option<String>,

    /// Prediction source CSV
    #[arg(long, global = true)]
    predictions: Option<PathBuf>,

    /// Class vocabulary CSV
    #[arg(long, global = true)]
    classes: Option<PathBuf>,

    /// Precomputed membership JSON
    #[arg(long, global = true)]
    membership: Option<PathBuf>,

    /// Protected-term lexicon JSON
    #[arg(long, global = true)]
    lexicon: Option<PathBuf>,

    /// Video texts CSV matched with the lexicon
    #[arg(long, global = true)]
    texts: Option<PathBuf>,

    /// Engagement metadata CSV
    #[arg(long, global = true)]
    metadata: Option<PathBuf>,

    #[arg(long, global = true)]
    min_support: Option<usize>,

    #[arg(long, global = true)]
    base_threshold: Option<f64>,

    #[arg(long, global = true)]
    lambda_fpr: Option<f64>,

    #[arg(long, global = true)]
    lambda_precision: Option<f64>,

    #[arg(long, global = true)]
    alpha: Option<f64>,

    /// Namespaces to evaluate (comma-separated)
    #[arg(long, global = true, value_delimiter = ',')]
    namespaces: Option<Vec<String>>,

    /// Intersections: ALL2, ALL3 or ns1*ns2[*ns3] (comma-separated)
    #[arg(long, global = true, value_delimiter = ',')]
    intersections: Option<Vec<String>>,

    /// Evaluate only the first N videos
    #[arg(long, global = true)]
    limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate group fairness (and engagement when metadata is configured)
    Eval,

    /// Learn subgroup thresholds and rebuild predictions
    Mitigate {
        /// Objective: eo (equal opportunity) or dp (demographic parity)
        #[arg(long, default_value = "eo")]
        objective: String,

        /// Tag for the rebuilt predictions (default: <model>_<objective>)
        #[arg(long)]
        tag: Option<String>,
    },

    /// Compare two group-stats tables (before/after mitigation)
    Compare {
        #[arg(long, value_name = "CSV")]
        before: PathBuf,

        #[arg(long, value_name = "CSV")]
        after: PathBuf,
    },

    /// Inspect the protected-term lexicon
    Lexicon {
        /// Print the structural audit
        #[arg(long)]
        audit: bool,

        /// Print the subgroups matched by a sample text
        #[arg(long, value_name = "TEXT")]
        sample: Option<String>,

        /// Term boundary: word or edge
        #[arg(long, default_value = "word")]
        boundary: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let (config, source) = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.logging.level);
    match source.path() {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    let ctx = build_context(config, &args.overrides)?;

    match args.command {
        Command::Eval => {
            println!("{}", CliFormatter::format_params_header("eval", &ctx.model, &ctx.params));
            let (report, outcome) = run_eval(&ctx).context("Evaluation failed")?;
            for family in outcome.namespaces() {
                println!("\n{}:", family.family);
                println!(
                    "{}",
                    CliFormatter::format_top_gaps(&family.rows, GapMetric::DemographicParity, CONSOLE_TOP_N, ctx.params.alpha)
                );
            }
            println!("{}", CliFormatter::format_session_summary(&report));
        }
        Command::Mitigate { objective, tag } => {
            let kind: ObjectiveKind = objective.parse().context("Invalid --objective")?;
            let objective = kind.with_params(&ctx.params);
            let tag = tag.unwrap_or_else(|| format!("{}_{}", ctx.model, objective.name()));
            println!("{}", CliFormatter::format_params_header("mitigate", &tag, &ctx.params));
            let (report, learned) = run_mitigate(&ctx, &objective, &tag).context("Mitigation failed")?;
            println!("{}", CliFormatter::format_mitigation_summary(&objective, &learned));
            println!("{}", CliFormatter::format_session_summary(&report));
        }
        Command::Compare { before, after } => {
            let (rows, path) =
                run_compare(&ctx.layout(), &before, &after, ctx.params.alpha).context("Comparison failed")?;
            println!("{}", CliFormatter::format_comparison_summary(&rows));
            println!("✓ Comparison written to: {}", path.display());
        }
        Command::Lexicon { audit, sample, boundary } => {
            let Some(path) = ctx.paths.lexicon.as_deref() else {
                bail!("No lexicon configured (set [paths] lexicon or pass --lexicon)");
            };
            let lexicon = ProtectedLexicon::from_json(path).context("Failed to load lexicon")?;
            if audit || sample.is_none() {
                println!("{}", CliFormatter::format_lexicon_audit(&lexicon.audit()));
            }
            if let Some(text) = sample {
                let boundary: Boundary = boundary.parse().context("Invalid --boundary")?;
                let compiled = lexicon.compile(boundary).context("Failed to compile lexicon")?;
                println!("{}", CliFormatter::format_term_hits(&text, &compiled.match_text(&text)));
            }
        }
    }

    Ok(())
}

/// Initialize tracing: `RUST_LOG` wins over the configured level
fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

/// Merge CLI overrides into the loaded configuration
fn build_context(config: TomlConfig, overrides: &Overrides) -> Result<RunContext> {
    let TomlConfig { mut paths, audit, .. } = config;
    let mut params = audit.params;

    let path_overrides = [
        (&mut paths.predictions, &overrides.predictions),
        (&mut paths.classes, &overrides.classes),
        (&mut paths.membership, &overrides.membership),
        (&mut paths.lexicon, &overrides.lexicon),
        (&mut paths.texts, &overrides.texts),
        (&mut paths.metadata, &overrides.metadata),
    ];
    for (target, value) in path_overrides {
        if value.is_some() {
            *target = value.clone();
        }
    }
    if let Some(dir) = &overrides.output_dir {
        paths.output_dir = dir.clone();
    }

    if let Some(v) = overrides.min_support {
        params.min_support = v;
    }
    if let Some(v) = overrides.base_threshold {
        params.base_threshold = v;
    }
    if let Some(v) = overrides.lambda_fpr {
        params.lambda_fpr = v;
    }
    if let Some(v) = overrides.lambda_precision {
        params.lambda_precision = v;
    }
    if let Some(v) = overrides.alpha {
        params.alpha = v;
    }
    if let Some(namespaces) = &overrides.namespaces {
        params.namespaces = namespaces.clone();
    }
    if let Some(requested) = &overrides.intersections {
        params.intersections = requested
            .iter()
            .map(|s| s.parse::<IntersectionSpec>())
            .collect::<equitag_common::Result<Vec<_>>>()
            .context("Invalid --intersections")?;
    }
    params.validate().context("Invalid audit parameters")?;

    Ok(RunContext {
        paths,
        params,
        model: overrides.model.clone().unwrap_or(audit.model),
        limit: overrides.limit,
    })
}
