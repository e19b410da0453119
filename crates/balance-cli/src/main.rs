//! EC4X Balance Lab CLI
//!
//! The `balance` command analyzes diagnostic data and orchestrates
//! parallel simulator batches.
//!
//! ## Commands
//!
//! - `summary`: Dataset overview (provenance, run/house/record counts)
//! - `by-house` / `by-turn`: Aggregate metrics per house or per turn
//! - `outliers`: Z-score or IQR outlier detection on one metric
//! - `gaps`: Run the gap-check battery and anomaly scan
//! - `run`: Execute a parallel batch session against the simulator

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use balance_core::{
    iqr, summary_by_house, summary_by_turn, zscore, CheckStatus, DiagnosticTable, GroupSummary,
    OutlierReport, OverallStatus, DEFAULT_IQR_MULTIPLIER, DEFAULT_ZSCORE_THRESHOLD,
};
use balance_runner::{
    run_parallel, BatchArtifact, BatchPlan, BatchSummary, RunnerConfig, SimulatorInvoker,
};

#[derive(Parser)]
#[command(name = "balance")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "EC4X balance testing - analysis and batch orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show dataset overview
    Summary {
        /// Directory containing per-run diagnostic CSV files
        #[arg(long, default_value = "balance_results/diagnostics")]
        diagnostics_dir: PathBuf,
    },

    /// Aggregate metrics by house
    ByHouse {
        #[arg(long, default_value = "balance_results/diagnostics")]
        diagnostics_dir: PathBuf,

        /// Metrics to include (default: all numeric)
        #[arg(short, long)]
        metrics: Vec<String>,

        /// Number of rows to display
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Aggregate metrics by turn
    ByTurn {
        #[arg(long, default_value = "balance_results/diagnostics")]
        diagnostics_dir: PathBuf,

        #[arg(short, long)]
        metrics: Vec<String>,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Detect outliers on a metric
    Outliers {
        /// Metric column to analyze
        metric: String,

        #[arg(long, default_value = "balance_results/diagnostics")]
        diagnostics_dir: PathBuf,

        #[arg(long, value_enum, default_value = "zscore")]
        method: Method,

        /// Z-score threshold
        #[arg(long, default_value_t = DEFAULT_ZSCORE_THRESHOLD)]
        threshold: f64,

        /// IQR fence multiplier (3.0 = extreme outliers)
        #[arg(long, default_value_t = DEFAULT_IQR_MULTIPLIER)]
        multiplier: f64,

        /// Compute per-house baselines instead of a global one
        #[arg(long)]
        by_house: bool,

        /// Print the report as JSON instead of a table
        #[arg(long)]
        json_output: bool,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Run the gap-check battery and anomaly scan
    Gaps {
        #[arg(long, default_value = "balance_results/diagnostics")]
        diagnostics_dir: PathBuf,

        /// Print the report as JSON instead of a table
        #[arg(long)]
        json_output: bool,
    },

    /// Execute a parallel batch session against the simulator
    Run {
        /// Runner config file (balance.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Simulator binary override
        #[arg(long)]
        simulator: Option<PathBuf>,

        /// Number of parallel workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Total runs for this session
        #[arg(short, long)]
        runs: Option<u64>,

        /// Turns per run
        #[arg(short, long)]
        turns: Option<u32>,

        /// Hex rings for map size (0 = derive from player count)
        #[arg(long)]
        rings: Option<u32>,

        /// Number of players
        #[arg(long)]
        players: Option<u32>,

        /// Artifact output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    Zscore,
    Iqr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Summary { diagnostics_dir } => {
            let table = load_table(&diagnostics_dir)?;
            print_summary(&table);
        }

        Commands::ByHouse {
            diagnostics_dir,
            metrics,
            limit,
        } => {
            let table = load_table(&diagnostics_dir)?;
            let metrics = (!metrics.is_empty()).then_some(metrics);
            let summaries = summary_by_house(&table, metrics.as_deref())?;
            print_group_summaries("house", &summaries, limit);
        }

        Commands::ByTurn {
            diagnostics_dir,
            metrics,
            limit,
        } => {
            let table = load_table(&diagnostics_dir)?;
            let metrics = (!metrics.is_empty()).then_some(metrics);
            let summaries = summary_by_turn(&table, metrics.as_deref())?;
            print_group_summaries("turn", &summaries, limit);
        }

        Commands::Outliers {
            metric,
            diagnostics_dir,
            method,
            threshold,
            multiplier,
            by_house,
            json_output,
            limit,
        } => {
            let table = load_table(&diagnostics_dir)?;
            let group_by = by_house.then_some("house");
            let report = match method {
                Method::Zscore => zscore(&table, &metric, threshold, group_by)?,
                Method::Iqr => iqr(&table, &metric, multiplier, group_by)?,
            };
            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_outliers(&report, limit);
            }
        }

        Commands::Gaps {
            diagnostics_dir,
            json_output,
        } => {
            let table = load_table(&diagnostics_dir)?;
            let report = balance_core::analyze(&table);
            if json_output {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_gap_report(&report);
            }
            if report.overall == OverallStatus::IssuesFound {
                std::process::exit(1);
            }
        }

        Commands::Run {
            config,
            simulator,
            workers,
            runs,
            turns,
            rings,
            players,
            output_dir,
        } => {
            let mut runner = RunnerConfig::load_or_default(config.as_deref())?;
            if let Some(v) = simulator {
                runner.simulator = v;
            }
            if let Some(v) = workers {
                runner.workers = v;
            }
            if let Some(v) = runs {
                runner.total_runs = v;
            }
            if let Some(v) = turns {
                runner.turns_per_run = v;
            }
            if let Some(v) = rings {
                runner.map_rings = v;
            }
            if let Some(v) = players {
                runner.players = v;
            }
            if let Some(v) = output_dir {
                runner.output_dir = v;
            }

            run_session(runner).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Collect the CSV files under a diagnostics directory, sorted by name.
fn diagnostic_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("diagnostics directory not found: {}", dir.display()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "csv").unwrap_or(false))
        .collect();
    paths.sort();

    if paths.is_empty() {
        anyhow::bail!("no diagnostic CSV files in {}", dir.display());
    }
    Ok(paths)
}

fn load_table(dir: &Path) -> Result<DiagnosticTable> {
    let paths = diagnostic_paths(dir)?;
    let table = DiagnosticTable::load(&paths)
        .with_context(|| format!("loading diagnostics from {}", dir.display()))?;
    for warning in table.warnings() {
        eprintln!("WARNING: {warning}");
    }
    Ok(table)
}

fn print_summary(table: &DiagnosticTable) {
    let meta = table.metadata();
    let turns_per_run = if meta.run_count > 0 {
        meta.total_records as f64 / meta.run_count as f64
    } else {
        0.0
    };

    println!("{}", "=".repeat(70));
    println!("BALANCE DATASET SUMMARY");
    println!("{}", "=".repeat(70));
    println!("Provenance:     {}", meta.provenance_hash);
    println!("Source digest:  {}", &meta.source_digest[..12.min(meta.source_digest.len())]);
    println!("Loaded at:      {}", meta.loaded_at.to_rfc3339());
    println!("Runs:           {}", meta.run_count);
    println!("Houses:         {}", meta.entity_count);
    println!("Total records:  {}", meta.total_records);
    println!("Records/run:    {turns_per_run:.1}");
    println!("Columns:        {}", table.columns().len());
    println!("{}", "=".repeat(70));
}

fn print_group_summaries(key_name: &str, summaries: &[GroupSummary], limit: usize) {
    for group in summaries.iter().take(limit) {
        println!("{key_name}: {}", group.key);
        for m in &group.metrics {
            let fmt = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".into());
            println!(
                "  {:<28} mean={:>10} sum={:>12} std={:>10} min={:>10} max={:>10}",
                m.metric,
                fmt(m.mean),
                fmt(m.sum),
                fmt(m.std),
                fmt(m.min),
                fmt(m.max)
            );
        }
    }
    if summaries.len() > limit {
        println!("... and {} more groups", summaries.len() - limit);
    }
}

fn print_outliers(report: &OutlierReport, limit: usize) {
    println!(
        "Outliers for '{}' ({:?}, threshold {}{}): {} flagged",
        report.metric,
        report.method,
        report.threshold,
        report
            .group_by
            .as_deref()
            .map(|g| format!(", grouped by {g}"))
            .unwrap_or_default(),
        report.rows.len()
    );

    for row in report.rows.iter().take(limit) {
        println!(
            "  run={:<8} turn={:<5} house={:<18} value={:>12.2} deviation={:>8.2}",
            row.tag.run_id.as_deref().unwrap_or("-"),
            row.tag.turn.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
            row.tag.house.as_deref().unwrap_or("-"),
            row.value,
            row.deviation
        );
    }
    if report.rows.len() > limit {
        println!("  ... and {} more", report.rows.len() - limit);
    }
}

fn status_badge(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::CriticalFail => "CRITICAL",
        CheckStatus::NotImplemented => "N/A",
    }
}

fn print_gap_report(report: &balance_core::GapReport) {
    println!("{}", "=".repeat(70));
    println!("GAP ANALYSIS");
    println!("{}", "=".repeat(70));

    for check in &report.checks {
        println!("[{:^8}] {}  (target: {})", status_badge(check.status), check.name, check.target);
        for (metric, value) in &check.measured {
            println!("           {metric} = {value}");
        }
        if let Some(note) = &check.note {
            println!("           note: {note}");
        }
    }

    if !report.anomalies.is_empty() {
        println!("{}", "-".repeat(70));
        println!("ANOMALIES");
        for anomaly in &report.anomalies {
            println!(
                "[{:^8}] {}: {}",
                format!("{:?}", anomaly.severity).to_uppercase(),
                anomaly.kind,
                anomaly.description
            );
        }
    }

    println!("{}", "=".repeat(70));
    let s = &report.summary;
    println!(
        "Checks: {} run, {} passed, {} failed, {} n/a; anomalies: {} errors, {} warnings",
        s.checks_run, s.checks_passed, s.checks_failed, s.checks_not_implemented,
        s.anomaly_errors, s.anomaly_warnings
    );
    match report.overall {
        OverallStatus::AllSystemsNominal => println!("ALL SYSTEMS NOMINAL"),
        OverallStatus::IssuesFound => println!("ISSUES FOUND"),
    }
}

async fn run_session(config: RunnerConfig) -> Result<()> {
    println!("{}", "=".repeat(70));
    println!("EC4X PARALLEL BALANCE TEST");
    println!("{}", "=".repeat(70));
    println!("Simulator:        {}", config.simulator.display());
    println!("Parallel workers: {}", config.workers);
    println!("Total runs:       {}", config.total_runs);
    println!("Turns per run:    {}", config.turns_per_run);
    println!("{}", "=".repeat(70));

    let plan = BatchPlan::partition(config.total_runs, config.workers, config.base_seed)?;
    let invoker = Arc::new(SimulatorInvoker::new(config.simulator_config()));
    let outcome = run_parallel(invoker, plan, config.collapse_floor).await;

    print_batch_summary(&outcome.summary, outcome.elapsed_seconds);

    let turns = config.turns_per_run;
    let artifact = BatchArtifact::from_outcome(outcome, turns);
    let path = artifact.write(&config.output_dir)?;
    println!("\nDetailed results saved to: {}", path.display());
    Ok(())
}

fn print_batch_summary(summary: &BatchSummary, elapsed_seconds: f64) {
    let completed = summary.runs_completed;

    println!("\n{}", "=".repeat(70));
    println!("PARALLEL BALANCE TEST SUMMARY");
    println!("{}", "=".repeat(70));
    println!("Completed runs: {completed}");
    println!("Failed runs:    {}", summary.runs_failed);
    println!("Drawn runs:     {}", summary.drawn_runs);
    println!("Elapsed:        {elapsed_seconds:.1}s");
    println!("{}", "-".repeat(70));
    println!("{:<22} {:>12} {:>12} {:>10}", "House", "Avg Score", "Win Rate", "Collapses");
    println!("{}", "-".repeat(70));

    // sort houses by average score, best first
    let mut houses: Vec<&String> = summary.score_totals.keys().collect();
    houses.sort_by(|a, b| {
        let avg = |h: &str| summary.score_totals[h] as f64 / completed.max(1) as f64;
        avg(b).partial_cmp(&avg(a)).unwrap_or(std::cmp::Ordering::Equal)
    });

    for house in houses {
        let avg = summary.score_totals[house] as f64 / completed.max(1) as f64;
        let wins = summary.win_counts.get(house).copied().unwrap_or(0);
        let win_rate = wins as f64 / completed.max(1) as f64 * 100.0;
        let collapses = summary.collapse_counts.get(house).copied().unwrap_or(0);
        println!("{house:<22} {avg:>12.1} {wins:>4} ({win_rate:>4.1}%) {collapses:>10}");
    }
    println!("{}", "=".repeat(70));
}
