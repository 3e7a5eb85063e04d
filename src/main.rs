//! StructCompare - batch structural comparison of service responses
//!
//! A standalone executable for regression and release-gate testing:
//! - Folder compare: two directories of XML/JSON documents, paired by
//!   relative path and structurally compared against a declared model
//! - Request replay: one request corpus POSTed to two endpoints, responses
//!   persisted and compared
//! - Cross-file pattern analysis with a ranked, criticality-flagged output
//!
//! Exit codes: 0 all equal, 2 differences found, 1 operational failure,
//! 130 cancelled.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use struct_compare::error::CompareError;
use struct_compare::export::export_all;
use struct_compare::model::ModelRegistry;
use struct_compare::patterns::group_display_patterns;
use struct_compare::progress::{CancellationToken, JobProgress, ProgressEvent, ProgressSink};
use struct_compare::replay::{reap_old_jobs, run_replay_job, ReplayJobConfig};
use struct_compare::types::{Category5, MultiFolderComparisonResult, PatternAnalysis, RulesDocument};
use struct_compare::{
    ensure_results_dir, generate_job_id, ComparisonEngine, ComparisonRun, FolderCompareOptions,
};

/// StructCompare - batch structural comparison of service responses
#[derive(Parser)]
#[command(name = "StructCompare")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two folders of structured documents
    Compare {
        /// Folder with the expected documents
        dir_a: PathBuf,

        /// Folder with the actual documents
        dir_b: PathBuf,

        /// Model declarations file (JSON)
        #[arg(long)]
        models: Option<PathBuf>,

        /// Model name to compare against (raw-text compare when omitted)
        #[arg(short, long)]
        model: Option<String>,

        /// Rules document (JSON)
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Include files present on only one side as error pairs
        #[arg(long)]
        include_all: bool,

        /// Exclude patterns (glob syntax, e.g. "*.tmp")
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,

        /// Regex masked out of raw-text comparison
        #[arg(long)]
        mask: Option<String>,

        /// Base directory for results
        #[arg(short = 'B', long, default_value = "results")]
        results_base: PathBuf,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Replay a request corpus against two endpoints and compare responses
    Replay {
        /// Baseline endpoint URL
        endpoint_a: String,

        /// Candidate endpoint URL
        endpoint_b: String,

        /// Directory of request payloads
        #[arg(short, long)]
        batch: PathBuf,

        /// Model declarations file (JSON)
        #[arg(long)]
        models: Option<PathBuf>,

        /// Model name to compare against (raw-text compare when omitted)
        #[arg(short, long)]
        model: Option<String>,

        /// Rules document (JSON)
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Shared deadline per request pair, in milliseconds
        #[arg(long, default_value = "30000")]
        timeout_ms: u64,

        /// Maximum requests in flight (defaults to the core count)
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Global header for endpoint A ("Name: Value", repeatable)
        #[arg(long = "header-a")]
        headers_a: Vec<String>,

        /// Global header for endpoint B ("Name: Value", repeatable)
        #[arg(long = "header-b")]
        headers_b: Vec<String>,

        /// Regex masked out of raw-text comparison
        #[arg(long)]
        mask: Option<String>,

        /// Base directory for results
        #[arg(short = 'B', long, default_value = "results")]
        results_base: PathBuf,

        /// Root for per-job response directories
        #[arg(long)]
        jobs_root: Option<PathBuf>,

        /// Reap job directories older than this many hours before running
        #[arg(long, default_value = "24")]
        reap_hours: u64,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize logger (controlled by RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(all_equal) => {
            if all_equal {
                0
            } else {
                2
            }
        }
        Err(e) => {
            if matches!(e.downcast_ref::<CompareError>(), Some(CompareError::Cancelled)) {
                eprintln!("{}", style("Cancelled").yellow().bold());
                130
            } else {
                eprintln!("{} {:#}", style("Error:").red().bold(), e);
                1
            }
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Commands::Compare {
            dir_a,
            dir_b,
            models,
            model,
            rules,
            include_all,
            exclude,
            mask,
            results_base,
            verbose,
        } => {
            let registry = load_registry(models.as_deref())?;
            let rules_document = load_rules(rules.as_deref())?;
            let engine = ComparisonEngine::new(
                &registry,
                model.as_deref(),
                &rules_document,
                mask.as_deref(),
            )?;

            println!("{}", style("StructCompare").cyan().bold());
            println!("{}", style("═".repeat(60)).dim());

            let job_id =
                generate_job_id(&format!("{}|{}", dir_a.display(), dir_b.display()));
            let token = spawn_cancel_handler();
            let bar = create_progress_bar();
            let sink = IndicatifProgressSink { bar: bar.clone() };
            let progress = JobProgress::new(&job_id, &sink);

            let options = FolderCompareOptions {
                include_all,
                exclude_patterns: exclude,
            };
            let run = tokio::task::block_in_place(|| {
                engine.run_folder_compare(&dir_a, &dir_b, &options, &job_id, &progress, &token)
            })?;
            bar.finish_and_clear();

            finish_run(&run, &job_id, &results_base, verbose)
        }

        Commands::Replay {
            endpoint_a,
            endpoint_b,
            batch,
            models,
            model,
            rules,
            timeout_ms,
            max_concurrency,
            headers_a,
            headers_b,
            mask,
            results_base,
            jobs_root,
            reap_hours,
            verbose,
        } => {
            let registry = load_registry(models.as_deref())?;
            let rules_document = load_rules(rules.as_deref())?;
            let engine = ComparisonEngine::new(
                &registry,
                model.as_deref(),
                &rules_document,
                mask.as_deref(),
            )?;

            println!("{}", style("StructCompare").cyan().bold());
            println!("{}", style("═".repeat(60)).dim());
            println!(
                "  {} {}",
                style("A:").dim(),
                style(&endpoint_a).white()
            );
            println!(
                "  {} {}",
                style("B:").dim(),
                style(&endpoint_b).white()
            );

            let mut config = ReplayJobConfig::new(&endpoint_a, &endpoint_b, &batch);
            config.timeout = Duration::from_millis(timeout_ms);
            if let Some(limit) = max_concurrency {
                config.max_concurrency = limit;
            }
            config.headers_a = parse_headers(&headers_a)?;
            config.headers_b = parse_headers(&headers_b)?;
            if let Some(root) = jobs_root {
                config.jobs_root = root;
            }

            // Clean up what older cancelled jobs left behind
            match reap_old_jobs(&config.jobs_root, Duration::from_secs(reap_hours * 3600)) {
                Ok(0) => {}
                Ok(n) => println!("  Reaped {} stale job directories", style(n).yellow()),
                Err(e) => log::warn!("Job reaper failed: {:#}", e),
            }

            let job_id = generate_job_id(&format!("{}|{}", endpoint_a, endpoint_b));
            let token = spawn_cancel_handler();
            let bar = create_progress_bar();
            let sink = IndicatifProgressSink { bar: bar.clone() };
            let progress = JobProgress::new(&job_id, &sink);

            let run = run_replay_job(&config, &engine, &job_id, &progress, &token).await?;
            bar.finish_and_clear();

            finish_run(&run, &job_id, &results_base, verbose)
        }
    }
}

/// Export, display, and reduce a completed run to its exit verdict
fn finish_run(
    run: &ComparisonRun,
    job_id: &str,
    results_base: &Path,
    verbose: bool,
) -> Result<bool> {
    let run_dir = ensure_results_dir(results_base, job_id)?;
    let paths = export_all(&run.result, &run.analysis, &run_dir)?;

    display_summary(&run.result, &run.analysis, verbose);
    println!(
        "\n  {} {}",
        style("Results:").dim(),
        style(paths.result_json.display()).white()
    );
    Ok(run.result.all_equal)
}

fn load_registry(path: Option<&Path>) -> Result<ModelRegistry> {
    match path {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("Failed to read model declarations {}", path.display()))?;
            Ok(ModelRegistry::from_declarations(&bytes)?)
        }
        None => Ok(ModelRegistry::new()),
    }
}

fn load_rules(path: Option<&Path>) -> Result<RulesDocument> {
    match path {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("Failed to read rules document {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("Malformed rules document {}", path.display()))
        }
        None => Ok(RulesDocument::default()),
    }
}

/// Parse repeated "Name: Value" header flags
fn parse_headers(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("Header '{}' is not in 'Name: Value' form", entry))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

/// Cancel the job on Ctrl-C; a second Ctrl-C kills the process
fn spawn_cancel_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", style("Cancelling...").yellow());
            handler_token.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
    token
}

fn create_progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("  [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );
    bar
}

/// Progress sink that drives the console progress bar
struct IndicatifProgressSink {
    bar: ProgressBar,
}

impl ProgressSink for IndicatifProgressSink {
    fn publish(&self, event: &ProgressEvent) -> Result<()> {
        self.bar.set_position(event.percent_complete.round() as u64);
        self.bar.set_message(event.message.clone());
        Ok(())
    }
}

fn display_summary(
    result: &MultiFolderComparisonResult,
    analysis: &PatternAnalysis,
    verbose: bool,
) {
    println!();
    if result.all_equal {
        println!(
            "{} All {} pairs are equal",
            style("✓").green().bold(),
            style(result.total_pairs).green()
        );
        return;
    }

    let errors = result
        .file_pair_results
        .iter()
        .filter(|r| r.is_error())
        .count();
    println!(
        "{} {} of {} pairs differ ({} errors)",
        style("✗").red().bold(),
        style(analysis.files_with_differences).red(),
        style(result.total_pairs).white(),
        style(errors).yellow()
    );

    // File classification coverage
    let mut coverage = Table::new();
    coverage
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    coverage.set_header(vec![
        Cell::new("Failure class").fg(Color::Cyan),
        Cell::new("Files").fg(Color::Cyan),
    ]);
    for bucket in Category5::all() {
        let count = analysis
            .file_classification
            .counts
            .get(&bucket)
            .copied()
            .unwrap_or(0);
        if count > 0 {
            coverage.add_row(vec![
                Cell::new(format!("{:?}", bucket)),
                Cell::new(count).fg(Color::Yellow),
            ]);
        }
    }
    println!("{coverage}");

    // Ranked patterns
    let limit = if verbose { 25 } else { 8 };
    if !analysis.all_patterns.is_empty() {
        println!();
        println!(
            "  {} ({} total, {} critical)",
            style("Top structural patterns").yellow().bold(),
            analysis.all_patterns.len(),
            analysis.critical_count
        );

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS);
        table.set_header(vec![
            Cell::new("Pattern").fg(Color::Cyan),
            Cell::new("Files").fg(Color::Cyan),
            Cell::new("Occurrences").fg(Color::Cyan),
            Cell::new("Consistency").fg(Color::Cyan),
            Cell::new("Critical").fg(Color::Cyan),
        ]);
        for pattern in analysis.all_patterns.iter().take(limit) {
            let critical_cell = if pattern.is_critical {
                Cell::new("yes").fg(Color::Red)
            } else {
                Cell::new("no").fg(Color::White)
            };
            table.add_row(vec![
                Cell::new(truncate_value(&pattern.full_pattern, 48)),
                Cell::new(pattern.file_count),
                Cell::new(pattern.occurrence_count),
                Cell::new(format!("{:.0}%", pattern.consistency)),
                critical_cell,
            ]);
        }
        println!("{table}");

        if verbose {
            println!();
            println!("  {}", style("Pattern details").yellow().bold());
            for group in group_display_patterns(&analysis.all_patterns) {
                println!("  {}", style(&group.prefix).cyan());
                for member in &group.members {
                    if let Some(pattern) =
                        analysis.all_patterns.iter().find(|p| p.full_pattern == *member)
                    {
                        println!(
                            "    {} {}",
                            style("·").dim(),
                            pattern.human_readable_description
                        );
                        println!(
                            "      {}",
                            style(&pattern.recommended_action).dim()
                        );
                    }
                }
            }
        }
    }

    // Sample differences from the worst pairs
    if verbose {
        println!();
        println!("  {}", style("Sample differences").yellow().bold());
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS);
        table.set_header(vec![
            Cell::new("Pair").fg(Color::Cyan),
            Cell::new("Path").fg(Color::Cyan),
            Cell::new("Expected").fg(Color::Red),
            Cell::new("Actual").fg(Color::Green),
        ]);
        let mut shown = 0;
        for pair in &result.file_pair_results {
            if shown >= 12 {
                break;
            }
            for diff in pair.differences.iter().take(3) {
                if shown >= 12 {
                    break;
                }
                table.add_row(vec![
                    Cell::new(truncate_value(&pair.file_a_name, 22)),
                    Cell::new(truncate_value(&diff.property_path, 32)),
                    Cell::new(truncate_value(
                        diff.expected_value.as_deref().unwrap_or("∅"),
                        20,
                    ))
                    .fg(Color::Red),
                    Cell::new(truncate_value(
                        diff.actual_value.as_deref().unwrap_or("∅"),
                        20,
                    ))
                    .fg(Color::Green),
                ]);
                shown += 1;
            }
        }
        println!("{table}");
    }

    // Error list
    let error_pairs: Vec<_> = result
        .file_pair_results
        .iter()
        .filter(|r| r.is_error())
        .collect();
    if !error_pairs.is_empty() {
        println!();
        println!("  {}", style("Errors").yellow().bold());
        for pair in error_pairs.iter().take(if verbose { 50 } else { 5 }) {
            println!(
                "  {} {}: {}",
                style(truncate_value(&pair.file_a_name, 30)).dim(),
                style(pair.error_kind.as_deref().unwrap_or("?")).yellow(),
                style(pair.error.as_deref().unwrap_or("")).red()
            );
        }
    }
}

/// Truncate a value for display, preserving meaning
fn truncate_value(value: &str, max_len: usize) -> String {
    let trimmed = value.trim();
    if trimmed.chars().count() <= max_len {
        trimmed.to_string()
    } else {
        let kept: String = trimmed.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
