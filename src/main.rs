//! DocReview - concurrent document review
//!
//! A CLI tool that runs several independent analyses of a markdown
//! document at once (evidence checking, proofreading, structure) under
//! per-task and overall timeouts, and merges whatever finished into one
//! report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (invalid document, config, backend setup, etc.)
//!   2 - Score below --fail-below, or an analysis failed under --fail-fast

mod analysis;
mod cli;
mod collaborator;
mod config;
mod coordinator;
mod error;
mod models;
mod progress;
mod report;

use analysis::AggregationOptions;
use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::Config;
use coordinator::TaskCoordinator;
use models::{Document, TaskStatus, TaskSummary};
use progress::{status_emoji, ProgressRenderer, ProgressTracker};
use report::ReportOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("DocReview v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_review(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Review failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .docreview.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(config::DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            config::DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", config::DEFAULT_CONFIG_FILE))?;

    println!(
        "✅ Created {} with default settings.",
        config::DEFAULT_CONFIG_FILE
    );
    println!("   Edit it to customize timeouts, backend, enabled analyses, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete review workflow. Returns the exit code (0 or 2).
async fn run_review(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    // Step 1: Load the document
    let document_path = args.document_path();
    println!("📄 Loading document: {}", document_path.display());
    let document = Document::load(document_path, config.document.max_size_bytes)
        .with_context(|| format!("Failed to load document {}", document_path.display()))?;
    let document = Arc::new(document);
    info!(
        "Loaded \"{}\": {} lines, {} words",
        document.title, document.line_count, document.word_count
    );

    // Step 2: Build the collaborators
    let collaborators = collaborator::build_collaborators(&config)?;
    let policy = config.coordination_policy();

    println!("🤖 Running {} analyses:", collaborators.len());
    for c in &collaborators {
        println!("   - {} ({})", c.kind, c.analyzer.name());
    }
    println!(
        "   Timeouts: {:?} per analysis, {:?} overall{}",
        policy.per_task_timeout,
        policy.overall_timeout,
        if policy.failure_tolerant {
            ""
        } else {
            ", fail-fast"
        }
    );

    // Step 3: Coordinate, with live progress
    let tracker = Arc::new(ProgressTracker::new(
        collaborators.iter().map(|c| c.kind.label().to_string()),
    ));

    let renderer = if args.show_progress() {
        Some(ProgressRenderer::start(
            Arc::clone(&tracker),
            config.progress_interval(),
        ))
    } else {
        if !args.quiet {
            tracker.subscribe(|event| {
                if event.status.is_terminal() {
                    println!(
                        "   {} {}: {}",
                        status_emoji(event.status),
                        event.stage_id,
                        event.message
                    );
                }
            });
        }
        None
    };

    let coordinator = TaskCoordinator::new(Arc::clone(&tracker));
    let outcome = coordinator
        .coordinate(Arc::clone(&document), &collaborators, &policy)
        .await;

    if let Some(renderer) = renderer {
        renderer.stop().await;
    }
    let result = outcome?;

    let progress = tracker.summary();
    debug!(
        "Progress at end of run: {:.0}% over {} stages after {:?} {:?}",
        progress.overall_percentage,
        progress.stages.len(),
        progress.elapsed,
        tracker.percentages()
    );
    for task in result.degraded() {
        warn!(
            "{} analysis {}: {}",
            task.kind,
            task.status,
            task.error_detail.as_deref().unwrap_or("no detail")
        );
    }

    // Step 4: Aggregate and write the report
    let options = AggregationOptions {
        max_priority_actions: config.report.max_priority_actions,
        document_title: Some(document.title.clone()),
    };
    let integrated = analysis::aggregate_with(&result.tasks, &options);

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&integrated, &result.tasks)?,
        OutputFormat::Markdown => report::generate_markdown_report(
            &integrated,
            &result.tasks,
            &document,
            &ReportOptions::from(&config.report),
        ),
    };

    let output_path = PathBuf::from(&config.general.output);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    println!("\n📊 Review Summary:");
    println!("   Overall score: {:.0}%", integrated.overall_score * 100.0);
    println!(
        "   Analyses completed: {}/{}",
        result.count(TaskStatus::Completed),
        integrated.total_tasks()
    );
    if let Some(reason) = result.early_stop_reason() {
        println!("   ⚠️  Stopped early: {}", reason);
    }
    for (kind, summary) in &integrated.per_task_summaries {
        match summary {
            TaskSummary::Succeeded {
                score, issue_count, ..
            } => println!(
                "   {} {}: {:.0}%, {} issues",
                status_emoji(TaskStatus::Completed),
                kind,
                score * 100.0,
                issue_count
            ),
            TaskSummary::Degraded { status, reason } => {
                println!("   {} {}: {} ({})", status_emoji(*status), kind, status, reason)
            }
        }
    }
    println!("   Priority actions: {}", integrated.priority_actions.len());
    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());
    println!(
        "\n✅ Review complete! Report saved to: {}",
        output_path.display()
    );

    if integrated.degraded {
        warn!("{}", integrated.executive_summary);
    }

    // Check --fail-fast and --fail-below
    if !policy.failure_tolerant && !result.all_succeeded {
        eprintln!("\n⛔ An analysis did not complete in fail-fast mode. Failing (exit code 2).");
        return Ok(2);
    }

    if let Some(threshold) = args.fail_below {
        if integrated.overall_score < threshold {
            eprintln!(
                "\n⛔ Overall score {:.2} is below {:.2}. Failing (exit code 2).",
                integrated.overall_score, threshold
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", config::DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
