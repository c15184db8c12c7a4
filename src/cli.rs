//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Options left unset fall back to the config file.

use crate::config::Backend;
use clap::Parser;
use std::path::{Path, PathBuf};

/// DocReview - concurrent document review
///
/// Runs evidence checking, proofreading and structure checks on a
/// markdown document in parallel and merges them into one report with a
/// quality score and a prioritized action list.
///
/// Examples:
///   docreview README.md
///   docreview paper.md --backend ollama --model llama3.2:latest
///   docreview notes.md --only evidence,proofreading --format json -o review.json
///   docreview draft.md --task-timeout 20 --fail-fast --fail-below 0.7
///   docreview --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Markdown document to review
    #[arg(value_name = "FILE", required_unless_present = "init_config")]
    pub document: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .docreview.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Timeout for a single analysis, in seconds
    #[arg(long, value_name = "SECS")]
    pub task_timeout: Option<u64>,

    /// Timeout for the whole review, in seconds
    #[arg(long, value_name = "SECS")]
    pub overall_timeout: Option<u64>,

    /// Cancel the remaining analyses as soon as one fails
    ///
    /// Exit code 2 when any analysis did not complete.
    #[arg(long)]
    pub fail_fast: bool,

    /// Analysis backend
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<Backend>,

    /// Analyses to run (comma-separated)
    ///
    /// Example: --only evidence,report
    #[arg(long, value_name = "KINDS", value_delimiter = ',')]
    pub only: Option<Vec<String>>,

    /// Ollama model to use with the ollama backend
    #[arg(short, long, env = "DOCREVIEW_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Disable the live progress display
    #[arg(long)]
    pub no_progress: bool,

    /// Fail if the overall score is below this value (0.0 - 1.0)
    ///
    /// Useful for CI pipelines. Exit code 2 when the score is lower.
    #[arg(long, value_name = "SCORE")]
    pub fail_below: Option<f64>,

    /// Generate a default .docreview.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The document path; empty when only `--init-config` was given.
    pub fn document_path(&self) -> &Path {
        self.document.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        let document = self.document_path();
        if !document.exists() {
            return Err(format!("Document does not exist: {}", document.display()));
        }
        if !document.is_file() {
            return Err(format!("Document is not a file: {}", document.display()));
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.task_timeout == Some(0) || self.overall_timeout == Some(0) {
            return Err("Timeouts must be at least 1 second".to_string());
        }

        if let Some(score) = self.fail_below {
            if !(0.0..=1.0).contains(&score) {
                return Err("--fail-below must be between 0.0 and 1.0".to_string());
            }
        }

        if let Some(ref only) = self.only {
            if only.iter().all(|kind| kind.trim().is_empty()) {
                return Err("--only needs at least one analysis".to_string());
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Whether the live progress bars should be drawn.
    pub fn show_progress(&self) -> bool {
        !self.no_progress && !self.quiet
    }
}
