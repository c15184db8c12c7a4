//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.docreview.toml` files.

use crate::coordinator::CoordinationPolicy;
use crate::error::{ReviewError, ReviewResult};
use crate::models::DEFAULT_MAX_DOCUMENT_BYTES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".docreview.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Timeouts and failure policy.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Input document limits.
    #[serde(default)]
    pub document: DocumentConfig,

    /// Which analyses run and on what backend.
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,

    /// Model settings for the Ollama backend.
    #[serde(default)]
    pub model: ModelConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> String {
    "review_report.md".to_string()
}

/// Coordination policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound for one analysis, in milliseconds.
    #[serde(default = "default_per_task_timeout_ms")]
    pub per_task_timeout_ms: u64,

    /// Upper bound for the whole review, in milliseconds.
    #[serde(default = "default_overall_timeout_ms")]
    pub overall_timeout_ms: u64,

    /// Keep going when an analysis fails.
    #[serde(default = "default_true")]
    pub failure_tolerant: bool,

    /// Progress display refresh interval, in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            per_task_timeout_ms: default_per_task_timeout_ms(),
            overall_timeout_ms: default_overall_timeout_ms(),
            failure_tolerant: true,
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

fn default_per_task_timeout_ms() -> u64 {
    30_000
}

fn default_overall_timeout_ms() -> u64 {
    60_000
}

fn default_progress_interval_ms() -> u64 {
    500
}

/// Document settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Maximum document size in bytes.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

fn default_max_size_bytes() -> usize {
    DEFAULT_MAX_DOCUMENT_BYTES
}

/// Analysis backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Local rule-based checks, no network
    #[default]
    Heuristic,
    /// LLM checks through an Ollama server
    Ollama,
}

/// Collaborator selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Analyses to run, in order.
    #[serde(default = "default_enabled")]
    pub enabled: Vec<String>,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            enabled: default_enabled(),
        }
    }
}

fn default_enabled() -> Vec<String> {
    vec!["evidence", "proofreading", "report"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    120
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Maximum number of priority actions.
    #[serde(default = "default_max_priority_actions")]
    pub max_priority_actions: usize,

    /// Include individual findings in the markdown report.
    #[serde(default = "default_true")]
    pub include_findings: bool,

    /// Maximum findings listed per analysis.
    #[serde(default = "default_max_findings_per_task")]
    pub max_findings_per_task: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_priority_actions: default_max_priority_actions(),
            include_findings: true,
            max_findings_per_task: default_max_findings_per_task(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_priority_actions() -> usize {
    crate::analysis::DEFAULT_MAX_PRIORITY_ACTIONS
}

fn default_max_findings_per_task() -> usize {
    20
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence, but only when given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(secs) = args.task_timeout {
            self.coordinator.per_task_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(secs) = args.overall_timeout {
            self.coordinator.overall_timeout_ms = secs.saturating_mul(1000);
        }
        if args.fail_fast {
            self.coordinator.failure_tolerant = false;
        }

        if let Some(backend) = args.backend {
            self.collaborators.backend = backend;
        }
        if let Some(ref only) = args.only {
            self.collaborators.enabled = only.clone();
        }

        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> ReviewResult<()> {
        if self.coordinator.per_task_timeout_ms == 0 || self.coordinator.overall_timeout_ms == 0 {
            return Err(ReviewError::Config("timeouts must be positive".to_string()));
        }
        if self.coordinator.progress_interval_ms == 0 {
            return Err(ReviewError::Config(
                "progress_interval_ms must be positive".to_string(),
            ));
        }
        if self.document.max_size_bytes == 0 {
            return Err(ReviewError::Config(
                "max_size_bytes must be positive".to_string(),
            ));
        }
        if self.collaborators.enabled.is_empty() {
            return Err(ReviewError::Config(
                "at least one collaborator must be enabled".to_string(),
            ));
        }
        if self.report.max_priority_actions == 0 {
            return Err(ReviewError::Config(
                "max_priority_actions must be at least 1".to_string(),
            ));
        }
        if self.collaborators.backend == Backend::Ollama {
            if !(0.0..=1.0).contains(&self.model.temperature) {
                return Err(ReviewError::Config(
                    "temperature must be between 0.0 and 1.0".to_string(),
                ));
            }
            if !self.model.ollama_url.starts_with("http://")
                && !self.model.ollama_url.starts_with("https://")
            {
                return Err(ReviewError::Config(
                    "Ollama URL must start with 'http://' or 'https://'".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn coordination_policy(&self) -> CoordinationPolicy {
        let policy = CoordinationPolicy::new(
            Duration::from_millis(self.coordinator.per_task_timeout_ms),
            Duration::from_millis(self.coordinator.overall_timeout_ms),
        );
        if self.coordinator.failure_tolerant {
            policy
        } else {
            policy.fail_fast()
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.coordinator.progress_interval_ms)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.model.name, "llama3.2:latest");
        assert_eq!(config.coordinator.per_task_timeout_ms, 30_000);
        assert_eq!(config.coordinator.overall_timeout_ms, 60_000);
        assert!(config.coordinator.failure_tolerant);
        assert_eq!(config.document.max_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.collaborators.backend, Backend::Heuristic);
        assert_eq!(config.report.max_priority_actions, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "custom_report.md"

[coordinator]
per_task_timeout_ms = 5000
failure_tolerant = false

[collaborators]
backend = "ollama"
enabled = ["evidence"]

[model]
name = "qwen2.5:14b"
temperature = 0.2
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "custom_report.md");
        assert_eq!(config.coordinator.per_task_timeout_ms, 5000);
        assert_eq!(config.coordinator.overall_timeout_ms, 60_000);
        assert!(!config.coordinator.failure_tolerant);
        assert_eq!(config.collaborators.backend, Backend::Ollama);
        assert_eq!(config.collaborators.enabled, vec!["evidence"]);
        assert_eq!(config.model.name, "qwen2.5:14b");
        assert_eq!(config.model.temperature, 0.2);

        let policy = config.coordination_policy();
        assert_eq!(policy.per_task_timeout, Duration::from_secs(5));
        assert!(!policy.failure_tolerant);
    }

    #[test]
    fn test_default_toml_round_trips() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[coordinator]"));
        assert!(toml_str.contains("[collaborators]"));
        assert!(toml_str.contains("backend = \"heuristic\""));
        // Log level comes from the command line only.
        assert!(!toml_str.contains("verbose"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.collaborators.enabled.len(), 3);
        assert_eq!(parsed.coordinator.progress_interval_ms, 500);
    }

    #[test]
    fn test_merge_with_args() {
        let args = Args::try_parse_from([
            "docreview",
            "notes.md",
            "--task-timeout",
            "10",
            "--fail-fast",
            "--backend",
            "ollama",
            "--only",
            "evidence,report",
            "--model",
            "mistral:7b",
        ])
        .unwrap();

        let mut config = Config::default();
        config.merge_with_args(&args);

        assert_eq!(config.coordinator.per_task_timeout_ms, 10_000);
        assert_eq!(config.coordinator.overall_timeout_ms, 60_000);
        assert!(!config.coordinator.failure_tolerant);
        assert_eq!(config.collaborators.backend, Backend::Ollama);
        assert_eq!(config.collaborators.enabled, vec!["evidence", "report"]);
        assert_eq!(config.model.name, "mistral:7b");
    }

    #[test]
    fn test_older_general_keys_are_ignored() {
        let config: Config = toml::from_str("[general]\noutput = \"out.md\"\nverbose = true\n").unwrap();
        assert_eq!(config.general.output, "out.md");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.coordinator.overall_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collaborators.backend = Backend::Ollama;
        config.model.ollama_url = "localhost:11434".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collaborators.enabled.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[document]\nmax_size_bytes = 2048\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.document.max_size_bytes, 2048);

        std::fs::write(&path, "[document]\nmax_size_bytes = \"big\"\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
