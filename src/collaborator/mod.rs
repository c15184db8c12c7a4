//! Analysis collaborators.
//!
//! A collaborator is anything that can turn a [`Document`] into an
//! [`AnalysisOutput`] asynchronously. The coordinator schedules every
//! collaborator the same way, whatever backend it uses.

pub mod heuristic;
pub mod ollama;

use crate::config::{Backend, Config};
use crate::error::{ReviewError, ReviewResult};
use crate::models::{AnalysisOutput, Document, TaskKind};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use heuristic::{EvidenceHeuristic, ProofreadingHeuristic, StructureHeuristic};
pub use ollama::{OllamaAnalyzer, OllamaSettings};

/// The analysis capability.
///
/// Implementations must not mutate the document and must be safe to run
/// concurrently with other analyzers.
///
/// # Cancellation
///
/// `cancel` fires when the task's deadline passes or a sibling fails in
/// fail-fast mode. The coordinator also drops the returned future at that
/// point, which stops any work driven by it. Work the analyzer moved off the
/// future (`spawn_blocking`, detached tasks, child processes) keeps running
/// unless it watches `cancel` itself; such work leaks until it finishes.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        document: &Document,
        cancel: CancellationToken,
    ) -> ReviewResult<AnalysisOutput>;
}

/// A task kind bound to the analyzer that performs it.
#[derive(Clone)]
pub struct Collaborator {
    pub kind: TaskKind,
    pub analyzer: Arc<dyn Analyzer>,
}

impl Collaborator {
    pub fn new(kind: TaskKind, analyzer: impl Analyzer + 'static) -> Self {
        Self {
            kind,
            analyzer: Arc::new(analyzer),
        }
    }
}

impl fmt::Debug for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborator")
            .field("kind", &self.kind)
            .field("analyzer", &self.analyzer.name())
            .finish()
    }
}

/// Build the collaborator list selected by configuration.
///
/// Kinds are returned in the order they appear in `collaborators.enabled`.
/// The report structure check has no LLM form and always uses the
/// heuristic analyzer.
pub fn build_collaborators(config: &Config) -> ReviewResult<Vec<Collaborator>> {
    let mut collaborators = Vec::new();

    for name in &config.collaborators.enabled {
        let kind = TaskKind::from(name.as_str());
        let collaborator = match (&kind, config.collaborators.backend) {
            (TaskKind::Evidence, Backend::Heuristic) => {
                Collaborator::new(kind.clone(), EvidenceHeuristic::default())
            }
            (TaskKind::Proofreading, Backend::Heuristic) => {
                Collaborator::new(kind.clone(), ProofreadingHeuristic::default())
            }
            (TaskKind::Evidence, Backend::Ollama) | (TaskKind::Proofreading, Backend::Ollama) => {
                let settings = OllamaSettings::from(&config.model);
                Collaborator::new(kind.clone(), OllamaAnalyzer::new(kind.clone(), settings)?)
            }
            (TaskKind::Report, _) => Collaborator::new(kind.clone(), StructureHeuristic::default()),
            (TaskKind::Custom(other), _) => {
                return Err(ReviewError::Config(format!(
                    "unknown collaborator '{}' (expected evidence, proofreading or report)",
                    other
                )));
            }
        };
        collaborators.push(collaborator);
    }

    if collaborators.is_empty() {
        return Err(ReviewError::Config(
            "no collaborators enabled in [collaborators].enabled".to_string(),
        ));
    }

    info!(
        "Using {:?} backend with collaborators: {}",
        config.collaborators.backend,
        collaborators
            .iter()
            .map(|c| c.kind.label().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(collaborators)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_heuristic_collaborators() {
        let config = Config::default();
        let collaborators = build_collaborators(&config).unwrap();
        let kinds: Vec<_> = collaborators.iter().map(|c| c.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![TaskKind::Evidence, TaskKind::Proofreading, TaskKind::Report]
        );
        assert_eq!(collaborators[0].analyzer.name(), "evidence-heuristic");
    }

    #[test]
    fn test_build_ollama_collaborators() {
        let mut config = Config::default();
        config.collaborators.backend = Backend::Ollama;
        let collaborators = build_collaborators(&config).unwrap();
        assert_eq!(collaborators[0].analyzer.name(), "evidence-ollama");
        assert_eq!(collaborators[1].analyzer.name(), "proofreading-ollama");
        assert_eq!(collaborators[2].analyzer.name(), "structure-heuristic");
    }

    #[test]
    fn test_unknown_collaborator_rejected() {
        let mut config = Config::default();
        config.collaborators.enabled = vec!["evidence".to_string(), "tone".to_string()];
        let err = build_collaborators(&config).unwrap_err();
        assert!(err.to_string().contains("tone"));
    }

    #[test]
    fn test_empty_selection_rejected() {
        let mut config = Config::default();
        config.collaborators.enabled.clear();
        assert!(build_collaborators(&config).is_err());
    }
}
