//! Data models for the document reviewer.
//!
//! This module contains the core data structures shared by the
//! coordinator, the analysis collaborators and the aggregator:
//! documents, analysis tasks, findings, progress events and reports.

use crate::error::{ReviewError, ReviewResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Default upper bound for a document, 10 MiB.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;

/// Severity level of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity - wording nits, minor suggestions
    Low,
    /// Medium severity - style problems, weakly supported claims
    Medium,
    /// High severity - grammar errors, claims without evidence
    High,
    /// Critical severity - claims that look wrong or misleading
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }

    /// Lenient parse used for LLM output; unknown values map to `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

/// An immutable document handed to every collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Where the document came from.
    pub path: PathBuf,
    /// Full text content.
    pub content: String,
    /// Size of the content in bytes.
    pub size_bytes: usize,
    /// Text encoding; only UTF-8 is accepted.
    pub encoding: String,
    /// First markdown heading, or "Untitled".
    pub title: String,
    /// Number of lines.
    pub line_count: usize,
    /// Number of whitespace separated words.
    pub word_count: usize,
}

impl Document {
    /// Build a validated document from in-memory content.
    pub fn new(
        path: impl Into<PathBuf>,
        content: impl Into<String>,
        max_size_bytes: usize,
    ) -> ReviewResult<Self> {
        let path = path.into();
        let content = content.into();
        let size_bytes = content.len();

        if path.as_os_str().is_empty() {
            return Err(ReviewError::Validation("document path is required".to_string()));
        }
        if size_bytes == 0 {
            return Err(ReviewError::Validation(format!(
                "document {} is empty",
                path.display()
            )));
        }
        if size_bytes > max_size_bytes {
            return Err(ReviewError::Validation(format!(
                "document {} is {} bytes, limit is {} bytes",
                path.display(),
                size_bytes,
                max_size_bytes
            )));
        }

        let title = content
            .lines()
            .find(|line| line.starts_with('#'))
            .map(|line| line.trim_start_matches('#').trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let line_count = content.lines().count();
        let word_count = content.split_whitespace().count();

        Ok(Self {
            path,
            content,
            size_bytes,
            encoding: "utf-8".to_string(),
            title,
            line_count,
            word_count,
        })
    }

    /// Read and validate a document from disk.
    pub fn load(path: &Path, max_size_bytes: usize) -> ReviewResult<Self> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(ReviewError::Validation(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        // Reject before reading huge files into memory.
        if metadata.len() > max_size_bytes as u64 {
            return Err(ReviewError::Validation(format!(
                "document {} is {} bytes, limit is {} bytes",
                path.display(),
                metadata.len(),
                max_size_bytes
            )));
        }

        let bytes = std::fs::read(path)?;
        let content = String::from_utf8(bytes).map_err(|_| {
            ReviewError::Validation(format!("document {} is not valid UTF-8", path.display()))
        })?;

        Self::new(path, content, max_size_bytes)
    }
}

/// Kind of analysis a task performs.
///
/// The derived ordering is the declaration order and is used as the
/// tie-breaker when ranking priority actions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskKind {
    /// Fact and evidence checking.
    Evidence,
    /// Grammar and style checking.
    Proofreading,
    /// Report structure synthesis.
    Report,
    /// Any other analysis registered by the caller.
    Custom(String),
}

impl TaskKind {
    /// Stable label, also used as the progress stage id.
    pub fn label(&self) -> &str {
        match self {
            TaskKind::Evidence => "evidence",
            TaskKind::Proofreading => "proofreading",
            TaskKind::Report => "report",
            TaskKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl From<&str> for TaskKind {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "evidence" => TaskKind::Evidence,
            "proofreading" | "proofread" => TaskKind::Proofreading,
            "report" => TaskKind::Report,
            other => TaskKind::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskKind {
    fn from(s: String) -> Self {
        TaskKind::from(s.as_str())
    }
}

impl From<TaskKind> for String {
    fn from(kind: TaskKind) -> Self {
        kind.label().to_string()
    }
}

/// Lifecycle state of an analysis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl TaskStatus {
    /// Whether this state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::TimedOut
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Category of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    /// A claim that was checked and holds. Informational only.
    VerifiedFact,
    /// A claim that looks doubtful.
    QuestionableClaim,
    /// A claim with no supporting source.
    MissingEvidence,
    /// Grammar or typo problem.
    Grammar,
    /// Style or consistency problem.
    Style,
    /// Document structure problem.
    Structure,
}

impl FindingCategory {
    /// Whether findings of this category call for an action.
    pub fn is_issue(&self) -> bool {
        !matches!(self, FindingCategory::VerifiedFact)
    }

    /// Lenient parse used for LLM output.
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "verified_fact" | "verified" => Some(FindingCategory::VerifiedFact),
            "questionable_claim" | "questionable" => Some(FindingCategory::QuestionableClaim),
            "missing_evidence" | "missing" => Some(FindingCategory::MissingEvidence),
            "grammar" | "typo" | "spelling" => Some(FindingCategory::Grammar),
            "style" => Some(FindingCategory::Style),
            "structure" => Some(FindingCategory::Structure),
            _ => None,
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingCategory::VerifiedFact => write!(f, "Verified fact"),
            FindingCategory::QuestionableClaim => write!(f, "Questionable claim"),
            FindingCategory::MissingEvidence => write!(f, "Missing evidence"),
            FindingCategory::Grammar => write!(f, "Grammar"),
            FindingCategory::Style => write!(f, "Style"),
            FindingCategory::Structure => write!(f, "Structure"),
        }
    }
}

/// A single observation produced by a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: Severity,
    pub message: String,
    /// 1-indexed line, when the collaborator can point at one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Finding {
    pub fn new(category: FindingCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            line: None,
            suggestion: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Structured result of one successful analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Quality signal in 0.0..=1.0 (confidence, readability, ...).
    pub score: f64,
    /// One-paragraph summary written by the collaborator.
    pub summary: String,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
}

impl AnalysisOutput {
    /// Number of findings that call for an action.
    pub fn issue_count(&self) -> usize {
        self.findings.iter().filter(|f| f.category.is_issue()).count()
    }

    /// Issue count per category, in category order.
    pub fn issues_by_category(&self) -> BTreeMap<FindingCategory, Vec<&Finding>> {
        let mut grouped: BTreeMap<FindingCategory, Vec<&Finding>> = BTreeMap::new();
        for finding in self.findings.iter().filter(|f| f.category.is_issue()) {
            grouped.entry(finding.category).or_default().push(finding);
        }
        grouped
    }
}

/// One invocation of a collaborator against a document.
///
/// Owned by the coordinator for the duration of a run. Transition methods
/// refuse to leave a terminal state and return `false` when ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl AnalysisTask {
    /// Create a pending task.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: TaskStatus::Pending,
            started_at: None,
            completed_at: None,
            result: None,
            error_detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn mark_running(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(at);
        true
    }

    pub fn complete(&mut self, output: AnalysisOutput, at: DateTime<Utc>) -> bool {
        self.finish(TaskStatus::Completed, Some(output), None, at)
    }

    pub fn fail(&mut self, detail: impl Into<String>, at: DateTime<Utc>) -> bool {
        self.finish(TaskStatus::Failed, None, Some(detail.into()), at)
    }

    pub fn time_out(&mut self, detail: impl Into<String>, at: DateTime<Utc>) -> bool {
        self.finish(TaskStatus::TimedOut, None, Some(detail.into()), at)
    }

    fn finish(
        &mut self,
        status: TaskStatus,
        result: Option<AnalysisOutput>,
        error_detail: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        self.result = result;
        self.error_detail = error_detail;
        self.completed_at = Some(at);
        true
    }

    /// Wall time between start and completion, if both are known.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }
}

/// A transient progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage_id: String,
    /// 0.0..=100.0
    pub percentage: f64,
    pub message: String,
    /// Stage status after this event.
    pub status: TaskStatus,
}

impl ProgressEvent {
    pub fn new(
        stage_id: impl Into<String>,
        percentage: f64,
        status: TaskStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            percentage: percentage.clamp(0.0, 100.0),
            message: message.into(),
            status,
        }
    }
}

/// Effort estimate for a priority action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effort::Low => write!(f, "low"),
            Effort::Medium => write!(f, "medium"),
            Effort::High => write!(f, "high"),
        }
    }
}

/// A ranked follow-up for the document author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityAction {
    /// 1 is the most urgent.
    pub priority: usize,
    pub kind: TaskKind,
    pub action: String,
    pub issue_count: usize,
    pub effort: Effort,
}

/// Outcome of one task as recorded in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskSummary {
    Succeeded {
        score: f64,
        issue_count: usize,
        summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    Degraded {
        status: TaskStatus,
        reason: String,
    },
}

impl TaskSummary {
    pub fn is_degraded(&self) -> bool {
        matches!(self, TaskSummary::Degraded { .. })
    }
}

/// The merged result of one review run. Never mutated after aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedReport {
    pub report_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub document_title: Option<String>,
    /// 0.0..=1.0
    pub overall_score: f64,
    pub executive_summary: String,
    /// Highest priority first.
    pub priority_actions: Vec<PriorityAction>,
    pub per_task_summaries: BTreeMap<TaskKind, TaskSummary>,
    pub recommendations: Vec<String>,
    /// True when fewer than all tasks completed.
    pub degraded: bool,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl IntegratedReport {
    pub fn total_tasks(&self) -> usize {
        self.per_task_summaries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(Severity::parse_lenient("HIGH"), Severity::High);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Medium);
    }

    #[test]
    fn test_document_metadata() {
        let doc = Document::new("a.md", "intro\n# Title Here\n\nsome words here", 1024).unwrap();
        assert_eq!(doc.title, "Title Here");
        assert_eq!(doc.line_count, 4);
        assert_eq!(doc.word_count, 7);
        assert_eq!(doc.encoding, "utf-8");
    }

    #[test]
    fn test_document_validation() {
        assert!(Document::new("a.md", "", 10).is_err());
        assert!(Document::new("a.md", "0123456789a", 10).is_err());
        assert!(Document::new("", "text", 10).is_err());
        assert!(Document::new("a.md", "0123456789", 10).is_ok());
    }

    #[test]
    fn test_document_load_rejects_invalid_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0xfd]).unwrap();
        let err = Document::load(file.path(), 1024).unwrap_err();
        assert!(matches!(err, ReviewError::Validation(_)));

        let mut ok = tempfile::NamedTempFile::new().unwrap();
        ok.write_all("# Hello\nworld".as_bytes()).unwrap();
        let doc = Document::load(ok.path(), 1024).unwrap();
        assert_eq!(doc.title, "Hello");
    }

    #[test]
    fn test_task_kind_order_and_labels() {
        assert!(TaskKind::Evidence < TaskKind::Proofreading);
        assert!(TaskKind::Proofreading < TaskKind::Report);
        assert!(TaskKind::Report < TaskKind::Custom("aaa".to_string()));
        assert_eq!(TaskKind::from("Proofreading"), TaskKind::Proofreading);
        assert_eq!(TaskKind::Custom("tone".to_string()).label(), "tone");
    }

    #[test]
    fn test_task_terminal_states_are_final() {
        let now = Utc::now();
        let mut task = AnalysisTask::new(TaskKind::Evidence);
        assert!(task.mark_running(now));
        assert!(!task.mark_running(now));
        assert!(task.fail("boom", now));
        assert!(!task.complete(AnalysisOutput::default(), now));
        assert!(!task.time_out("late", now));
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.result.is_none());
        assert_eq!(task.error_detail.as_deref(), Some("boom"));
    }

    #[test]
    fn test_issue_count_skips_verified_facts() {
        let output = AnalysisOutput {
            score: 0.8,
            summary: String::new(),
            findings: vec![
                Finding::new(FindingCategory::VerifiedFact, Severity::Low, "ok"),
                Finding::new(FindingCategory::MissingEvidence, Severity::High, "no source"),
                Finding::new(FindingCategory::MissingEvidence, Severity::High, "no source"),
                Finding::new(FindingCategory::QuestionableClaim, Severity::Critical, "hmm"),
            ],
            recommendations: vec![],
        };
        assert_eq!(output.issue_count(), 3);
        let grouped = output.issues_by_category();
        assert_eq!(grouped.get(&FindingCategory::MissingEvidence).map(|v| v.len()), Some(2));
        assert!(!grouped.contains_key(&FindingCategory::VerifiedFact));
    }

    #[test]
    fn test_task_kind_serializes_as_map_key() {
        let mut map = BTreeMap::new();
        map.insert(TaskKind::Custom("tone".to_string()), 1);
        map.insert(TaskKind::Evidence, 2);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"evidence":2,"tone":1}"#);
    }

    #[test]
    fn test_progress_event_clamps_percentage() {
        let event = ProgressEvent::new("evidence", 140.0, TaskStatus::Completed, "done");
        assert_eq!(event.percentage, 100.0);
    }
}
