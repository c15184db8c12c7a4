//! Result aggregation.
//!
//! Turns a finished task set into an [`IntegratedReport`]: overall score,
//! per-task outcomes, ranked priority actions and a templated executive
//! summary. Aggregation never fails; missing results only degrade the
//! report.

use crate::models::{
    AnalysisTask, Effort, Finding, FindingCategory, IntegratedReport, PriorityAction, Severity,
    TaskKind, TaskStatus, TaskSummary,
};
use chrono::Utc;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Default cap on the priority action list.
pub const DEFAULT_MAX_PRIORITY_ACTIONS: usize = 10;

/// Findings count at which an action needs one more step of effort.
const LARGE_ISSUE_COUNT: usize = 10;

/// Knobs for [`aggregate_with`].
#[derive(Debug, Clone)]
pub struct AggregationOptions {
    pub max_priority_actions: usize,
    pub document_title: Option<String>,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            max_priority_actions: DEFAULT_MAX_PRIORITY_ACTIONS,
            document_title: None,
        }
    }
}

/// Aggregate with default options.
#[allow(dead_code)] // Entry point for callers without report settings
pub fn aggregate(tasks: &[AnalysisTask]) -> IntegratedReport {
    aggregate_with(tasks, &AggregationOptions::default())
}

/// Build the integrated report for `tasks`.
///
/// A task that is not `Completed` with a result, including one that never
/// reached a terminal state, contributes no score and is recorded as
/// degraded.
pub fn aggregate_with(tasks: &[AnalysisTask], options: &AggregationOptions) -> IntegratedReport {
    let per_task_summaries: BTreeMap<TaskKind, TaskSummary> = tasks
        .iter()
        .map(|task| (task.kind.clone(), summarize_task(task)))
        .collect();

    let completed = tasks.iter().filter(|t| succeeded(t)).count();
    let timed_out = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::TimedOut)
        .count();
    let failed = tasks.len() - completed - timed_out;

    let overall_score = overall_score(tasks);
    let priority_actions = rank_actions(tasks, options.max_priority_actions);
    let recommendations = collect_recommendations(tasks);

    let counts = SummaryCounts {
        total: tasks.len(),
        completed,
        failed,
        timed_out,
        issues: tasks
            .iter()
            .filter_map(|t| t.result.as_ref())
            .map(|r| r.issue_count())
            .sum(),
        severe: severe_issue_count(tasks),
        actions: priority_actions.len(),
    };
    let completed_kinds: Vec<&str> = tasks
        .iter()
        .filter(|t| succeeded(t))
        .map(|t| t.kind.label())
        .collect();
    let executive_summary = executive_summary(&counts, overall_score, &completed_kinds);
    let degraded =
        tasks.is_empty() || per_task_summaries.values().any(TaskSummary::is_degraded);

    IntegratedReport {
        report_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        document_title: options.document_title.clone(),
        overall_score,
        executive_summary,
        priority_actions,
        per_task_summaries,
        recommendations,
        degraded,
        completed,
        failed,
        timed_out,
    }
}

fn succeeded(task: &AnalysisTask) -> bool {
    task.status == TaskStatus::Completed && task.result.is_some()
}

fn summarize_task(task: &AnalysisTask) -> TaskSummary {
    match (&task.status, &task.result) {
        (TaskStatus::Completed, Some(output)) => TaskSummary::Succeeded {
            score: clamp_score(output.score).unwrap_or(0.0),
            issue_count: output.issue_count(),
            summary: output.summary.clone(),
            duration_ms: task.duration().map(|d| d.as_millis() as u64),
        },
        (TaskStatus::Completed, None) => TaskSummary::Degraded {
            status: TaskStatus::Completed,
            reason: "completed without a result".to_string(),
        },
        (status, _) if !status.is_terminal() => TaskSummary::Degraded {
            status: *status,
            reason: "did not finish".to_string(),
        },
        (status, _) => TaskSummary::Degraded {
            status: *status,
            reason: task
                .error_detail
                .clone()
                .unwrap_or_else(|| "no detail recorded".to_string()),
        },
    }
}

/// Finite scores clamped to 0..=1; NaN and infinities are dropped.
fn clamp_score(score: f64) -> Option<f64> {
    score.is_finite().then(|| score.clamp(0.0, 1.0))
}

/// Mean of the available scores, 0 when there are none.
fn overall_score(tasks: &[AnalysisTask]) -> f64 {
    let scores: Vec<f64> = tasks
        .iter()
        .filter(|t| succeeded(t))
        .filter_map(|t| t.result.as_ref())
        .filter_map(|r| clamp_score(r.score))
        .collect();

    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

fn severe_issue_count(tasks: &[AnalysisTask]) -> usize {
    tasks
        .iter()
        .filter_map(|t| t.result.as_ref())
        .flat_map(|r| r.findings.iter())
        .filter(|f| f.category.is_issue() && f.severity >= Severity::High)
        .count()
}

/// An action before ranking.
struct Candidate {
    degraded: bool,
    issue_count: usize,
    severe: usize,
    kind: TaskKind,
    category: Option<FindingCategory>,
    action: String,
    effort: Effort,
}

impl Candidate {
    /// Degraded first, then more issues, then more severe issues, then
    /// task kind order, then category order.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .degraded
            .cmp(&self.degraded)
            .then(other.issue_count.cmp(&self.issue_count))
            .then(other.severe.cmp(&self.severe))
            .then(self.kind.cmp(&other.kind))
            .then(self.category.cmp(&other.category))
    }
}

fn rank_actions(tasks: &[AnalysisTask], max: usize) -> Vec<PriorityAction> {
    let mut candidates = Vec::new();

    for task in tasks {
        match (&task.status, &task.result) {
            (TaskStatus::Completed, Some(output)) => {
                for (category, findings) in output.issues_by_category() {
                    candidates.push(Candidate {
                        degraded: false,
                        issue_count: findings.len(),
                        severe: findings
                            .iter()
                            .filter(|f| f.severity >= Severity::High)
                            .count(),
                        kind: task.kind.clone(),
                        category: Some(category),
                        action: category_action(category, findings.len()),
                        effort: category_effort(category, findings.len()),
                    });
                }
            }
            (status, _) => candidates.push(Candidate {
                degraded: true,
                issue_count: 0,
                severe: 0,
                kind: task.kind.clone(),
                category: None,
                action: rerun_action(task, *status),
                effort: Effort::Low,
            }),
        }
    }

    candidates.sort_by(Candidate::rank);
    candidates.truncate(max);

    candidates
        .into_iter()
        .enumerate()
        .map(|(index, c)| PriorityAction {
            priority: index + 1,
            kind: c.kind,
            action: c.action,
            issue_count: c.issue_count,
            effort: c.effort,
        })
        .collect()
}

fn rerun_action(task: &AnalysisTask, status: TaskStatus) -> String {
    match status {
        TaskStatus::TimedOut => format!(
            "Re-run {} analysis with a longer timeout (it timed out)",
            task.kind
        ),
        TaskStatus::Failed => format!(
            "Re-run {} analysis ({})",
            task.kind,
            task.error_detail.as_deref().unwrap_or("failed")
        ),
        _ => format!("Re-run {} analysis (it did not finish)", task.kind),
    }
}

fn category_action(category: FindingCategory, count: usize) -> String {
    match category {
        FindingCategory::MissingEvidence => {
            format!("Add sources for {} unsupported claim{}", count, plural(count))
        }
        FindingCategory::QuestionableClaim => {
            format!("Verify {} questionable claim{}", count, plural(count))
        }
        FindingCategory::Grammar => format!("Fix {} grammar issue{}", count, plural(count)),
        FindingCategory::Style => format!("Unify style in {} place{}", count, plural(count)),
        FindingCategory::Structure => {
            format!("Fix {} structural problem{}", count, plural(count))
        }
        FindingCategory::VerifiedFact => format!("Review {} verified fact{}", count, plural(count)),
    }
}

fn category_effort(category: FindingCategory, count: usize) -> Effort {
    let base = match category {
        FindingCategory::Grammar | FindingCategory::Style | FindingCategory::VerifiedFact => {
            Effort::Low
        }
        FindingCategory::MissingEvidence | FindingCategory::Structure => Effort::Medium,
        FindingCategory::QuestionableClaim => Effort::High,
    };
    if count < LARGE_ISSUE_COUNT {
        return base;
    }
    match base {
        Effort::Low => Effort::Medium,
        _ => Effort::High,
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// Recommendations from completed tasks, first occurrence wins.
fn collect_recommendations(tasks: &[AnalysisTask]) -> Vec<String> {
    let mut seen = HashSet::new();
    tasks
        .iter()
        .filter(|t| succeeded(t))
        .filter_map(|t| t.result.as_ref())
        .flat_map(|r| r.recommendations.iter())
        .map(|r| r.trim())
        .filter(|r| !r.is_empty() && seen.insert(r.to_lowercase()))
        .map(String::from)
        .collect()
}

struct SummaryCounts {
    total: usize,
    completed: usize,
    failed: usize,
    timed_out: usize,
    issues: usize,
    severe: usize,
    actions: usize,
}

fn executive_summary(counts: &SummaryCounts, score: f64, completed_kinds: &[&str]) -> String {
    if counts.total == 0 {
        return "Review failed: no analyses were run. No quality score is available.".to_string();
    }

    if counts.completed == 0 {
        return format!(
            "Review failed: none of the {} analyses completed ({} failed, {} timed out). \
             No quality score is available.",
            counts.total, counts.failed, counts.timed_out
        );
    }

    let findings = format!(
        "{} issue{} found, {} high or critical. {} priority action{}.",
        counts.issues,
        plural(counts.issues),
        counts.severe,
        counts.actions,
        plural(counts.actions)
    );

    if counts.completed < counts.total {
        format!(
            "Partial review: {} of {} analyses completed ({} failed, {} timed out). \
             Overall score {:.0}% is based on {} only. {}",
            counts.completed,
            counts.total,
            counts.failed,
            counts.timed_out,
            score * 100.0,
            completed_kinds.join(", "),
            findings
        )
    } else {
        format!(
            "Review complete: all {} analyses finished. Overall score {:.0}% ({}). {}",
            counts.total,
            score * 100.0,
            rating(score),
            findings
        )
    }
}

fn rating(score: f64) -> &'static str {
    if score >= 0.8 {
        "good"
    } else if score >= 0.6 {
        "fair"
    } else {
        "needs work"
    }
}

/// Every issue finding of the completed tasks, most severe first, then by
/// task kind and line.
pub fn findings_by_severity(tasks: &[AnalysisTask]) -> Vec<(&TaskKind, &Finding)> {
    let mut findings: Vec<(&TaskKind, &Finding)> = tasks
        .iter()
        .filter_map(|t| t.result.as_ref().map(|r| (&t.kind, r)))
        .flat_map(|(kind, r)| r.findings.iter().map(move |f| (kind, f)))
        .filter(|(_, f)| f.category.is_issue())
        .collect();

    findings.sort_by_key(|(kind, f)| (Reverse(f.severity), *kind, f.line.unwrap_or(usize::MAX)));
    findings
}

/// Issue count per severity across completed tasks.
pub fn severity_counts(tasks: &[AnalysisTask]) -> BTreeMap<Severity, usize> {
    let mut counts = BTreeMap::new();
    for (_, finding) in findings_by_severity(tasks) {
        *counts.entry(finding.severity).or_default() += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisOutput;

    fn finding(category: FindingCategory, severity: Severity) -> Finding {
        Finding::new(category, severity, "test finding")
    }

    fn completed(kind: TaskKind, score: f64, findings: Vec<Finding>) -> AnalysisTask {
        let now = Utc::now();
        let mut task = AnalysisTask::new(kind);
        task.mark_running(now);
        task.complete(
            AnalysisOutput {
                score,
                summary: "done".to_string(),
                findings,
                recommendations: vec![],
            },
            now,
        );
        task
    }

    fn failed(kind: TaskKind, detail: &str) -> AnalysisTask {
        let now = Utc::now();
        let mut task = AnalysisTask::new(kind);
        task.mark_running(now);
        task.fail(detail, now);
        task
    }

    fn timed_out(kind: TaskKind) -> AnalysisTask {
        let now = Utc::now();
        let mut task = AnalysisTask::new(kind);
        task.mark_running(now);
        task.time_out("no result within 100ms", now);
        task
    }

    #[test]
    fn test_aggregate_empty_is_total_failure() {
        let report = aggregate(&[]);
        assert_eq!(report.overall_score, 0.0);
        assert!(report.executive_summary.starts_with("Review failed"));
        assert!(report.priority_actions.is_empty());
        assert!(report.degraded);
        assert_eq!(report.total_tasks(), 0);
    }

    #[test]
    fn test_aggregate_all_failed() {
        let report = aggregate(&[failed(TaskKind::Evidence, "boom"), timed_out(TaskKind::Report)]);
        assert_eq!(report.overall_score, 0.0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.timed_out, 1);
        assert!(report
            .executive_summary
            .starts_with("Review failed: none of the 2 analyses completed"));
        assert_eq!(report.priority_actions.len(), 2);
        assert_eq!(report.priority_actions[0].kind, TaskKind::Evidence);
    }

    #[test]
    fn test_partial_results_score_and_degraded_entry() {
        let tasks = vec![
            completed(TaskKind::Evidence, 0.9, vec![]),
            timed_out(TaskKind::Proofreading),
        ];
        let report = aggregate(&tasks);

        assert!((report.overall_score - 0.9).abs() < 1e-9);
        assert!(report.degraded);
        assert_eq!(report.completed, 1);
        assert!(report.executive_summary.starts_with("Partial review: 1 of 2"));
        assert!(report.executive_summary.contains("based on evidence only"));

        match &report.per_task_summaries[&TaskKind::Proofreading] {
            TaskSummary::Degraded { status, reason } => {
                assert_eq!(*status, TaskStatus::TimedOut);
                assert!(reason.contains("100ms"));
            }
            other => panic!("expected degraded summary, got {:?}", other),
        }

        let first = &report.priority_actions[0];
        assert_eq!(first.priority, 1);
        assert_eq!(first.kind, TaskKind::Proofreading);
        assert!(first.action.starts_with("Re-run proofreading"));
    }

    #[test]
    fn test_full_review_summary() {
        let tasks = vec![
            completed(TaskKind::Evidence, 0.8, vec![]),
            completed(TaskKind::Proofreading, 1.0, vec![]),
        ];
        let report = aggregate(&tasks);
        assert!(!report.degraded);
        assert!((report.overall_score - 0.9).abs() < 1e-9);
        assert!(report
            .executive_summary
            .starts_with("Review complete: all 2 analyses finished. Overall score 90% (good)."));
    }

    #[test]
    fn test_scores_are_clamped_and_non_finite_ignored() {
        let tasks = vec![
            completed(TaskKind::Evidence, 1.5, vec![]),
            completed(TaskKind::Proofreading, f64::NAN, vec![]),
            completed(TaskKind::Report, 0.5, vec![]),
        ];
        let report = aggregate(&tasks);
        assert!((report.overall_score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_priority_ranking() {
        use FindingCategory::*;
        let tasks = vec![
            completed(
                TaskKind::Evidence,
                0.5,
                vec![
                    finding(MissingEvidence, Severity::High),
                    finding(MissingEvidence, Severity::Medium),
                    finding(MissingEvidence, Severity::Medium),
                    finding(QuestionableClaim, Severity::Medium),
                    finding(VerifiedFact, Severity::Low),
                ],
            ),
            completed(
                TaskKind::Proofreading,
                0.7,
                vec![
                    finding(Grammar, Severity::High),
                    finding(Grammar, Severity::High),
                    finding(Grammar, Severity::Low),
                    finding(Style, Severity::Low),
                ],
            ),
            failed(TaskKind::Report, "backend unavailable"),
        ];
        let report = aggregate(&tasks);
        let actions: Vec<(usize, &TaskKind, usize)> = report
            .priority_actions
            .iter()
            .map(|a| (a.priority, &a.kind, a.issue_count))
            .collect();

        assert_eq!(
            actions,
            vec![
                (1, &TaskKind::Report, 0),
                // Three issues each; more high severity findings wins.
                (2, &TaskKind::Proofreading, 3),
                (3, &TaskKind::Evidence, 3),
                // One issue each; kind order breaks the tie.
                (4, &TaskKind::Evidence, 1),
                (5, &TaskKind::Proofreading, 1),
            ]
        );
        assert_eq!(report.priority_actions[1].action, "Fix 3 grammar issues");
        assert_eq!(report.priority_actions[1].effort, Effort::Low);
        assert_eq!(
            report.priority_actions[2].action,
            "Add sources for 3 unsupported claims"
        );
    }

    #[test]
    fn test_priority_actions_truncated() {
        let findings = vec![
            finding(FindingCategory::Grammar, Severity::Low),
            finding(FindingCategory::Style, Severity::Low),
            finding(FindingCategory::Structure, Severity::Low),
        ];
        let tasks = vec![completed(TaskKind::Proofreading, 0.5, findings)];
        let options = AggregationOptions {
            max_priority_actions: 2,
            document_title: Some("Doc".to_string()),
        };
        let report = aggregate_with(&tasks, &options);
        assert_eq!(report.priority_actions.len(), 2);
        assert_eq!(report.priority_actions[1].priority, 2);
        assert_eq!(report.document_title.as_deref(), Some("Doc"));
    }

    #[test]
    fn test_unfinished_task_counts_as_degraded() {
        let mut running = AnalysisTask::new(TaskKind::Evidence);
        running.mark_running(Utc::now());
        let report = aggregate(&[running, completed(TaskKind::Report, 0.6, vec![])]);

        assert!(report.degraded);
        assert_eq!(report.failed, 1);
        assert!(report.per_task_summaries[&TaskKind::Evidence].is_degraded());
        assert!(report.priority_actions[0].action.contains("did not finish"));
    }

    #[test]
    fn test_recommendations_deduplicated() {
        let mut a = completed(TaskKind::Evidence, 0.5, vec![]);
        let mut b = completed(TaskKind::Proofreading, 0.5, vec![]);
        if let Some(r) = a.result.as_mut() {
            r.recommendations = vec!["Add sources".to_string(), " ".to_string()];
        }
        if let Some(r) = b.result.as_mut() {
            r.recommendations = vec!["add sources".to_string(), "Shorten sentences".to_string()];
        }
        let report = aggregate(&[a, b]);
        assert_eq!(report.recommendations, vec!["Add sources", "Shorten sentences"]);
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let tasks = vec![
            completed(
                TaskKind::Evidence,
                0.4,
                vec![finding(FindingCategory::MissingEvidence, Severity::High)],
            ),
            failed(TaskKind::Proofreading, "boom"),
        ];
        let first = aggregate(&tasks);
        let second = aggregate(&tasks);
        assert_eq!(first.executive_summary, second.executive_summary);
        assert_eq!(first.priority_actions, second.priority_actions);
        assert_eq!(first.per_task_summaries, second.per_task_summaries);
    }

    #[test]
    fn test_findings_by_severity() {
        let tasks = vec![
            completed(
                TaskKind::Proofreading,
                0.5,
                vec![
                    finding(FindingCategory::Style, Severity::Low),
                    finding(FindingCategory::Grammar, Severity::Critical),
                ],
            ),
            completed(
                TaskKind::Evidence,
                0.5,
                vec![
                    finding(FindingCategory::VerifiedFact, Severity::Low),
                    finding(FindingCategory::MissingEvidence, Severity::Critical),
                ],
            ),
        ];
        let sorted = findings_by_severity(&tasks);
        assert_eq!(sorted.len(), 3);
        assert_eq!(sorted[0].0, &TaskKind::Evidence);
        assert_eq!(sorted[1].1.category, FindingCategory::Grammar);
        assert_eq!(sorted[2].1.severity, Severity::Low);

        let counts = severity_counts(&tasks);
        assert_eq!(counts.get(&Severity::Critical), Some(&2));
        assert_eq!(counts.get(&Severity::High), None);
    }
}
