//! Markdown and JSON report generation.
//!
//! This module renders an [`IntegratedReport`] together with the task set
//! it was built from.

use crate::analysis::{findings_by_severity, severity_counts};
use crate::config::ReportConfig;
use crate::error::ReviewResult;
use crate::models::{
    AnalysisTask, Document, Finding, IntegratedReport, Severity, TaskKind, TaskSummary,
};
use crate::progress::status_emoji;
use serde::Serialize;
use std::collections::BTreeMap;

/// Rendering switches for the markdown report.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub include_findings: bool,
    pub max_findings_per_task: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include_findings: true,
            max_findings_per_task: 20,
        }
    }
}

impl From<&ReportConfig> for ReportOptions {
    fn from(config: &ReportConfig) -> Self {
        Self {
            include_findings: config.include_findings,
            max_findings_per_task: config.max_findings_per_task,
        }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(
    report: &IntegratedReport,
    tasks: &[AnalysisTask],
    document: &Document,
    options: &ReportOptions,
) -> String {
    let mut output = String::new();

    output.push_str("# Document Review Report\n\n");
    output.push_str(&generate_metadata_section(report, document));
    output.push_str(&generate_summary_section(report));
    output.push_str(&generate_analyses_section(report));
    output.push_str(&generate_actions_section(report));
    if options.include_findings {
        output.push_str(&generate_findings_section(tasks, options.max_findings_per_task));
    }
    output.push_str(&generate_recommendations_section(&report.recommendations));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(report: &IntegratedReport, document: &Document) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Document:** {} (`{}`)\n",
        report.document_title.as_deref().unwrap_or(&document.title),
        document.path.display()
    ));
    section.push_str(&format!(
        "- **Size:** {} lines, {} words, {} bytes\n",
        document.line_count, document.word_count, document.size_bytes
    ));
    section.push_str(&format!(
        "- **Review Date:** {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Report ID:** `{}`\n", report.report_id));
    section.push_str(&format!(
        "- **Analyses:** {} completed, {} failed, {} timed out\n",
        report.completed, report.failed, report.timed_out
    ));
    section.push('\n');

    section
}

fn generate_summary_section(report: &IntegratedReport) -> String {
    let mut section = String::new();

    section.push_str("## Executive Summary\n\n");
    section.push_str(&format!(
        "**Overall Score:** {:.0}% {}\n\n",
        report.overall_score * 100.0,
        score_bar(report.overall_score)
    ));
    if report.degraded {
        section.push_str(
            "> ⚠️ **Partial result:** not every analysis completed. \
             The score only covers the analyses that did.\n\n",
        );
    }
    section.push_str(&report.executive_summary);
    section.push_str("\n\n");

    section
}

/// Ten-cell bar, one cell per 10%.
fn score_bar(score: f64) -> String {
    let filled = (score.clamp(0.0, 1.0) * 10.0).round() as usize;
    format!("`{}{}`", "█".repeat(filled), "░".repeat(10 - filled))
}

fn generate_analyses_section(report: &IntegratedReport) -> String {
    let mut section = String::new();

    section.push_str("## Analyses\n\n");
    section.push_str("| Analysis | Outcome | Score | Issues | Duration |\n");
    section.push_str("|:---|:---|:---:|:---:|:---:|\n");

    for (kind, summary) in &report.per_task_summaries {
        match summary {
            TaskSummary::Succeeded {
                score,
                issue_count,
                duration_ms,
                ..
            } => {
                let duration = duration_ms
                    .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                    .unwrap_or_else(|| "-".to_string());
                section.push_str(&format!(
                    "| {} | ✅ completed | {:.0}% | {} | {} |\n",
                    kind,
                    score * 100.0,
                    issue_count,
                    duration
                ));
            }
            TaskSummary::Degraded { status, reason } => {
                section.push_str(&format!(
                    "| {} | {} {}: {} | - | - | - |\n",
                    kind,
                    status_emoji(*status),
                    status,
                    reason.replace('|', "\\|")
                ));
            }
        }
    }
    section.push('\n');

    let summaries: Vec<(&TaskKind, &str)> = report
        .per_task_summaries
        .iter()
        .filter_map(|(kind, summary)| match summary {
            TaskSummary::Succeeded { summary, .. } if !summary.is_empty() => {
                Some((kind, summary.as_str()))
            }
            _ => None,
        })
        .collect();
    for (kind, summary) in summaries {
        section.push_str(&format!("**{}:** {}\n\n", kind, summary));
    }

    section
}

fn generate_actions_section(report: &IntegratedReport) -> String {
    let mut section = String::new();

    section.push_str("## Priority Actions\n\n");

    if report.priority_actions.is_empty() {
        section.push_str("Nothing to do. No issues were found. 🎉\n\n");
        return section;
    }

    section.push_str("| # | Action | Analysis | Issues | Effort |\n");
    section.push_str("|:---:|:---|:---|:---:|:---:|\n");
    for action in &report.priority_actions {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            action.priority,
            action.action.replace('|', "\\|"),
            action.kind,
            action.issue_count,
            action.effort
        ));
    }
    section.push('\n');

    section
}

fn generate_findings_section(tasks: &[AnalysisTask], max_per_task: usize) -> String {
    let sorted = findings_by_severity(tasks);
    if sorted.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Findings\n\n");

    let counts = severity_counts(tasks);
    let count = |severity: Severity| counts.get(&severity).copied().unwrap_or(0);
    section.push_str(&format!(
        "| {} Critical | {} High | {} Medium | {} Low | **Total** |\n",
        Severity::Critical.emoji(),
        Severity::High.emoji(),
        Severity::Medium.emoji(),
        Severity::Low.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | **{}** |\n\n",
        count(Severity::Critical),
        count(Severity::High),
        count(Severity::Medium),
        count(Severity::Low),
        sorted.len()
    ));

    let mut by_kind: BTreeMap<&TaskKind, Vec<&Finding>> = BTreeMap::new();
    for (kind, finding) in sorted {
        by_kind.entry(kind).or_default().push(finding);
    }

    for (kind, findings) in by_kind {
        section.push_str(&format!("### {} ({})\n\n", kind, findings.len()));
        for finding in findings.iter().take(max_per_task) {
            section.push_str(&generate_finding_line(finding));
        }
        if findings.len() > max_per_task {
            section.push_str(&format!(
                "- … and {} more\n",
                findings.len() - max_per_task
            ));
        }
        section.push('\n');
    }

    section
}

fn generate_finding_line(finding: &Finding) -> String {
    let location = finding
        .line
        .map(|line| format!(" (line {})", line))
        .unwrap_or_default();
    let mut line = format!(
        "- {} **{}**{}: {}",
        finding.severity.emoji(),
        finding.category,
        location,
        finding.message
    );
    if let Some(ref suggestion) = finding.suggestion {
        line.push_str(&format!(" 💡 {}", suggestion));
    }
    line.push('\n');
    line
}

fn generate_recommendations_section(recommendations: &[String]) -> String {
    if recommendations.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Recommendations\n\n");
    for (i, rec) in recommendations.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, rec));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by DocReview v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

#[derive(Serialize)]
struct JsonReport<'a> {
    report: &'a IntegratedReport,
    tasks: &'a [AnalysisTask],
}

/// Generate a JSON report with the full task set attached.
pub fn generate_json_report(report: &IntegratedReport, tasks: &[AnalysisTask]) -> ReviewResult<String> {
    Ok(serde_json::to_string_pretty(&JsonReport { report, tasks })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregate_with;
    use crate::analysis::AggregationOptions;
    use crate::models::{AnalysisOutput, FindingCategory};
    use chrono::Utc;

    fn create_test_tasks() -> Vec<AnalysisTask> {
        let now = Utc::now();

        let mut evidence = AnalysisTask::new(TaskKind::Evidence);
        evidence.mark_running(now);
        evidence.complete(
            AnalysisOutput {
                score: 0.6,
                summary: "Two claims lack sources.".to_string(),
                findings: vec![
                    Finding::new(
                        FindingCategory::MissingEvidence,
                        Severity::High,
                        "80% of users | prefer dark mode",
                    )
                    .at_line(12)
                    .with_suggestion("Cite the survey"),
                    Finding::new(FindingCategory::VerifiedFact, Severity::Low, "Rust 1.0 in 2015"),
                ],
                recommendations: vec!["Add a references section".to_string()],
            },
            now,
        );

        let mut proofreading = AnalysisTask::new(TaskKind::Proofreading);
        proofreading.mark_running(now);
        proofreading.time_out("no result within 30s", now);

        vec![evidence, proofreading]
    }

    fn create_test_document() -> Document {
        Document::new("docs/guide.md", "# Guide\n\nSome words.", 1024).unwrap()
    }

    #[test]
    fn test_generate_markdown_report() {
        let tasks = create_test_tasks();
        let report = aggregate_with(
            &tasks,
            &AggregationOptions {
                document_title: Some("Guide".to_string()),
                ..AggregationOptions::default()
            },
        );
        let markdown = generate_markdown_report(
            &report,
            &tasks,
            &create_test_document(),
            &ReportOptions::default(),
        );

        assert!(markdown.contains("# Document Review Report"));
        assert!(markdown.contains("- **Document:** Guide (`docs/guide.md`)"));
        assert!(markdown.contains("**Overall Score:** 60%"));
        assert!(markdown.contains("Partial result"));
        assert!(markdown.contains("| evidence | ✅ completed | 60% | 1 |"));
        assert!(markdown.contains("timed out: no result within 30s"));
        assert!(markdown.contains("Re-run proofreading"));
        assert!(markdown.contains("(line 12)"));
        assert!(markdown.contains("Cite the survey"));
        assert!(!markdown.contains("Rust 1.0 in 2015"));
        assert!(markdown.contains("1. Add a references section"));
    }

    #[test]
    fn test_findings_can_be_omitted_or_capped() {
        let tasks = create_test_tasks();
        let report = aggregate_with(&tasks, &AggregationOptions::default());
        let document = create_test_document();

        let options = ReportOptions {
            include_findings: false,
            ..ReportOptions::default()
        };
        let markdown = generate_markdown_report(&report, &tasks, &document, &options);
        assert!(!markdown.contains("## Findings"));

        let options = ReportOptions {
            include_findings: true,
            max_findings_per_task: 0,
        };
        let markdown = generate_markdown_report(&report, &tasks, &document, &options);
        assert!(markdown.contains("… and 1 more"));
    }

    #[test]
    fn test_score_bar() {
        assert_eq!(score_bar(0.0), "`░░░░░░░░░░`");
        assert_eq!(score_bar(0.62), "`██████░░░░`");
        assert_eq!(score_bar(3.0), "`██████████`");
    }

    #[test]
    fn test_generate_json_report() {
        let tasks = create_test_tasks();
        let report = aggregate_with(&tasks, &AggregationOptions::default());
        let json = generate_json_report(&report, &tasks).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["report"]["completed"], 1);
        assert_eq!(
            value["report"]["per_task_summaries"]["proofreading"]["outcome"],
            "degraded"
        );
        assert_eq!(value["tasks"][1]["status"], "timed_out");
        assert!(value["report"]["overall_score"].as_f64().is_some());
    }
}
