//! Offline analyzers based on keyword counts and simple text rules.
//!
//! These run without any model and are the default backend. They are
//! intentionally shallow: they flag candidates for a human reviewer rather
//! than deciding whether a claim is true.

use super::Analyzer;
use crate::error::{ReviewError, ReviewResult};
use crate::models::{AnalysisOutput, Document, Finding, FindingCategory, Severity};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Lines processed between cancellation checks.
const YIELD_EVERY_LINES: usize = 200;

/// Words that make a sentence read as an absolute claim.
const ABSOLUTE_MARKERS: &[&str] = &[
    "always", "never", "all", "every", "guaranteed", "proven", "best", "fastest",
    "impossible", "必ず", "絶対", "すべて", "常に", "最も", "100%",
];

/// Markers that a line cites something.
const EVIDENCE_MARKERS: &[&str] = &[
    "http://", "https://", "](", "[^", "according to", "source:", "see:", "出典", "参考",
];

/// Iterate over prose lines (1-indexed), skipping fenced code and headings.
fn prose_lines(content: &str) -> Vec<(usize, &str)> {
    let mut in_code = false;
    let mut lines = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_code = !in_code;
            continue;
        }
        if in_code || trimmed.starts_with('#') || trimmed.is_empty() {
            continue;
        }
        lines.push((index + 1, line));
    }

    lines
}

async fn checkpoint(index: usize, cancel: &CancellationToken, name: &str) -> ReviewResult<()> {
    if index % YIELD_EVERY_LINES == 0 {
        if cancel.is_cancelled() {
            return Err(ReviewError::Cancelled(name.to_string()));
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}

fn contains_word(lower: &str, word: &str) -> bool {
    if !word.is_ascii() || !word.chars().all(|c| c.is_ascii_alphabetic()) {
        return lower.contains(word);
    }
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

fn pluralize(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{} {}", count, word)
    } else {
        format!("{} {}s", count, word)
    }
}

/// Flags numeric and absolute claims that carry no citation.
#[derive(Debug, Clone, Default)]
pub struct EvidenceHeuristic;

#[async_trait]
impl Analyzer for EvidenceHeuristic {
    fn name(&self) -> &str {
        "evidence-heuristic"
    }

    async fn analyze(
        &self,
        document: &Document,
        cancel: CancellationToken,
    ) -> ReviewResult<AnalysisOutput> {
        let mut findings = Vec::new();
        let mut claims = 0usize;
        let mut supported = 0usize;
        let mut unsupported_numbers = 0usize;
        let mut absolute = 0usize;

        for (index, (line_no, line)) in prose_lines(&document.content).into_iter().enumerate() {
            checkpoint(index, &cancel, self.name()).await?;

            let lower = line.to_lowercase();
            let has_number = line.chars().any(|c| c.is_ascii_digit());
            let has_absolute = ABSOLUTE_MARKERS.iter().any(|m| contains_word(&lower, m));
            if !has_number && !has_absolute {
                continue;
            }

            claims += 1;
            let snippet: String = line.trim().chars().take(80).collect();

            if EVIDENCE_MARKERS.iter().any(|m| lower.contains(m)) {
                supported += 1;
                findings.push(
                    Finding::new(
                        FindingCategory::VerifiedFact,
                        Severity::Low,
                        format!("Claim cites a source: \"{}\"", snippet),
                    )
                    .at_line(line_no),
                );
            } else if has_number {
                unsupported_numbers += 1;
                findings.push(
                    Finding::new(
                        FindingCategory::MissingEvidence,
                        Severity::High,
                        format!("Figure without a source: \"{}\"", snippet),
                    )
                    .at_line(line_no)
                    .with_suggestion("Link the source of this figure or footnote it"),
                );
            } else {
                absolute += 1;
                findings.push(
                    Finding::new(
                        FindingCategory::QuestionableClaim,
                        Severity::Medium,
                        format!("Absolute statement without support: \"{}\"", snippet),
                    )
                    .at_line(line_no)
                    .with_suggestion("Qualify the statement or back it with a reference"),
                );
            }
        }

        let score = if claims == 0 {
            1.0
        } else {
            supported as f64 / claims as f64
        };

        let mut recommendations = Vec::new();
        if unsupported_numbers > 0 {
            recommendations.push(format!(
                "Add sources for {} without citations",
                pluralize(unsupported_numbers, "figure")
            ));
        }
        if absolute > 0 {
            recommendations.push(format!(
                "Soften or support {}",
                pluralize(absolute, "absolute statement")
            ));
        }

        Ok(AnalysisOutput {
            score,
            summary: format!(
                "Checked {}: {} cite a source, {} lack evidence, {} read as absolute.",
                pluralize(claims, "claim"),
                supported,
                unsupported_numbers,
                absolute
            ),
            findings,
            recommendations,
        })
    }
}

/// Sentence length (in words) above which a sentence is flagged.
const LONG_SENTENCE_WORDS: usize = 40;

/// Sentence length (in chars) for text written without spaces.
const LONG_SENTENCE_CHARS: usize = 120;

/// Flags repeated words, doubled punctuation, long sentences and
/// inconsistent sentence endings.
#[derive(Debug, Clone, Default)]
pub struct ProofreadingHeuristic;

impl ProofreadingHeuristic {
    fn check_line(line_no: usize, line: &str, findings: &mut Vec<Finding>) {
        let words: Vec<&str> = line.split_whitespace().collect();
        for pair in words.windows(2) {
            let a = pair[0].trim_matches(|c: char| !c.is_alphanumeric());
            let b = pair[1].trim_matches(|c: char| !c.is_alphanumeric());
            if !a.is_empty() && a.chars().all(char::is_alphabetic) && a.eq_ignore_ascii_case(b) {
                findings.push(
                    Finding::new(
                        FindingCategory::Grammar,
                        Severity::High,
                        format!("Repeated word \"{}\"", a),
                    )
                    .at_line(line_no)
                    .with_suggestion(format!("Remove the duplicate \"{}\"", a)),
                );
            }
        }

        for doubled in [",,", "。。", "、、", " ,", " ."] {
            if line.contains(doubled) && !line.contains("...") {
                let severity = if doubled.starts_with(' ') {
                    Severity::Low
                } else {
                    Severity::Medium
                };
                let category = if doubled.starts_with(' ') {
                    FindingCategory::Style
                } else {
                    FindingCategory::Grammar
                };
                findings.push(
                    Finding::new(category, severity, format!("Suspicious punctuation \"{}\"", doubled.trim()))
                        .at_line(line_no),
                );
            }
        }

        if line.ends_with(' ') || line.ends_with('\t') {
            findings.push(
                Finding::new(FindingCategory::Style, Severity::Low, "Trailing whitespace")
                    .at_line(line_no),
            );
        }

        for sentence in line.split_inclusive(['.', '!', '?', '。']) {
            let word_count = sentence.split_whitespace().count();
            let long = if word_count > 1 {
                word_count > LONG_SENTENCE_WORDS
            } else {
                sentence.chars().count() > LONG_SENTENCE_CHARS
            };
            if long {
                findings.push(
                    Finding::new(
                        FindingCategory::Style,
                        Severity::Medium,
                        "Sentence is too long to read comfortably",
                    )
                    .at_line(line_no)
                    .with_suggestion("Split it into shorter sentences"),
                );
            }
        }
    }
}

#[async_trait]
impl Analyzer for ProofreadingHeuristic {
    fn name(&self) -> &str {
        "proofreading-heuristic"
    }

    async fn analyze(
        &self,
        document: &Document,
        cancel: CancellationToken,
    ) -> ReviewResult<AnalysisOutput> {
        let mut findings = Vec::new();
        let mut polite = 0usize;
        let mut plain = 0usize;
        let lines = prose_lines(&document.content);

        for (index, (line_no, line)) in lines.iter().enumerate() {
            checkpoint(index, &cancel, self.name()).await?;
            Self::check_line(*line_no, line, &mut findings);

            for sentence in line.split_inclusive('。') {
                let sentence = sentence.trim_end();
                if sentence.ends_with("です。") || sentence.ends_with("ます。") {
                    polite += 1;
                } else if sentence.ends_with("である。") || sentence.ends_with("だ。") {
                    plain += 1;
                }
            }
        }

        if polite > 0 && plain > 0 {
            findings.push(
                Finding::new(
                    FindingCategory::Style,
                    Severity::Medium,
                    format!(
                        "Mixed sentence endings: {} polite and {} plain",
                        polite, plain
                    ),
                )
                .with_suggestion("Use one register (です・ます or である) throughout"),
            );
        }

        let weighted: f64 = findings
            .iter()
            .map(|f| match f.severity {
                Severity::Critical => 1.5,
                Severity::High => 1.0,
                Severity::Medium => 0.5,
                Severity::Low => 0.25,
            })
            .sum();
        let score = (1.0 - weighted / (lines.len().max(1) as f64)).clamp(0.0, 1.0);

        let grammar = findings
            .iter()
            .filter(|f| f.category == FindingCategory::Grammar)
            .count();
        let style = findings.len() - grammar;

        let mut recommendations = Vec::new();
        if grammar > 0 {
            recommendations.push("Review grammar and typos before publishing".to_string());
        }
        if style > 0 {
            recommendations.push("Unify writing style and shorten long sentences".to_string());
        }

        Ok(AnalysisOutput {
            score,
            summary: format!(
                "Read {}: {} and {}.",
                pluralize(lines.len(), "prose line"),
                pluralize(grammar, "grammar issue"),
                pluralize(style, "style issue")
            ),
            findings,
            recommendations,
        })
    }
}

/// Checks the heading outline: missing headings, skipped levels, empty
/// sections and multiple top-level titles.
#[derive(Debug, Clone, Default)]
pub struct StructureHeuristic;

#[async_trait]
impl Analyzer for StructureHeuristic {
    fn name(&self) -> &str {
        "structure-heuristic"
    }

    async fn analyze(
        &self,
        document: &Document,
        cancel: CancellationToken,
    ) -> ReviewResult<AnalysisOutput> {
        // (line, level, text, has_body)
        let mut headings: Vec<(usize, usize, String, bool)> = Vec::new();
        let mut in_code = false;

        for (index, line) in document.content.lines().enumerate() {
            checkpoint(index, &cancel, self.name()).await?;
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_code = !in_code;
                if let Some(last) = headings.last_mut() {
                    last.3 = true;
                }
                continue;
            }
            if !in_code && trimmed.starts_with('#') {
                let level = trimmed.chars().take_while(|c| *c == '#').count();
                let text = trimmed[level..].trim().to_string();
                headings.push((index + 1, level, text, false));
            } else if !trimmed.is_empty() {
                if let Some(last) = headings.last_mut() {
                    last.3 = true;
                }
            }
        }

        let mut findings = Vec::new();

        if headings.is_empty() {
            findings.push(
                Finding::new(FindingCategory::Structure, Severity::Medium, "Document has no headings")
                    .with_suggestion("Add a title and section headings"),
            );
        }

        let top_level = headings.iter().filter(|h| h.1 == 1).count();
        if top_level > 1 {
            findings.push(Finding::new(
                FindingCategory::Structure,
                Severity::Low,
                format!("{} top-level titles; expected one", top_level),
            ));
        }

        for pair in headings.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.1 > prev.1 + 1 {
                findings.push(
                    Finding::new(
                        FindingCategory::Structure,
                        Severity::Low,
                        format!("Heading \"{}\" skips from level {} to {}", next.2, prev.1, next.1),
                    )
                    .at_line(next.0),
                );
            }
        }

        for (index, heading) in headings.iter().enumerate() {
            let has_children = headings
                .get(index + 1)
                .map(|next| next.1 > heading.1)
                .unwrap_or(false);
            if !heading.3 && !has_children {
                findings.push(
                    Finding::new(
                        FindingCategory::Structure,
                        Severity::Medium,
                        format!("Section \"{}\" is empty", heading.2),
                    )
                    .at_line(heading.0),
                );
            }
        }

        let score = (1.0 - 0.15 * findings.len() as f64).clamp(0.0, 1.0);
        let recommendations = if findings.is_empty() {
            Vec::new()
        } else {
            vec!["Tidy the heading outline so each section has content".to_string()]
        };

        Ok(AnalysisOutput {
            score,
            summary: format!(
                "Outline has {} and {}.",
                pluralize(headings.len(), "heading"),
                pluralize(findings.len(), "structural issue")
            ),
            findings,
            recommendations,
        })
    }
}
