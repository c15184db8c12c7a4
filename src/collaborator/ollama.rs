//! LLM-backed analyzers over the Ollama chat API.
//!
//! Each analysis is a single non-streaming chat request. The model is asked
//! to answer in JSON lines: one object per finding plus a final
//! `{"score": .., "summary": ..}` line.

use super::Analyzer;
use crate::config::ModelConfig;
use crate::error::{ReviewError, ReviewResult};
use crate::models::{AnalysisOutput, Document, Finding, FindingCategory, Severity, TaskKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Characters of document content included in a prompt.
const MAX_PROMPT_CONTENT_CHARS: usize = 24_000;

/// Connection settings for the analyzer.
#[derive(Debug, Clone)]
pub struct OllamaSettings {
    pub ollama_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2:latest".to_string(),
            temperature: 0.1,
            timeout_seconds: 300,
        }
    }
}

impl From<&ModelConfig> for OllamaSettings {
    fn from(model: &ModelConfig) -> Self {
        Self {
            ollama_url: model.ollama_url.clone(),
            model_name: model.name.clone(),
            temperature: model.temperature,
            timeout_seconds: model.timeout_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// Evidence or proofreading analysis performed by an Ollama model.
pub struct OllamaAnalyzer {
    kind: TaskKind,
    name: String,
    settings: OllamaSettings,
    http_client: reqwest::Client,
}

impl OllamaAnalyzer {
    pub fn new(kind: TaskKind, settings: OllamaSettings) -> ReviewResult<Self> {
        if !matches!(kind, TaskKind::Evidence | TaskKind::Proofreading) {
            return Err(ReviewError::Config(format!(
                "no LLM prompt for {} analysis",
                kind
            )));
        }

        info!(
            "Initializing {} analyzer with model {} at {}",
            kind, settings.model_name, settings.ollama_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            name: format!("{}-ollama", kind.label()),
            kind,
            settings,
            http_client,
        })
    }

    fn system_prompt(&self) -> &'static str {
        match self.kind {
            TaskKind::Evidence => EVIDENCE_SYSTEM_PROMPT,
            _ => PROOFREADING_SYSTEM_PROMPT,
        }
    }

    fn build_prompt(&self, document: &Document) -> String {
        let content: String = document.content.chars().take(MAX_PROMPT_CONTENT_CHARS).collect();
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "Document: {} ({} lines)\n\n",
            document.title, document.line_count
        ));
        prompt.push_str("=== DOCUMENT ===\n");
        prompt.push_str(&content);
        prompt.push_str("\n=== END OF DOCUMENT ===\n\n");
        prompt.push_str("Now output findings as JSON (one per line), then the score line:");
        prompt
    }

    async fn send_prompt(&self, prompt: String) -> ReviewResult<String> {
        let url = format!("{}/api/chat", self.settings.ollama_url);

        let request = OllamaChatRequest {
            model: self.settings.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: self.system_prompt().to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            stream: false,
            options: OllamaOptions {
                temperature: self.settings.temperature,
            },
        };

        debug!("Sending {} request to {}", self.kind, url);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.map_err(|e| self.request_error(e))?;
            return Err(ReviewError::Collaborator(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let chat_response: OllamaChatResponse =
            response.json().await.map_err(|e| self.request_error(e))?;
        Ok(chat_response.message.content)
    }

    /// Timeouts on either the request or the body read surface as
    /// `ReviewError::Timeout`.
    fn request_error(&self, e: reqwest::Error) -> ReviewError {
        if e.is_timeout() {
            ReviewError::Timeout(Duration::from_secs(self.settings.timeout_seconds))
        } else if e.is_connect() {
            ReviewError::Collaborator(format!(
                "cannot connect to Ollama at {}",
                self.settings.ollama_url
            ))
        } else {
            ReviewError::Http(e)
        }
    }
}

#[async_trait]
impl Analyzer for OllamaAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(
        &self,
        document: &Document,
        cancel: CancellationToken,
    ) -> ReviewResult<AnalysisOutput> {
        let prompt = self.build_prompt(document);

        // Dropping the request future aborts the in-flight HTTP call; the
        // server may still finish generating.
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ReviewError::Cancelled(self.name.clone()));
            }
            response = self.send_prompt(prompt) => response?,
        };

        let output = parse_response(&self.kind, &response);
        info!(
            "{} returned {} findings (score {:.2})",
            self.name,
            output.findings.len(),
            output.score
        );
        Ok(output)
    }
}

/// Parse the JSON-lines answer. Non-JSON lines are ignored.
fn parse_response(kind: &TaskKind, response: &str) -> AnalysisOutput {
    let mut findings = Vec::new();
    let mut score: Option<f64> = None;
    let mut summary = String::new();
    let mut recommendations = Vec::new();

    for line in response.lines() {
        let line = line.trim().trim_start_matches("```json").trim_matches('`').trim();
        if line.is_empty() || !line.starts_with('{') {
            continue;
        }

        let json: Value = match serde_json::from_str(line) {
            Ok(json) => json,
            Err(e) => {
                debug!("Skipping unparseable line from model: {}", e);
                continue;
            }
        };

        if let Some(s) = json["score"].as_f64() {
            score = Some(s.clamp(0.0, 1.0));
            summary = json["summary"].as_str().unwrap_or_default().to_string();
            if let Some(recs) = json["recommendations"].as_array() {
                recommendations.extend(recs.iter().filter_map(|r| r.as_str().map(String::from)));
            }
            continue;
        }

        if let Some(finding) = json_to_finding(kind, &json) {
            findings.push(finding);
        }
    }

    let score = score.unwrap_or_else(|| {
        warn!("Model did not report a score for {} analysis", kind);
        fallback_score(&findings)
    });

    AnalysisOutput {
        score,
        summary,
        findings,
        recommendations,
    }
}

fn json_to_finding(kind: &TaskKind, json: &Value) -> Option<Finding> {
    let message = json["message"].as_str()?.to_string();
    let default_category = match kind {
        TaskKind::Evidence => FindingCategory::QuestionableClaim,
        _ => FindingCategory::Grammar,
    };
    let category = json["category"]
        .as_str()
        .and_then(FindingCategory::parse_lenient)
        .unwrap_or(default_category);
    let severity = Severity::parse_lenient(json["severity"].as_str().unwrap_or("medium"));

    let mut finding = Finding::new(category, severity, message);
    if let Some(line) = json["line"].as_u64().filter(|l| *l > 0) {
        finding = finding.at_line(line as usize);
    }
    if let Some(suggestion) = json["suggestion"].as_str().filter(|s| !s.is_empty()) {
        finding = finding.with_suggestion(suggestion);
    }
    Some(finding)
}

/// Score used when the model omits one: fewer issues, higher score.
fn fallback_score(findings: &[Finding]) -> f64 {
    let issues = findings.iter().filter(|f| f.category.is_issue()).count();
    1.0 / (1.0 + issues as f64 * 0.1)
}

const EVIDENCE_SYSTEM_PROMPT: &str = r#"You are a meticulous fact checker.
Read the document and list factual claims that need checking.
For each claim output one JSON object on its own line:
{"category": "missing_evidence" | "questionable_claim" | "verified_fact", "severity": "low" | "medium" | "high" | "critical", "line": 12, "message": "The claim and what is wrong", "suggestion": "What source to add"}
Finish with exactly one line:
{"score": 0.0-1.0 confidence that the document is well supported, "summary": "One paragraph", "recommendations": ["..."]}
Only output JSON, no other text."#;

const PROOFREADING_SYSTEM_PROMPT: &str = r#"You are an experienced copy editor.
Check grammar, typos, style consistency and readability.
For each issue output one JSON object on its own line:
{"category": "grammar" | "style" | "structure", "severity": "low" | "medium" | "high", "line": 12, "message": "What is wrong", "suggestion": "Corrected text"}
Finish with exactly one line:
{"score": 0.0-1.0 readability, "summary": "One paragraph", "recommendations": ["..."]}
Only output JSON, no other text."#;
