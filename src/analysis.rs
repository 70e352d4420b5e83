//! Resume analysis backends
//!
//! The HTTP layer hands an admitted request to an [`AnalysisBackend`]. The
//! production backend is Azure OpenAI chat completions; the reply is split
//! into blank-line separated sections, nothing more.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};
use validator::Validate;

const MAX_COMPLETION_TOKENS: u32 = 4000;

const SYSTEM_PROMPT: &str = "You are an expert resume writer and applicant tracking system specialist. \
Rewrite the resume you are given so it reads well to both recruiters and ATS software. \
Keep every fact about the candidate intact, prefer strong action verbs and measurable results, \
and keep a professional tone. Answer in exactly three parts separated by a blank line: \
the rewritten resume, a list of the improvements you made, and a list of further suggestions.";

static SECTION_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("section regex is valid"));

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").expect("bullet regex is valid"));

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 1, max = 50000))]
    pub content: String,
    #[serde(default)]
    #[validate(length(max = 20000))]
    pub job_description: Option<String>,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub job_title: Option<String>,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub industry: Option<String>,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub experience_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub optimized_resume: String,
    pub improvements: Vec<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("request to model failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model endpoint returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("model returned no content")]
    EmptyResponse,
}

#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisReport, AnalysisError>;
}

/// Azure OpenAI chat-completions backend
pub struct AzureOpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
}

impl AzureOpenAiBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to build HTTP client with custom timeout, using default client");
                Client::new()
            });

        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: api_version.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl AnalysisBackend for AzureOpenAiBackend {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisReport, AnalysisError> {
        let body = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(request),
                },
            ],
            max_completion_tokens: MAX_COMPLETION_TOKENS,
        };

        debug!(deployment = %self.deployment, "Sending resume to model");

        let response = self
            .client
            .post(self.chat_url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(AnalysisError::EmptyResponse)?;

        Ok(split_sections(&content))
    }
}

fn user_prompt(request: &AnalyzeRequest) -> String {
    let mut prompt = String::new();

    let context = [
        ("Target job title", &request.job_title),
        ("Industry", &request.industry),
        ("Experience level", &request.experience_level),
    ];
    for (label, value) in context {
        if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
            prompt.push_str(&format!("{}: {}\n", label, value.trim()));
        }
    }

    if let Some(job) = request.job_description.as_deref().filter(|j| !j.trim().is_empty()) {
        prompt.push_str(&format!("\nJob description:\n{}\n", job.trim()));
    }

    prompt.push_str(&format!("\nCurrent resume:\n{}\n", request.content.trim()));
    prompt
}

/// Split a model reply into resume, improvements and suggestions.
pub fn split_sections(content: &str) -> AnalysisReport {
    let normalized = content.replace("\r\n", "\n");
    let mut sections = SECTION_BREAK
        .split(normalized.trim())
        .map(str::trim)
        .filter(|section| !section.is_empty());

    let optimized_resume = sections.next().unwrap_or_default().to_string();
    let improvements = sections.next().map(list_items).unwrap_or_default();
    let suggestions = sections.next().map(list_items).unwrap_or_default();

    AnalysisReport {
        optimized_resume,
        improvements,
        suggestions,
    }
}

fn list_items(section: &str) -> Vec<String> {
    section
        .lines()
        .map(|line| BULLET.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[derive(Serialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}
