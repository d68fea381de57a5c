//! Hosted language model client.
//!
//! `LanguageModel` is the prompt-in, text-out seam used by the answer generator.
//! `GeminiChatClient` implements it over the Gemini `generateContent` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::GenerationConfig;
use crate::embeddings::parse_api_error;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Model returned no text (finish reason: {reason})")]
    EmptyResponse { reason: String },

    #[error("Missing API key")]
    MissingApiKey,
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Http(e) => !e.is_decode(),
            GenerationError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatModelConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub request_timeout: Duration,
}

impl ChatModelConfig {
    pub fn from_generation(config: &GenerationConfig, api_key: Option<String>) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            max_retries: 2,
            retry_delay_ms: 500,
            request_timeout: Duration::from_secs(120),
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationParams {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, GenerationError> {
        let block_reason = self.prompt_feedback.and_then(|f| f.block_reason);
        let candidate = match self.candidates.into_iter().next() {
            Some(c) => c,
            None => {
                return Err(GenerationError::EmptyResponse {
                    reason: block_reason.unwrap_or_else(|| "NO_CANDIDATES".to_string()),
                })
            }
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse {
                reason: candidate
                    .finish_reason
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
            });
        }
        Ok(text)
    }
}

// ============================================================================
// GeminiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiChatClient {
    client: Client,
    config: ChatModelConfig,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(config: ChatModelConfig) -> Result<Self, GenerationError> {
        Self::with_base_url(
            config,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    pub fn with_base_url(
        config: ChatModelConfig,
        base_url: String,
    ) -> Result<Self, GenerationError> {
        if config.api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn generate_once(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationParams {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = parse_api_error(status.as_u16(), error_body);
            tracing::warn!(code = code, message = %message, "Gemini generation API error");
            return Err(GenerationError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;
        body.into_text()
    }
}

#[async_trait]
impl LanguageModel for GeminiChatClient {
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.generate_once(prompt),
            GenerationError::is_transient,
        )
        .await
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}
