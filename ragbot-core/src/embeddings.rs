//! Embeddings for the knowledge index.
//!
//! Provides an `EmbeddingBackend` trait and the Gemini implementation used both
//! by the ingest tool (`RETRIEVAL_DOCUMENT`) and by the retriever
//! (`RETRIEVAL_QUERY`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::RetrievalConfig;

/// Default Gemini embedding dimensions (matches `knowledge_chunks.embedding`)
pub const GEMINI_DIMENSIONS: usize = 768;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a document chunk for storage.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a search query. Backends that support task-type hints override
    /// this to use `RETRIEVAL_QUERY`. Defaults to calling `embed()`.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(text).await
    }

    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Task type for embedding API
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing API key")]
    MissingApiKey,
}

impl EmbeddingError {
    /// Network failures, rate limits and server errors are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Http(_) => true,
            EmbeddingError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl EmbeddingConfig {
    pub fn new(api_key: Option<String>, model: String, dimensions: usize) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model,
            dimensions,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }

    pub fn from_retrieval(config: &RetrievalConfig, api_key: Option<String>) -> Self {
        Self::new(
            api_key,
            config.embedding_model.clone(),
            config.embedding_dimensions as usize,
        )
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    model: String,
    content: GeminiContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_type: Option<TaskType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    embedding: GeminiEmbedding,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorResponse {
    pub(crate) error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorDetail {
    pub(crate) code: u16,
    pub(crate) message: String,
}

/// Extract `(code, message)` from a Gemini error body, falling back to the raw body.
pub(crate) fn parse_api_error(status: u16, body: String) -> (u16, String) {
    serde_json::from_str::<GeminiErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error)
        .map(|e| (e.code, e.message))
        .unwrap_or((status, body))
}

// ============================================================================
// GeminiEmbeddingClient
// ============================================================================

/// Gemini embedding client: calls the `embedContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
    base_url: String,
}

impl GeminiEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Self::with_base_url(
            config,
            "https://generativelanguage.googleapis.com/v1beta".to_string(),
        )
    }

    /// Create a client with a custom base URL (for testing / proxies)
    pub fn with_base_url(
        config: EmbeddingConfig,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        if config.api_key.is_empty() {
            return Err(EmbeddingError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Generate an embedding with a specific task type, retrying transient failures.
    pub async fn embed_with_task(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.embed_once(text, task_type),
            EmbeddingError::is_transient,
        )
        .await
        .map_err(|e| {
            tracing::error!(
                retries = self.config.max_retries,
                error = %e,
                "Embedding request failed"
            );
            e
        })
    }

    async fn embed_once(
        &self,
        text: &str,
        task_type: TaskType,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = GeminiRequest {
            model: format!("models/{}", self.config.model),
            content: GeminiContent {
                parts: vec![GeminiPart {
                    text: text.to_string(),
                }],
            },
            task_type: Some(task_type),
            output_dimensionality: Some(self.config.dimensions),
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = parse_api_error(status.as_u16(), error_body);

            tracing::warn!(code = code, message = %message, "Gemini embedding API error");

            return Err(EmbeddingError::Api { code, message });
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let values = gemini_response.embedding.values;

        if values.len() != self.config.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.config.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for GeminiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_task(text, TaskType::RetrievalQuery).await
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            api_key: api_key.to_string(),
            model: "gemini-embedding-001".to_string(),
            dimensions: GEMINI_DIMENSIONS,
            max_retries: 3,
            retry_delay_ms: 10,
        }
    }

    fn mock_embedding_response() -> serde_json::Value {
        let values: Vec<f32> = (0..768).map(|i| (i as f32) / 768.0).collect();
        serde_json::json!({
            "embedding": {
                "values": values
            }
        })
    }

    #[tokio::test]
    async fn test_embed_query_sends_retrieval_query_task() {
        let mock_server = MockServer::start().await;
        let client = GeminiEmbeddingClient::with_base_url(test_config("k"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/models/gemini-embedding-001:embedContent"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "model": "models/gemini-embedding-001",
                "content": { "parts": [{ "text": "where did jaesik study?" }] },
                "taskType": "RETRIEVAL_QUERY",
                "outputDimensionality": 768
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let embedding = client.embed_query("where did jaesik study?").await.unwrap();
        assert_eq!(embedding.len(), 768);
    }

    #[tokio::test]
    async fn test_embed_sends_retrieval_document_task() {
        let mock_server = MockServer::start().await;
        let client = GeminiEmbeddingClient::with_base_url(test_config("k"), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "model": "models/gemini-embedding-001",
                "content": { "parts": [{ "text": "Q: hobby?\nA: cycling" }] },
                "taskType": "RETRIEVAL_DOCUMENT",
                "outputDimensionality": 768
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .mount(&mock_server)
            .await;

        let backend: Box<dyn EmbeddingBackend> = Box::new(client);
        let embedding = backend.embed("Q: hobby?\nA: cycling").await.unwrap();
        assert_eq!(embedding.len(), 768);
        assert_eq!(backend.dimensions(), 768);
        assert_eq!(backend.name(), "gemini");
    }

    #[tokio::test]
    async fn test_embed_returns_api_error_after_retries_on_500() {
        let mock_server = MockServer::start().await;
        let client = GeminiEmbeddingClient::with_base_url(test_config("k"), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal server error" }
            })))
            .expect(4)
            .mount(&mock_server)
            .await;

        match client.embed("hello world").await {
            Err(EmbeddingError::Api { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message, "Internal server error");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embed_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = GeminiEmbeddingClient::with_base_url(test_config("k"), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .mount(&mock_server)
            .await;

        let embedding = client.embed("hello world").await.expect("success after retry");
        assert_eq!(embedding.len(), 768);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let mock_server = MockServer::start().await;
        let client = GeminiEmbeddingClient::with_base_url(test_config("k"), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad input"))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.embed("hello").await {
            Err(EmbeddingError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "bad input");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embed_returns_error_on_wrong_dimensions() {
        let mock_server = MockServer::start().await;
        let client = GeminiEmbeddingClient::with_base_url(test_config("k"), mock_server.uri())
            .unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": { "values": [0.1, 0.2, 0.3] }
            })))
            .mount(&mock_server)
            .await;

        match client.embed("hello world").await {
            Err(EmbeddingError::InvalidDimensions { expected, actual }) => {
                assert_eq!(expected, 768);
                assert_eq!(actual, 3);
            }
            other => panic!("Expected InvalidDimensions, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        match GeminiEmbeddingClient::new(test_config("")) {
            Err(EmbeddingError::MissingApiKey) => {}
            other => panic!("Expected MissingApiKey, got {:?}", other),
        }
    }
}
