//! Service wiring: turns a `RagbotConfig` and a pool into a ready `GatingPipeline`.

use std::sync::Arc;

use ragbot_core::{
    AnswerGenerator, ChatModelConfig, EmbeddingBackend, EmbeddingConfig, GatingOptions,
    GatingPipeline, GeminiChatClient, GeminiEmbeddingClient, LanguageModel, PgSessionStore,
    PgVectorRetriever, PromptTemplate, RagAnswerGenerator, RagbotConfig, RagbotError, Retriever,
    SessionStore,
};
use sqlx::PgPool;

/// Gemini key from `GOOGLE_API_KEY`; empty values count as unset.
pub fn api_key_from_env() -> Option<String> {
    std::env::var("GOOGLE_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
}

/// Retriever + Gemini chat model + prompt template.
pub fn build_answer_generator(
    config: &RagbotConfig,
    pool: PgPool,
    api_key: Option<String>,
) -> Result<RagAnswerGenerator, RagbotError> {
    let embedder: Arc<dyn EmbeddingBackend> = Arc::new(GeminiEmbeddingClient::with_base_url(
        EmbeddingConfig::from_retrieval(&config.retrieval, api_key.clone()),
        config.retrieval.base_url.clone(),
    )?);
    let retriever: Arc<dyn Retriever> = Arc::new(PgVectorRetriever::new(
        pool,
        embedder,
        config.retrieval.top_k,
    ));

    let model: Arc<dyn LanguageModel> = Arc::new(GeminiChatClient::with_base_url(
        ChatModelConfig::from_generation(&config.generation, api_key),
        config.generation.base_url.clone(),
    )?);

    let prompt = PromptTemplate::load(config.generation.prompt_path.as_deref())?;
    if let Some(path) = &config.generation.prompt_path {
        tracing::info!(path = %path, "Loaded prompt template");
    }

    Ok(RagAnswerGenerator::new(retriever, model, prompt))
}

/// Postgres-backed pipeline with the configured quota and timeout.
pub fn build_pipeline(
    config: &RagbotConfig,
    pool: PgPool,
    api_key: Option<String>,
) -> Result<GatingPipeline, RagbotError> {
    let generator: Arc<dyn AnswerGenerator> =
        Arc::new(build_answer_generator(config, pool.clone(), api_key)?);
    let store: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool));

    let options = GatingOptions::from(&config.gating);
    tracing::info!(
        store = store.name(),
        max_questions = options.max_questions,
        answer_timeout_secs = options.answer_timeout.as_secs(),
        top_k = config.retrieval.top_k,
        model = %config.generation.model,
        "Gating pipeline ready"
    );

    Ok(GatingPipeline::new(store, generator, options))
}
