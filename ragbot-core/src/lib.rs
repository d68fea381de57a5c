pub mod answer;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod gating;
pub mod generation;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod store;
pub mod usage;

pub use answer::{AnswerGenerator, RagAnswerGenerator};
pub use config::RagbotConfig;
pub use embeddings::{
    EmbeddingBackend, EmbeddingConfig, EmbeddingError, GeminiEmbeddingClient, GEMINI_DIMENSIONS,
};
pub use error::RagbotError;
pub use gating::{AskOutcome, GatingOptions, GatingPipeline, INACTIVE_REFUSAL, QUOTA_REFUSAL};
pub use generation::{ChatModelConfig, GeminiChatClient, GenerationError, LanguageModel};
pub use prompt::PromptTemplate;
pub use retrieval::{PgVectorRetriever, Retriever};
pub use store::{MemorySessionStore, PgSessionStore, SessionStore};
pub use usage::UsageCounter;
