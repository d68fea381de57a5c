use ragbot_core::EmbeddingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Unknown input format '{0}' (expected qa, paragraphs or json)")]
    UnknownFormat(String),

    #[error("Invalid Q&A JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
