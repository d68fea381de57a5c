use thiserror::Error;

use crate::embeddings::EmbeddingError;
use crate::generation::GenerationError;

#[derive(Error, Debug)]
pub enum RagbotError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Answer generation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = RagbotError> = std::result::Result<T, E>;
