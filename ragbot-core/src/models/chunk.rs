use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A retrieved fragment of the vector index with its cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct KnowledgeChunk {
    pub id: i64,
    pub content: String,
    pub source: String,
    pub chunk_index: i32,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

/// A chunk waiting to be embedded and written by the ingest tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChunk {
    pub content: String,
    pub source: String,
    pub chunk_index: i32,
}
