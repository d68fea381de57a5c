//! Retrieval: semantic search over the knowledge index.
//!
//! - Embeds the query with `TaskType::RetrievalQuery`
//! - Queries pgvector with cosine distance
//! - Returns the top-k chunks, most similar first

use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;

use crate::embeddings::EmbeddingBackend;
use crate::error::Result;
use crate::models::KnowledgeChunk;

/// Given a query, returns an ordered list of relevant text fragments.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>>;
}

pub struct PgVectorRetriever {
    pool: PgPool,
    backend: Arc<dyn EmbeddingBackend>,
    top_k: u32,
}

impl PgVectorRetriever {
    pub fn new(pool: PgPool, backend: Arc<dyn EmbeddingBackend>, top_k: u32) -> Self {
        Self {
            pool,
            backend,
            top_k: top_k.max(1),
        }
    }

    /// Nearest chunks to `query`, with score = 1 - cosine distance.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<KnowledgeChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.backend.embed_query(query).await?;
        let vector = Vector::from(embedding);

        let chunks = sqlx::query_as::<_, KnowledgeChunk>(
            r#"
            SELECT
                id,
                content,
                source,
                chunk_index,
                1 - (embedding <=> $1::vector) AS score,
                created_at
            FROM knowledge_chunks
            WHERE embedding IS NOT NULL
            ORDER BY embedding <=> $1::vector
            LIMIT $2
            "#,
        )
        .bind(&vector)
        .bind(limit.max(1) as i64)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(
            backend = self.backend.name(),
            hits = chunks.len(),
            top_score = ?chunks.first().map(|c| c.score),
            "Knowledge search finished"
        );

        Ok(chunks)
    }
}

#[async_trait]
impl Retriever for PgVectorRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<String>> {
        let chunks = self.search(query, self.top_k).await?;
        Ok(chunks.into_iter().map(|c| c.content).collect())
    }
}
