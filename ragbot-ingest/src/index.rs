//! Embeds chunks and writes them to `knowledge_chunks`.
//!
//! Embeddings are computed before the transaction opens, so a failing API call
//! never leaves a half-written source behind.

use std::collections::BTreeSet;

use pgvector::Vector;
use ragbot_core::models::NewChunk;
use ragbot_core::EmbeddingBackend;
use sqlx::PgPool;

use crate::error::IngestError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    /// Rows deleted because their source was replaced.
    pub replaced: u64,
}

/// Embed every chunk as a retrieval document, checking the vector width.
pub async fn embed_chunks(
    backend: &dyn EmbeddingBackend,
    chunks: &[NewChunk],
) -> Result<Vec<Vector>, IngestError> {
    let expected = backend.dimensions();
    let mut vectors = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let values = backend.embed(&chunk.content).await?;
        if values.len() != expected {
            return Err(IngestError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }
        vectors.push(Vector::from(values));

        tracing::debug!(
            source = %chunk.source,
            chunk_index = chunk.chunk_index,
            "Embedded chunk"
        );
    }

    Ok(vectors)
}

/// Insert `chunks`; with `replace`, first delete existing rows of the same
/// sources inside the same transaction.
pub async fn write_chunks(
    pool: &PgPool,
    backend: &dyn EmbeddingBackend,
    chunks: &[NewChunk],
    replace: bool,
) -> Result<IngestReport, IngestError> {
    let vectors = embed_chunks(backend, chunks).await?;
    let mut report = IngestReport::default();

    let mut tx = pool.begin().await?;

    if replace {
        let sources: BTreeSet<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        for source in sources {
            let deleted = sqlx::query("DELETE FROM knowledge_chunks WHERE source = $1")
                .bind(source)
                .execute(&mut *tx)
                .await?;
            report.replaced += deleted.rows_affected();
        }
    }

    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            r#"
            INSERT INTO knowledge_chunks (content, source, chunk_index, embedding)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&chunk.content)
        .bind(&chunk.source)
        .bind(chunk.chunk_index)
        .bind(vector)
        .execute(&mut *tx)
        .await?;
        report.inserted += 1;
    }

    tx.commit().await?;

    tracing::info!(
        inserted = report.inserted,
        replaced = report.replaced,
        backend = backend.name(),
        "Knowledge chunks written"
    );
    Ok(report)
}
