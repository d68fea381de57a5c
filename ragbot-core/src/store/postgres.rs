use async_trait::async_trait;
use sqlx::PgPool;

use super::SessionStore;
use crate::error::{RagbotError, Result};
use crate::models::{ChatMessage, Sender, SessionState, UserProfile};

/// Postgres implementation over `users`, `chatbot_state` and `chat_history`.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn register(&self, profile: &UserProfile) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (session_id, name, job, company, country)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id) DO UPDATE
            SET name = EXCLUDED.name,
                job = EXCLUDED.job,
                company = EXCLUDED.company,
                country = EXCLUDED.country
            "#,
        )
        .bind(&profile.session_id)
        .bind(&profile.name)
        .bind(&profile.job)
        .bind(&profile.company)
        .bind(&profile.country)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chatbot_state (session_id, active, activated_at)
            VALUES ($1, TRUE, now())
            ON CONFLICT (session_id) DO UPDATE
            SET active = TRUE, activated_at = now()
            "#,
        )
        .bind(&profile.session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn is_active(&self, session_id: &str) -> Result<bool> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT active FROM chatbot_state WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0).unwrap_or(false))
    }

    async fn deactivate(&self, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE chatbot_state SET active = FALSE WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn session_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        let state = sqlx::query_as::<_, SessionState>(
            "SELECT session_id, active, activated_at FROM chatbot_state WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    async fn append_message(
        &self,
        session_id: &str,
        sender: Sender,
        body: &str,
    ) -> Result<ChatMessage> {
        sqlx::query_as::<_, ChatMessage>(
            r#"
            INSERT INTO chat_history (session_id, sender, message)
            VALUES ($1, $2, $3)
            RETURNING id, session_id, sender, message, created_at
            "#,
        )
        .bind(session_id)
        .bind(sender)
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let orphan = e
                .as_database_error()
                .is_some_and(|db| db.is_foreign_key_violation());
            if orphan {
                RagbotError::UnknownSession(session_id.to_string())
            } else {
                RagbotError::Database(e)
            }
        })
    }

    async fn recent_messages(&self, session_id: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, session_id, sender, message, created_at
            FROM (
                SELECT id, session_id, sender, message, created_at
                FROM chat_history
                WHERE session_id = $1
                ORDER BY id DESC
                LIMIT $2
            ) recent
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn message_count(&self, session_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_history WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
