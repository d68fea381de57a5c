use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::SessionStore;
use crate::error::{RagbotError, Result};
use crate::models::{ChatMessage, Sender, SessionState, UserProfile};

/// In-process session backend with the same contract as the Postgres store,
/// including the unknown-session check. Nothing survives the process.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserProfile>,
    states: HashMap<String, SessionState>,
    messages: Vec<ChatMessage>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn profile(&self, session_id: &str) -> Option<UserProfile> {
        self.inner.lock().await.users.get(session_id).cloned()
    }

    pub async fn state(&self, session_id: &str) -> Option<SessionState> {
        self.inner.lock().await.states.get(session_id).cloned()
    }

    /// Full transcript of a session in insertion order.
    pub async fn transcript(&self, session_id: &str) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .await
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn register(&self, profile: &UserProfile) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .users
            .insert(profile.session_id.clone(), profile.clone());
        inner.states.insert(
            profile.session_id.clone(),
            SessionState {
                session_id: profile.session_id.clone(),
                active: true,
                activated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn is_active(&self, session_id: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.states.get(session_id).map(|s| s.active).unwrap_or(false))
    }

    async fn deactivate(&self, session_id: &str) -> Result<()> {
        if let Some(state) = self.inner.lock().await.states.get_mut(session_id) {
            state.active = false;
        }
        Ok(())
    }

    async fn session_state(&self, session_id: &str) -> Result<Option<SessionState>> {
        Ok(self.state(session_id).await)
    }

    async fn append_message(
        &self,
        session_id: &str,
        sender: Sender,
        body: &str,
    ) -> Result<ChatMessage> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(session_id) {
            return Err(RagbotError::UnknownSession(session_id.to_string()));
        }

        let message = ChatMessage {
            id: inner.messages.len() as i64 + 1,
            session_id: session_id.to_string(),
            sender,
            message: body.to_string(),
            created_at: Utc::now(),
        };
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(&self, session_id: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.lock().await;
        let mut recent: Vec<ChatMessage> = inner
            .messages
            .iter()
            .rev()
            .filter(|m| m.session_id == session_id)
            .take(limit as usize)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn message_count(&self, session_id: &str) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .count() as i64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
