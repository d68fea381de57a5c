//! Session Store: registered sessions, their activation flag and the
//! append-only transcript.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChatMessage, Sender, SessionState, UserProfile};

mod memory;
mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Upsert the profile and (re)activate the session with `activated_at = now`.
    async fn register(&self, profile: &UserProfile) -> Result<()>;

    /// Persisted `active` flag; `false` for sessions that were never registered.
    async fn is_active(&self, session_id: &str) -> Result<bool>;

    async fn deactivate(&self, session_id: &str) -> Result<()>;

    /// Activation row of the session, `None` if never registered.
    async fn session_state(&self, session_id: &str) -> Result<Option<SessionState>>;

    /// Append one transcript row. Fails for unregistered session identifiers.
    async fn append_message(
        &self,
        session_id: &str,
        sender: Sender,
        body: &str,
    ) -> Result<ChatMessage>;

    /// The last `limit` messages of the session, oldest first.
    async fn recent_messages(&self, session_id: &str, limit: u32) -> Result<Vec<ChatMessage>>;

    async fn message_count(&self, session_id: &str) -> Result<i64>;

    fn name(&self) -> &str;
}
