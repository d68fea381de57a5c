use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile captured at registration (`users` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub session_id: String,
    pub name: String,
    pub job: String,
    pub company: String,
    pub country: String,
}

/// Activation flag of a registered session (`chatbot_state` row).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionState {
    pub session_id: String,
    pub active: bool,
    pub activated_at: DateTime<Utc>,
}
