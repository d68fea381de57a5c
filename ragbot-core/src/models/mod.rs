pub mod chunk;
pub mod message;
pub mod session;

pub use chunk::{KnowledgeChunk, NewChunk};
pub use message::{ChatMessage, Sender};
pub use session::{SessionState, UserProfile};
