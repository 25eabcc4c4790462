//! Agent response and error types.

use super::{chat::ChatClientError, memory::ConversationStoreError};
use serde::Serialize;
use thiserror::Error;

/// Answer produced for one user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentResponse {
    /// Natural-language answer, or the refusal sentence.
    pub answer: String,
    /// Distinct filenames of every chunk retrieved during the turn.
    pub sources: Vec<String>,
    /// Number of retrieval calls issued.
    pub searches: usize,
    /// Conversation thread the turn was stored under, when memory is enabled.
    pub thread_id: Option<String>,
}

/// Errors emitted while answering a question.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The question was blank.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// The chat provider failed.
    #[error("generation failed: {0}")]
    Chat(#[from] ChatClientError),
    /// Conversation memory could not be read or written.
    #[error("conversation memory error: {0}")]
    Memory(#[from] ConversationStoreError),
}
