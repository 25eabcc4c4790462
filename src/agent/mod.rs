//! Query stage: prompting, tool-calling or fixed retrieval, and conversation memory.

pub mod chat;
pub mod memory;
pub mod prompt;
mod service;
mod types;

pub use chat::{ChatClient, ChatClientError, ChatMessage, OpenRouterChatClient, Role};
pub use memory::{
    ConversationState, ConversationStore, ConversationStoreError, FileConversationStore,
    InMemoryConversationStore,
};
pub use prompt::REFUSAL_SENTENCE;
pub use service::{IndexRetriever, RagAgent, Retriever};
pub use types::{AgentError, AgentResponse};
