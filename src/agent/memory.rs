//! Conversation memory keyed by thread id.

use super::chat::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// Errors raised by conversation stores.
#[derive(Debug, Error)]
pub enum ConversationStoreError {
    /// Thread ids are limited to ASCII letters, digits, `-`, and `_`.
    #[error("invalid thread id '{0}'")]
    InvalidThreadId(String),
    /// Reading or writing a persisted thread failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Thread file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted thread could not be decoded.
    #[error("conversation file {path} is corrupt: {message}")]
    Corrupt {
        /// Thread file.
        path: PathBuf,
        /// Decoder diagnostic.
        message: String,
    },
    /// The store's internal lock was poisoned.
    #[error("conversation store lock poisoned")]
    Poisoned,
}

/// Prior turns of one conversation thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Thread identifier.
    pub thread_id: String,
    /// User and assistant turns in order.
    pub messages: Vec<ChatMessage>,
}

/// Storage for conversation threads.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Prior turns for `thread_id`; empty when the thread is new.
    async fn load(&self, thread_id: &str) -> Result<Vec<ChatMessage>, ConversationStoreError>;

    /// Append turns to `thread_id`, creating the thread when needed.
    async fn append(
        &self,
        thread_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(), ConversationStoreError>;
}

fn validate_thread_id(thread_id: &str) -> Result<(), ConversationStoreError> {
    let valid = !thread_id.is_empty()
        && thread_id.len() <= 128
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConversationStoreError::InvalidThreadId(thread_id.to_string()))
    }
}

/// Threads kept for the lifetime of the process.
#[derive(Default)]
pub struct InMemoryConversationStore {
    threads: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryConversationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, thread_id: &str) -> Result<Vec<ChatMessage>, ConversationStoreError> {
        validate_thread_id(thread_id)?;
        let threads = self
            .threads
            .read()
            .map_err(|_| ConversationStoreError::Poisoned)?;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn append(
        &self,
        thread_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(), ConversationStoreError> {
        validate_thread_id(thread_id)?;
        self.threads
            .write()
            .map_err(|_| ConversationStoreError::Poisoned)?
            .entry(thread_id.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }
}

/// Threads persisted as `<directory>/<thread_id>.json`.
pub struct FileConversationStore {
    directory: PathBuf,
    // Serializes read-modify-write cycles on thread files.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileConversationStore {
    /// Store threads under `directory`, created on first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.directory.join(format!("{thread_id}.json"))
    }

    async fn read_state(&self, thread_id: &str) -> Result<ConversationState, ConversationStoreError> {
        let path = self.thread_path(thread_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConversationState {
                    thread_id: thread_id.to_string(),
                    messages: Vec::new(),
                });
            }
            Err(source) => return Err(ConversationStoreError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|error| ConversationStoreError::Corrupt {
            path,
            message: error.to_string(),
        })
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn load(&self, thread_id: &str) -> Result<Vec<ChatMessage>, ConversationStoreError> {
        validate_thread_id(thread_id)?;
        Ok(self.read_state(thread_id).await?.messages)
    }

    async fn append(
        &self,
        thread_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<(), ConversationStoreError> {
        validate_thread_id(thread_id)?;
        let _guard = self.write_lock.lock().await;

        let mut state = self.read_state(thread_id).await?;
        state.messages.extend(messages);

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| ConversationStoreError::Io {
                path: self.directory.clone(),
                source,
            })?;
        let path = self.thread_path(thread_id);
        let payload =
            serde_json::to_vec_pretty(&state).map_err(|error| ConversationStoreError::Corrupt {
                path: path.clone(),
                message: error.to_string(),
            })?;
        tokio::fs::write(&path, payload)
            .await
            .map_err(|source| ConversationStoreError::Io { path, source })?;
        tracing::debug!(thread_id, turns = state.messages.len(), "Conversation persisted");
        Ok(())
    }
}
