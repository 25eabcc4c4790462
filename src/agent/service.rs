//! Retrieval-augmented question answering.

use super::{
    chat::{ChatClient, ChatMessage, ToolCall},
    memory::ConversationStore,
    prompt::{
        REFUSAL_SENTENCE, SEARCH_TOOL_NAME, fixed_system_prompt, format_context,
        search_tool_definition, tool_system_prompt,
    },
    types::{AgentError, AgentResponse},
};
use crate::config::{AgentMode, AgentSettings};
use crate::indexing::{IndexingService, ScoredChunk, VectorIndex};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Source of retrieved chunks for the agent.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `k` chunks relevant to `query`; empty when nothing relevant or retrieval failed.
    async fn retrieve(&self, query: &str, k: usize) -> Vec<ScoredChunk>;
}

/// [`Retriever`] searching one [`VectorIndex`] through the indexing service.
pub struct IndexRetriever {
    indexing: Arc<IndexingService>,
    index: VectorIndex,
}

impl IndexRetriever {
    /// Bind `index` to the service that embeds queries for it.
    pub fn new(indexing: Arc<IndexingService>, index: VectorIndex) -> Self {
        Self { indexing, index }
    }
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Vec<ScoredChunk> {
        self.indexing.search(&self.index, query, k).await
    }
}

/// Answers questions from retrieved document content.
///
/// In [`AgentMode::ToolCalling`] the model is offered a `search_documents` tool and decides
/// when to search, bounded by `max_steps` rounds. In [`AgentMode::FixedRetrieval`] one search
/// runs before the model is called and its results are injected into the system prompt.
pub struct RagAgent {
    chat: Arc<dyn ChatClient>,
    memory: Option<Arc<dyn ConversationStore>>,
    settings: AgentSettings,
    k: usize,
}

/// Bookkeeping for one user turn.
#[derive(Default)]
struct TurnRecord {
    searches: usize,
    sources: Vec<String>,
}

impl TurnRecord {
    fn record(&mut self, hits: &[ScoredChunk]) {
        self.searches += 1;
        for hit in hits {
            let filename = &hit.chunk.metadata.document.filename;
            if !self.sources.iter().any(|seen| seen == filename) {
                self.sources.push(filename.clone());
            }
        }
    }
}

impl RagAgent {
    /// Assemble an agent. `memory` is consulted only when `settings.memory_enabled` is set.
    pub fn new(
        chat: Arc<dyn ChatClient>,
        memory: Option<Arc<dyn ConversationStore>>,
        settings: AgentSettings,
        k: usize,
    ) -> Self {
        Self {
            chat,
            memory,
            settings,
            k: k.max(1),
        }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    fn memory(&self) -> Option<&Arc<dyn ConversationStore>> {
        if self.settings.memory_enabled {
            self.memory.as_ref()
        } else {
            None
        }
    }

    /// Answer `question` from chunks supplied by `retriever`.
    ///
    /// With memory enabled, prior turns of `thread_id` are replayed and the new turn appended;
    /// a fresh thread id is generated when none is given. Chat provider and memory errors
    /// propagate; retrieval failures surface as empty context.
    pub async fn answer(
        &self,
        question: &str,
        retriever: &dyn Retriever,
        thread_id: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AgentError::EmptyQuestion);
        }

        let thread_id = self.memory().map(|_| {
            thread_id
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string())
        });
        let history = match (self.memory(), thread_id.as_deref()) {
            (Some(store), Some(id)) => store.load(id).await?,
            _ => Vec::new(),
        };

        let mut turn = TurnRecord::default();
        let reply = match self.settings.mode {
            AgentMode::ToolCalling => {
                self.answer_with_tools(question, history, retriever, &mut turn)
                    .await?
            }
            AgentMode::FixedRetrieval => {
                self.answer_with_context(question, history, retriever, &mut turn)
                    .await?
            }
        };

        let answer = reply
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| REFUSAL_SENTENCE.to_string());

        if let (Some(store), Some(id)) = (self.memory(), thread_id.as_deref()) {
            store
                .append(
                    id,
                    vec![ChatMessage::user(question), ChatMessage::assistant(&answer)],
                )
                .await?;
        }

        tracing::info!(
            mode = ?self.settings.mode,
            searches = turn.searches,
            sources = turn.sources.len(),
            thread_id = thread_id.as_deref().unwrap_or("-"),
            "Question answered"
        );

        Ok(AgentResponse {
            answer,
            sources: turn.sources,
            searches: turn.searches,
            thread_id,
        })
    }

    async fn answer_with_tools(
        &self,
        question: &str,
        history: Vec<ChatMessage>,
        retriever: &dyn Retriever,
        turn: &mut TurnRecord,
    ) -> Result<Option<String>, AgentError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(tool_system_prompt()));
        messages.extend(history);
        messages.push(ChatMessage::user(question));
        let tools = [search_tool_definition()];

        for step in 0..self.settings.max_steps {
            let reply = self.chat.complete(&messages, &tools).await?;
            if reply.tool_calls.is_empty() {
                tracing::debug!(step = step + 1, "Agent produced final answer");
                return Ok(reply.content);
            }

            tracing::debug!(
                step = step + 1,
                max_steps = self.settings.max_steps,
                calls = reply.tool_calls.len(),
                "Agent requested tools"
            );
            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in &calls {
                let result = self.run_tool(call, question, retriever, turn).await;
                messages.push(ChatMessage::tool(call.id.clone(), result));
            }
        }

        tracing::warn!(
            max_steps = self.settings.max_steps,
            "Tool budget exhausted; requesting final answer without tools"
        );
        let reply = self.chat.complete(&messages, &[]).await?;
        Ok(reply.content)
    }

    async fn run_tool(
        &self,
        call: &ToolCall,
        question: &str,
        retriever: &dyn Retriever,
        turn: &mut TurnRecord,
    ) -> String {
        if call.function.name != SEARCH_TOOL_NAME {
            tracing::warn!(tool = %call.function.name, "Model requested unknown tool");
            return format!(
                "Unknown tool '{}'. The only available tool is {SEARCH_TOOL_NAME}.",
                call.function.name
            );
        }

        let arguments = call.function.parsed_arguments();
        let query = arguments
            .get("query")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .unwrap_or(question);
        let hits = retriever.retrieve(query, self.k).await;
        tracing::debug!(query, hits = hits.len(), "search_documents executed");
        turn.record(&hits);
        format_context(&hits)
    }

    async fn answer_with_context(
        &self,
        question: &str,
        history: Vec<ChatMessage>,
        retriever: &dyn Retriever,
        turn: &mut TurnRecord,
    ) -> Result<Option<String>, AgentError> {
        let hits = retriever.retrieve(question, self.k).await;
        turn.record(&hits);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(fixed_system_prompt(&format_context(&hits))));
        messages.extend(history);
        messages.push(ChatMessage::user(question));

        let reply = self.chat.complete(&messages, &[]).await?;
        Ok(reply.content)
    }
}
