//! Chat-completion client abstraction and the OpenRouter adapter.

use crate::config::{AgentSettings, ProviderSettings};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Errors raised by chat providers.
#[derive(Debug, Error)]
pub enum ChatClientError {
    /// Provider could not be reached.
    #[error("Chat provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider rejected the request.
    #[error("Chat completion failed: {0}")]
    RequestFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed chat response: {0}")]
    InvalidResponse(String),
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instruction message.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
    /// Result of a tool invocation.
    Tool,
}

/// Message in the OpenAI chat wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text content; `None` for assistant turns that only call tools.
    #[serde(default)]
    pub content: Option<String>,
    /// Tool invocations requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Invocation this tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// System instruction.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// User turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Assistant turn without tool calls.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Tool result answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::text(Role::Tool, content)
        }
    }
}

/// Function call requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call identifier.
    pub id: String,
    /// Always `function`.
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    /// Function name and arguments.
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

/// Function name and JSON-encoded arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Arguments as a JSON document.
    #[serde(default, deserialize_with = "arguments_as_string")]
    pub arguments: String,
}

impl FunctionCall {
    /// Parse the arguments, yielding an empty object when they are not valid JSON.
    pub fn parsed_arguments(&self) -> Map<String, Value> {
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Some providers return arguments as an object rather than an encoded string.
fn arguments_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Interface implemented by chat-completion backends.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Return the assistant's next message. `tools` is empty when tool use is disabled.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ChatMessage, ChatClientError>;
}

/// Client for OpenRouter's OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenRouterChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    zero_data_retention: bool,
}

impl OpenRouterChatClient {
    /// Build a client for the configured provider and generation model.
    pub fn new(
        provider: &ProviderSettings,
        settings: &AgentSettings,
    ) -> Result<Self, ChatClientError> {
        let http = Client::builder()
            .user_agent("docrag/chat")
            .build()
            .map_err(|error| ChatClientError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: provider.base_url.clone(),
            api_key: provider.api_key.clone(),
            model: settings.model_name.clone(),
            temperature: settings.temperature,
            zero_data_retention: settings.zero_data_retention,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[Value]) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });
        if let Some(object) = body.as_object_mut() {
            if !tools.is_empty() {
                object.insert("tools".into(), Value::from(tools.to_vec()));
                object.insert("tool_choice".into(), Value::from("auto"));
            }
            if self.zero_data_retention {
                object.insert(
                    "provider".into(),
                    json!({ "data_collection": "deny", "zdr": true }),
                );
            }
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

#[async_trait]
impl ChatClient for OpenRouterChatClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ChatMessage, ChatClientError> {
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "Requesting chat completion"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request_body(messages, tools))
            .send()
            .await
            .map_err(|error| {
                ChatClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatClientError::RequestFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: CompletionResponse = response.json().await.map_err(|error| {
            ChatClientError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| ChatClientError::InvalidResponse("response contained no choices".into()))
    }
}
