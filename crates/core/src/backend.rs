//! Model backend capability: send a conversation, get back text or tool calls.
//!
//! The engine never knows which vendor sits behind a `ModelBackend`.
//! Implementations own their retry and timeout policy; when `complete`
//! returns an error the engine treats it as final for the current run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::message::{Message, MessageToolCall};

/// Everything a backend needs for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// Model identifier, passed through untouched
    pub model: String,

    /// The full conversation so far
    pub messages: Vec<Message>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tool schemas, in registration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

/// Structural description of one tool, handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A completed backend call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    /// The assistant message (text, tool calls, or both)
    pub message: Message,

    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

impl BackendResponse {
    /// Tool invocations requested by this response, in backend order.
    pub fn tool_calls(&self) -> &[MessageToolCall] {
        &self.message.tool_calls
    }

    /// A response with no tool calls ends the run.
    pub fn is_final(&self) -> bool {
        self.message.tool_calls.is_empty()
    }
}

/// Token usage reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// The model backend trait.
///
/// Implementations must be idempotent with respect to retries: sending the
/// same request twice must not corrupt anything on the backend side.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// A human-readable name (e.g. "openrouter", "scripted").
    fn name(&self) -> &str;

    /// Send a request and wait for the complete response.
    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> Result<bool, BackendError> {
        Ok(true)
    }
}
