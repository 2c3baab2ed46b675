//! Backend for any endpoint speaking the OpenAI `/chat/completions` dialect
//! with function calling: OpenAI, OpenRouter, Ollama, vLLM, llama.cpp.
//!
//! Requests are serialized straight from borrowed conversation messages.
//! HTTP statuses are mapped onto [`BackendError`] so the retry wrapper can
//! tell transient failures from permanent ones.

use async_trait::async_trait;
use procloom_core::backend::{BackendRequest, BackendResponse, ModelBackend, ToolDefinition, Usage};
use procloom_core::error::BackendError;
use procloom_core::message::{Message, MessageToolCall, Role};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Fallback when a 429 carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: http_client(DEFAULT_TIMEOUT),
        }
    }

    /// Per-request HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Could not apply HTTP client settings, using defaults");
            reqwest::Client::new()
        })
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(e.to_string())
    } else {
        BackendError::Network(e.to_string())
    }
}

/// Map a non-success status onto the error the retry policy understands.
fn status_error(status: u16, retry_after: Option<&str>, body: String, model: &str) -> BackendError {
    match status {
        429 => BackendError::RateLimited {
            retry_after_secs: retry_after
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        401 | 403 => BackendError::AuthenticationFailed(if body.is_empty() {
            format!("status {status}")
        } else {
            body
        }),
        404 => BackendError::ModelNotFound(model.to_string()),
        _ => BackendError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let body = ChatRequest::new(&request);
        debug!(
            backend = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat completion"
        );

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let text = response.text().await.unwrap_or_default();
            warn!(backend = %self.name, status = status.as_u16(), body = %text, "Chat completion rejected");
            return Err(status_error(status.as_u16(), retry_after.as_deref(), text, &request.model));
        }

        let decoded: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("undecodable completion: {e}")))?;
        decoded.into_backend_response()
    }

    /// `GET /models` answering 2xx.
    async fn health_check(&self) -> Result<bool, BackendError> {
        let response = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status().is_success())
    }
}

// --- wire format ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(request: &'a BackendRequest) -> Self {
        Self {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools.iter().map(WireTool::from).collect(),
            stream: false,
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    /// `null` for an assistant turn that only calls tools
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(m: &'a Message) -> Self {
        let tools_only = m.role == Role::Assistant && m.content.is_empty() && m.has_tool_calls();
        Self {
            role: m.role,
            content: (!tools_only).then_some(m.content.as_str()),
            tool_calls: m
                .tool_calls
                .iter()
                .map(|c| WireCall {
                    id: &c.id,
                    kind: "function",
                    function: WireFunction {
                        name: &c.name,
                        arguments: &c.arguments,
                    },
                })
                .collect(),
            tool_call_id: m.tool_call_id.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct WireCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

impl<'a> From<&'a ToolDefinition> for WireTool<'a> {
    fn from(function: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ReplyCall>,
}

#[derive(Deserialize)]
struct ReplyCall {
    id: String,
    function: ReplyFunction,
}

#[derive(Deserialize)]
struct ReplyFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl ChatResponse {
    fn into_backend_response(self) -> Result<BackendResponse, BackendError> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(BackendError::InvalidResponse("completion has no choices".into()));
        };
        let calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|c| MessageToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(BackendResponse {
            message: Message::assistant_with_tools(choice.message.content.unwrap_or_default(), calls),
            usage: self.usage,
            model: self.model,
        })
    }
}
