//! Shared test helpers for engine tests.

use async_trait::async_trait;
use procloom_config::ProgramConfig;
use procloom_core::backend::{BackendRequest, BackendResponse, ModelBackend, Usage};
use procloom_core::error::BackendError;
use procloom_core::message::{Message, MessageToolCall, Role};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// A backend that returns a sequence of scripted responses.
///
/// Every request is recorded. Once the script is exhausted, `complete` fails
/// with `InvalidResponse`.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<BackendResponse>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<BackendResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![text_response(text)])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BackendError::InvalidResponse(format!("script exhausted at call #{call}")))
    }
}

/// A backend that asks for the same tool on every call and never answers.
pub struct LoopingBackend {
    tool: String,
    calls: AtomicU32,
}

impl LoopingBackend {
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for LoopingBackend {
    fn name(&self) -> &str {
        "looping"
    }

    async fn complete(&self, _request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(tool_response(vec![tool_call(
            &format!("call_{n}"),
            &self.tool,
            serde_json::json!({}),
        )]))
    }
}

/// A backend that answers `"<prefix>: <last user message>"`.
pub struct EchoBackend {
    prefix: String,
}

impl EchoBackend {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_string() }
    }
}

#[async_trait]
impl ModelBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        Ok(text_response(&format!("{}: {}", self.prefix, last_user(&request))))
    }
}

/// Content of the most recent user message in a request.
pub fn last_user(request: &BackendRequest) -> &str {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a simple text response (no tool calls).
pub fn text_response(text: &str) -> BackendResponse {
    BackendResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Create a response that requests the given tool calls.
pub fn tool_response(calls: Vec<MessageToolCall>) -> BackendResponse {
    BackendResponse {
        message: Message::assistant_with_tools("", calls),
        usage: usage(),
        model: "mock-model".into(),
    }
}

pub fn tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// A program with no tools, no system prompt and the given turn limit.
pub fn bare_program(max_turns: u32) -> ProgramConfig {
    ProgramConfig {
        system_prompt: String::new(),
        max_turns,
        tools: Vec::new(),
        ..ProgramConfig::default()
    }
}
