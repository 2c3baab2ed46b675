//! Process lifecycle types and the process-control capability.
//!
//! `ProcessControl` is how a running tool reaches back into the factory that
//! created its process, without the tool knowing anything about engines.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::Usage;
use crate::content::{ContentRef, ContentStore};
use crate::error::ProcessError;
use crate::event::EventBus;
use crate::message::Conversation;

/// Lifecycle state of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Idle,
    AwaitingModel,
    AwaitingTools,
    Done,
    Failed,
}

impl ProcessState {
    /// States a new `run` may start from.
    pub fn can_run(self) -> bool {
        matches!(self, Self::Idle | Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting_model",
            Self::AwaitingTools => "awaiting_tools",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a completed `run` hands back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    /// The model's final text response
    pub text: String,

    /// Backend round-trips in this run
    pub turns: u32,

    /// Tool invocations dispatched in this run
    pub tool_calls: u32,

    /// Backend calls made (equal to `turns` unless a hook aborted a turn)
    pub api_calls: u32,

    /// Token usage summed over every backend call
    pub usage: Usage,

    pub elapsed_ms: u64,
}

impl FinalResult {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// Spawn/fork entry point exposed to tools.
///
/// Implementations never hand out a live reference to the calling process;
/// everything a child needs is copied from the arguments.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Duplicate the calling process from `conversation`/`store`, inject
    /// `prompt` as the child's next input and run it to completion.
    ///
    /// The child is attached to the same plugins as `bus`. `call_id`
    /// identifies the tool call that asked for the fork; the child sees that
    /// call answered with a marker telling it that it is the copy.
    async fn fork(
        &self,
        conversation: &Conversation,
        store: &ContentStore,
        bus: &EventBus,
        call_id: &str,
        prompt: String,
    ) -> Result<FinalResult, ProcessError>;

    /// Start a fresh process for `program`, preload `refs` from `store` into
    /// it and run `query` to completion.
    async fn spawn(
        &self,
        program: &str,
        query: String,
        store: &ContentStore,
        refs: &[ContentRef],
    ) -> Result<FinalResult, ProcessError>;

    /// `(name, description)` of every program `spawn` may target.
    fn linked_programs(&self) -> Vec<(String, String)>;

    /// Fork depth of the calling process (0 for a root process).
    fn depth(&self) -> usize;
}

/// `ProcessControl` for contexts with no factory behind them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

#[async_trait]
impl ProcessControl for Detached {
    async fn fork(
        &self,
        _conversation: &Conversation,
        _store: &ContentStore,
        _bus: &EventBus,
        _call_id: &str,
        _prompt: String,
    ) -> Result<FinalResult, ProcessError> {
        Err(ProcessError::Configuration("process is detached from any factory".into()))
    }

    async fn spawn(
        &self,
        program: &str,
        _query: String,
        _store: &ContentStore,
        _refs: &[ContentRef],
    ) -> Result<FinalResult, ProcessError> {
        Err(ProcessError::UnknownProgram(program.to_string()))
    }

    fn linked_programs(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn depth(&self) -> usize {
        0
    }
}
