//! Shared fixtures for tool tests: a store, a conversation and a scripted
//! process controller that records what it was asked to do.

use async_trait::async_trait;
use procloom_core::content::{ContentRef, ContentStore};
use procloom_core::error::{ProcessError, ToolError};
use procloom_core::event::EventBus;
use procloom_core::message::Conversation;
use procloom_core::process::{FinalResult, ProcessControl};
use procloom_core::tool::{Tool, ToolContext, ToolResult};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockControl {
    linked: Vec<String>,
    spawned: Mutex<Vec<(String, Vec<String>)>>,
    forked: Mutex<Vec<(usize, String)>>,
}

impl MockControl {
    /// `(program, preloaded refs)` per spawn call.
    pub fn spawned(&self) -> Vec<(String, Vec<String>)> {
        self.spawned.lock().unwrap().clone()
    }

    /// `(history length, prompt)` per fork call.
    pub fn forked(&self) -> Vec<(usize, String)> {
        self.forked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessControl for MockControl {
    async fn fork(
        &self,
        conversation: &Conversation,
        _store: &ContentStore,
        _bus: &EventBus,
        _call_id: &str,
        prompt: String,
    ) -> Result<FinalResult, ProcessError> {
        self.forked.lock().unwrap().push((conversation.len(), prompt.clone()));
        if prompt == "fail" {
            return Err(ProcessError::ForkDepthExceeded { depth: 2, limit: 1 });
        }
        Ok(FinalResult {
            text: format!("fork copy answered: {prompt}"),
            turns: 1,
            api_calls: 1,
            ..Default::default()
        })
    }

    async fn spawn(
        &self,
        program: &str,
        query: String,
        store: &ContentStore,
        refs: &[ContentRef],
    ) -> Result<FinalResult, ProcessError> {
        let mut child = ContentStore::new();
        store.copy_refs_into(refs, &mut child)?;
        self.spawned
            .lock()
            .unwrap()
            .push((program.to_string(), refs.iter().map(ToString::to_string).collect()));
        if program == "broken" {
            return Err(ProcessError::Configuration("broken program".into()));
        }
        Ok(FinalResult {
            text: format!("{program} answered: {query}"),
            turns: 1,
            api_calls: 1,
            ..Default::default()
        })
    }

    fn linked_programs(&self) -> Vec<(String, String)> {
        self.linked
            .iter()
            .map(|name| (name.clone(), format!("The {name} program")))
            .collect()
    }

    fn depth(&self) -> usize {
        0
    }
}

pub struct Harness {
    pub store: ContentStore,
    pub conversation: Conversation,
    pub bus: EventBus,
    pub control: MockControl,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: ContentStore::new(),
            conversation: Conversation::new(),
            bus: EventBus::new(),
            control: MockControl::default(),
        }
    }

    pub fn with_linked(mut self, program: &str) -> Self {
        self.control.linked.push(program.to_string());
        self
    }

    pub async fn run(&mut self, tool: &dyn Tool, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let mut ctx = ToolContext {
            store: &mut self.store,
            conversation: &self.conversation,
            bus: &self.bus,
            process: &self.control,
            call_id: "call_test",
        };
        tool.execute(arguments, &mut ctx).await
    }
}
