//! The process loop.
//!
//! A [`ProcessEngine`] owns one conversation and one content store. `run`
//! feeds user input through the plugin bus, then alternates between the
//! model backend and tool dispatch until the model answers with plain text
//! or the turn limit is reached.

use std::sync::Arc;
use std::time::Instant;

use procloom_config::ProgramConfig;
use procloom_core::backend::{BackendRequest, ModelBackend};
use procloom_core::content::ContentStore;
use procloom_core::error::{ProcessError, ToolError};
use procloom_core::event::{EventBus, EventContext, Plugin};
use procloom_core::message::{Conversation, Message, MessageToolCall};
use procloom_core::process::{Detached, FinalResult, ProcessControl, ProcessState};
use procloom_core::tool::{ToolCall, ToolContext, ToolRegistry, ToolResult};
use serde_json::json;
use tracing::{debug, info, warn};

/// One running process: a conversation, a content store and the loop that
/// drives them.
pub struct ProcessEngine {
    id: String,

    /// Name of the program this process was created from
    program: String,

    config: ProgramConfig,

    backend: Arc<dyn ModelBackend>,

    tools: Arc<ToolRegistry>,

    bus: EventBus,

    store: ContentStore,

    conversation: Conversation,

    state: ProcessState,

    /// Spawn/fork entry point handed to tools
    control: Arc<dyn ProcessControl>,

    /// Fork depth (0 for a root process)
    depth: usize,

    /// Metrics summed over every run of this process
    totals: FinalResult,
}

impl ProcessEngine {
    /// Create an idle process with no tools, no plugins and no factory.
    pub fn new(program: impl Into<String>, config: ProgramConfig, backend: Arc<dyn ModelBackend>) -> Self {
        let conversation = Conversation::with_system(&config.system_prompt);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            program: program.into(),
            config,
            backend,
            tools: Arc::new(ToolRegistry::new()),
            bus: EventBus::new(),
            store: ContentStore::new(),
            conversation,
            state: ProcessState::Idle,
            control: Arc::new(Detached),
            depth: 0,
            totals: FinalResult::default(),
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Append a plugin to this process's bus.
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.bus.register(plugin);
        self
    }

    pub fn with_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Restart the conversation with a different system prompt.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.conversation = Conversation::with_system(prompt);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Mutable store access, for preloading content before a run.
    pub fn store_mut(&mut self) -> &mut ContentStore {
        &mut self.store
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Metrics summed over every run so far.
    pub fn totals(&self) -> &FinalResult {
        &self.totals
    }

    /// Replace conversation and store with a snapshot taken from another
    /// process. The conversation gets a fresh id.
    pub(crate) fn adopt(&mut self, conversation: &Conversation, store: &ContentStore) {
        let mut conversation = conversation.clone();
        conversation.id = Default::default();
        self.conversation = conversation;
        self.store = ContentStore::new();
        store.copy_into(&mut self.store);
    }

    /// Append a message outside of a run. Used to answer the pending tool
    /// calls of a forked snapshot.
    pub(crate) fn push_message(&mut self, message: Message) {
        self.conversation.push(message);
    }

    /// Feed `input` to the process and run until the model answers.
    ///
    /// On error the process moves to `Failed`, but everything appended so
    /// far stays in the conversation and `run` may be called again.
    pub async fn run(&mut self, input: impl Into<String>) -> Result<FinalResult, ProcessError> {
        let started = Instant::now();
        if !self.state.can_run() {
            debug!(process_id = %self.id, state = %self.state, "Previous run was interrupted");
        }
        info!(
            process_id = %self.id,
            program = %self.program,
            depth = self.depth,
            "Process run started"
        );

        let ctx = EventContext {
            process_id: &self.id,
            depth: self.depth,
            turn: 0,
        };
        let input = match self.bus.transform_input(&ctx, input.into(), &mut self.store) {
            Ok(input) => input,
            Err(e) => {
                self.state = ProcessState::Failed;
                warn!(process_id = %self.id, error = %e, "Input rejected");
                return Err(e.into());
            }
        };
        self.conversation.push(Message::user(input));

        self.drive(started).await
    }

    /// Continue from the current conversation without new input, e.g. after
    /// a backend failure.
    pub async fn resume(&mut self) -> Result<FinalResult, ProcessError> {
        info!(process_id = %self.id, program = %self.program, "Process resumed");
        self.drive(Instant::now()).await
    }

    async fn drive(&mut self, started: Instant) -> Result<FinalResult, ProcessError> {
        let mut run = FinalResult::default();
        let outcome = self.turns(&mut run).await;
        run.elapsed_ms = started.elapsed().as_millis() as u64;

        self.totals.turns += run.turns;
        self.totals.tool_calls += run.tool_calls;
        self.totals.api_calls += run.api_calls;
        self.totals.usage += run.usage;
        self.totals.elapsed_ms += run.elapsed_ms;

        match outcome {
            Ok(text) => {
                self.state = ProcessState::Done;
                self.totals.text = text.clone();
                run.text = text;
                info!(
                    process_id = %self.id,
                    turns = run.turns,
                    tool_calls = run.tool_calls,
                    elapsed_ms = run.elapsed_ms,
                    "Process run finished"
                );
                Ok(run)
            }
            Err(e) => {
                self.state = ProcessState::Failed;
                warn!(process_id = %self.id, turns = run.turns, error = %e, "Process run failed");
                Err(e)
            }
        }
    }

    async fn turns(&mut self, run: &mut FinalResult) -> Result<String, ProcessError> {
        let limit = self.config.max_turns;
        loop {
            if run.turns >= limit {
                return Err(ProcessError::TurnLimitExceeded { limit });
            }
            run.turns += 1;
            let turn = run.turns;

            self.state = ProcessState::AwaitingModel;
            debug!(process_id = %self.id, turn, messages = self.conversation.len(), "Calling backend");
            let request = BackendRequest {
                model: self.config.model.clone(),
                messages: self.conversation.messages.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                tools: self.tools.schemas(),
            };
            let response = self.backend.complete(request).await?;
            run.api_calls += 1;
            if let Some(usage) = response.usage {
                run.usage += usage;
            }

            let ctx = EventContext {
                process_id: &self.id,
                depth: self.depth,
                turn,
            };
            let mut message = response.message;
            if !message.content.is_empty() {
                message.content = self.bus.transform_response(&ctx, message.content, &mut self.store)?;
            }

            if message.tool_calls.is_empty() {
                let text = message.content.clone();
                self.bus.emit_response(&ctx, &text);
                self.conversation.push(message);
                return Ok(text);
            }

            self.state = ProcessState::AwaitingTools;
            let calls = message.tool_calls.clone();
            self.conversation.push(message);
            debug!(process_id = %self.id, turn, tool_count = calls.len(), "Dispatching tool calls");
            for (i, call) in calls.iter().enumerate() {
                run.tool_calls += 1;
                if let Err(e) = self.dispatch(turn, call).await {
                    self.answer_aborted(&calls[i..], &e);
                    return Err(e);
                }
            }
        }
    }

    /// Run one tool call and fold its result into the conversation.
    async fn dispatch(&mut self, turn: u32, requested: &MessageToolCall) -> Result<(), ProcessError> {
        let ctx = EventContext {
            process_id: &self.id,
            depth: self.depth,
            turn,
        };
        let parsed = ToolCall::from_message(requested);
        let call = match &parsed {
            Ok(call) => call.clone(),
            Err(_) => ToolCall {
                id: requested.id.clone(),
                name: requested.name.clone(),
                arguments: serde_json::Value::Null,
            },
        };

        self.bus.emit_tool_start(&ctx, &call);
        let result = match parsed {
            Ok(_) => {
                let mut tool_ctx = ToolContext {
                    store: &mut self.store,
                    conversation: &self.conversation,
                    bus: &self.bus,
                    process: self.control.as_ref(),
                    call_id: &call.id,
                };
                self.tools.invoke(&call, &mut tool_ctx).await
            }
            Err(e) => {
                debug!(tool = %call.name, error = %e, "Unparseable tool arguments");
                ToolResult::failure(&e).with_call_id(&call.id)
            }
        };

        let result = self.bus.transform_tool_result(&ctx, &call, result, &mut self.store)?;
        self.conversation.push(tool_message(&result));
        self.bus.emit_tool_end(&ctx, &call, &result);
        Ok(())
    }
}

impl ProcessEngine {
    /// Answer every call left open by an aborted turn, so the next request
    /// still pairs each assistant tool call with a tool message.
    fn answer_aborted(&mut self, calls: &[MessageToolCall], cause: &ProcessError) {
        for call in calls {
            let error = ToolError::ExecutionFault {
                tool_name: call.name.clone(),
                reason: format!("turn aborted: {cause}"),
            };
            let result = ToolResult::failure(&error).with_call_id(&call.id);
            self.conversation.push(tool_message(&result));
        }
    }
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("id", &self.id)
            .field("program", &self.program)
            .field("depth", &self.depth)
            .field("state", &self.state)
            .field("messages", &self.conversation.len())
            .field("handles", &self.store.len())
            .finish_non_exhaustive()
    }
}

fn tool_message(result: &ToolResult) -> Message {
    let content = if result.success {
        result.output.clone()
    } else {
        format!("Error: {}", result.output)
    };
    let mut message = Message::tool_result(&result.call_id, content);
    message.metadata.insert("success".into(), json!(result.success));
    if let Some(kind) = result.error {
        message.metadata.insert("error".into(), json!(kind));
    }
    if let Some(handle) = result.handle {
        message.metadata.insert("handle".into(), json!(handle));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use procloom_core::error::{HookError, ToolError};
    use procloom_core::event::{Observer, Transformer};
    use procloom_core::message::Role;
    use procloom_core::tool::FnTool;
    use std::sync::Mutex;

    fn echo_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(FnTool::new(
                "echo",
                "Echo text back",
                json!({"type": "object", "properties": {"text": {"type": "string"}}}),
                |args| Ok(args["text"].as_str().unwrap_or_default().to_string()),
            )))
            .unwrap();
        registry
            .register(Arc::new(FnTool::new("fail", "Always fails", json!({"type": "object"}), |_| {
                Err(ToolError::ExecutionFault {
                    tool_name: "fail".into(),
                    reason: "nope".into(),
                })
            })))
            .unwrap();
        Arc::new(registry)
    }

    /// Appends a marker to user input; records observational events.
    struct Marker {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Marker {
        fn name(&self) -> &str {
            self.name
        }
        fn observer(&self) -> Option<&dyn Observer> {
            Some(self)
        }
        fn transformer(&self) -> Option<&dyn Transformer> {
            Some(self)
        }
    }

    impl Observer for Marker {
        fn on_tool_start(&self, _ctx: &EventContext<'_>, call: &ToolCall) -> Result<(), HookError> {
            self.log.lock().unwrap().push(format!("{}:start:{}", self.name, call.name));
            Ok(())
        }
        fn on_tool_end(&self, _ctx: &EventContext<'_>, call: &ToolCall, _result: &ToolResult) -> Result<(), HookError> {
            self.log.lock().unwrap().push(format!("{}:end:{}", self.name, call.name));
            Ok(())
        }
        fn on_response(&self, _ctx: &EventContext<'_>, text: &str) -> Result<(), HookError> {
            self.log.lock().unwrap().push(format!("{}:response:{text}", self.name));
            Ok(())
        }
    }

    impl Transformer for Marker {
        fn transform_input(
            &self,
            _ctx: &EventContext<'_>,
            input: &str,
            _store: &mut ContentStore,
        ) -> Result<Option<String>, HookError> {
            Ok(Some(format!("{input}[{}]", self.name)))
        }
    }

    /// Rejects every tool result.
    struct Gate;

    impl Plugin for Gate {
        fn name(&self) -> &str {
            "gate"
        }
        fn transformer(&self) -> Option<&dyn Transformer> {
            Some(self)
        }
    }

    impl Transformer for Gate {
        fn transform_tool_result(
            &self,
            _ctx: &EventContext<'_>,
            _call: &ToolCall,
            _result: &ToolResult,
            _store: &mut ContentStore,
        ) -> Result<Option<ToolResult>, HookError> {
            Err(HookError::new("gate", "tool results are not allowed"))
        }
    }

    /// Observer that always faults.
    struct Grumpy;

    impl Plugin for Grumpy {
        fn name(&self) -> &str {
            "grumpy"
        }
        fn observer(&self) -> Option<&dyn Observer> {
            Some(self)
        }
    }

    impl Observer for Grumpy {
        fn on_response(&self, _ctx: &EventContext<'_>, _text: &str) -> Result<(), HookError> {
            Err(HookError::new("grumpy", "no"))
        }
    }

    #[tokio::test]
    async fn simple_text_response() {
        let backend = Arc::new(ScriptedBackend::single_text("Hello! How can I help?"));
        let config = ProgramConfig {
            system_prompt: "Be brief.".into(),
            ..bare_program(5)
        };
        let mut process = ProcessEngine::new("main", config, backend.clone());

        let result = process.run("Hello!").await.unwrap();
        assert_eq!(result.text, "Hello! How can I help?");
        assert_eq!(result.turns, 1);
        assert_eq!(result.api_calls, 1);
        assert_eq!(result.usage.total_tokens, 15);
        assert_eq!(process.state(), ProcessState::Done);
        // System + User + Assistant
        let roles: Vec<Role> = process.conversation().messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn tool_round_trip_appends_in_order() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response(vec![
                tool_call("c1", "echo", json!({"text": "one"})),
                tool_call("c2", "echo", json!({"text": "two"})),
            ]),
            text_response("done"),
        ]));
        let mut process = ProcessEngine::new("main", bare_program(5), backend.clone()).with_tools(echo_registry());

        let result = process.run("go").await.unwrap();
        assert_eq!(result.turns, 2);
        assert_eq!(result.tool_calls, 2);

        let messages = &process.conversation().messages;
        let tool_outputs: Vec<(&str, &str)> = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| (m.tool_call_id.as_deref().unwrap(), m.content.as_str()))
            .collect();
        assert_eq!(tool_outputs, vec![("c1", "one"), ("c2", "two")]);

        // The second request carried the tool schemas and both results
        let second = &backend.requests()[1];
        assert_eq!(second.tools.len(), 2);
        assert_eq!(second.tools[0].name, "echo");
        assert_eq!(second.messages.len(), 4);
    }

    #[tokio::test]
    async fn turn_limit_stops_a_looping_model() {
        let backend = Arc::new(LoopingBackend::new("echo"));
        let mut process = ProcessEngine::new("main", bare_program(3), backend.clone()).with_tools(echo_registry());

        let err = process.run("loop forever").await.unwrap_err();
        assert!(matches!(err, ProcessError::TurnLimitExceeded { limit: 3 }));
        assert_eq!(backend.calls(), 3);
        assert_eq!(process.state(), ProcessState::Failed);
        // user + 3 × (assistant + tool result) survive the failure
        assert_eq!(process.conversation().len(), 7);
        assert_eq!(process.totals().tool_calls, 3);
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_and_the_loop_continues() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response(vec![tool_call("c1", "nonexistent_tool", json!({}))]),
            text_response("recovered"),
        ]));
        let mut process = ProcessEngine::new("main", bare_program(5), backend).with_tools(echo_registry());

        let result = process.run("try it").await.unwrap();
        assert_eq!(result.text, "recovered");

        let failure = process
            .conversation()
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .unwrap();
        assert!(failure.content.starts_with("Error: Unknown tool"));
        assert_eq!(failure.metadata["error"], "unknown_tool");
        assert_eq!(failure.metadata["success"], false);
    }

    #[tokio::test]
    async fn tool_faults_and_bad_arguments_become_failed_results() {
        let mut bad_json = tool_call("c2", "echo", json!({}));
        bad_json.arguments = "{not json".into();
        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response(vec![tool_call("c1", "fail", json!({})), bad_json]),
            text_response("ok"),
        ]));
        let mut process = ProcessEngine::new("main", bare_program(5), backend).with_tools(echo_registry());

        process.run("go").await.unwrap();
        let errors: Vec<&serde_json::Value> = process
            .conversation()
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| &m.metadata["error"])
            .collect();
        assert_eq!(errors, vec![&json!("execution_fault"), &json!("invalid_arguments")]);
    }

    #[tokio::test]
    async fn input_transformers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(ScriptedBackend::single_text("ok"));
        let mut process = ProcessEngine::new("main", bare_program(5), backend.clone())
            .with_plugin(Arc::new(Marker { name: "p1", log: log.clone() }))
            .with_plugin(Arc::new(Marker { name: "p2", log: log.clone() }));

        process.run("input").await.unwrap();
        assert_eq!(last_user(&backend.requests()[0]), "input[p1][p2]");
        assert_eq!(*log.lock().unwrap(), vec!["p1:response:ok", "p2:response:ok"]);
    }

    #[tokio::test]
    async fn observers_see_each_tool_call_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response(vec![
                tool_call("c1", "echo", json!({"text": "a"})),
                tool_call("c2", "fail", json!({})),
            ]),
            text_response("fin"),
        ]));
        let mut process = ProcessEngine::new("main", bare_program(5), backend)
            .with_tools(echo_registry())
            .with_plugin(Arc::new(Marker { name: "m", log: log.clone() }));

        process.run("go").await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["m:start:echo", "m:end:echo", "m:start:fail", "m:end:fail", "m:response:fin"]
        );
    }

    #[tokio::test]
    async fn behavioral_fault_aborts_the_run_but_keeps_state() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            tool_response(vec![
                tool_call("c1", "echo", json!({"text": "x"})),
                tool_call("c2", "echo", json!({"text": "y"})),
            ]),
            text_response("second run"),
        ]));
        let mut process = ProcessEngine::new("main", bare_program(5), backend.clone())
            .with_tools(echo_registry())
            .with_plugin(Arc::new(Gate));

        let err = process.run("go").await.unwrap_err();
        assert!(matches!(err, ProcessError::HookFault(ref e) if e.plugin == "gate"));
        assert_eq!(process.state(), ProcessState::Failed);
        // user, assistant, then a failed answer for each call left open
        let messages = &process.conversation().messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("c2"));
        assert!(messages[2].content.starts_with("Error: "));
        assert!(messages[3].content.contains("gate"));

        // The process can be driven again afterwards
        let result = process.run("try again").await.unwrap();
        assert_eq!(result.text, "second run");
        assert_eq!(process.state(), ProcessState::Done);
        assert_eq!(backend.calls(), 2);

        let retry = &backend.requests()[1];
        let asked: Vec<&str> = retry
            .messages
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.as_str()))
            .collect();
        let answered: Vec<&str> = retry
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(asked, vec!["c1", "c2"]);
        assert_eq!(answered, asked);
        assert_eq!(
            retry.messages.iter().map(|m| m.role).collect::<Vec<_>>(),
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::User]
        );
    }

    #[tokio::test]
    async fn observer_faults_are_swallowed() {
        let backend = Arc::new(ScriptedBackend::single_text("fine"));
        let mut process = ProcessEngine::new("main", bare_program(5), backend).with_plugin(Arc::new(Grumpy));
        assert_eq!(process.run("hi").await.unwrap().text, "fine");
    }

    #[tokio::test]
    async fn backend_failure_can_be_resumed() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let mut process = ProcessEngine::new("main", bare_program(5), backend);

        let err = process.run("hello").await.unwrap_err();
        assert!(matches!(err, ProcessError::Backend(_)));
        assert_eq!(process.state(), ProcessState::Failed);
        assert_eq!(process.conversation().len(), 1);

        // resume never re-appends the input
        assert!(process.resume().await.is_err());
        assert_eq!(process.conversation().len(), 1);
    }

    #[tokio::test]
    async fn totals_accumulate_across_runs() {
        let backend = Arc::new(ScriptedBackend::new(vec![text_response("a"), text_response("b")]));
        let mut process = ProcessEngine::new("main", bare_program(5), backend);

        process.run("one").await.unwrap();
        process.run("two").await.unwrap();
        let totals = process.totals();
        assert_eq!(totals.turns, 2);
        assert_eq!(totals.api_calls, 2);
        assert_eq!(totals.usage.total_tokens, 30);
        assert_eq!(totals.text, "b");
        assert_eq!(process.conversation().len(), 4);
    }
}
