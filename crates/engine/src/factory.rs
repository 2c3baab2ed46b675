//! Process creation: fresh processes, spawns and forks.
//!
//! A [`ProcessFactory`] is built once from the runtime configuration. It
//! prepares every program up front (tool registry, file descriptor plugin,
//! system prompt), so configuration mistakes surface at build time rather
//! than in the middle of a run.
//!
//! Processes reach back into the factory through [`ProcessLink`], the
//! `ProcessControl` handed to their tools. A link holds the factory and the
//! caller's program name and depth, never the calling process itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use procloom_config::{ProgramConfig, RuntimeConfig};
use procloom_core::backend::ModelBackend;
use procloom_core::content::{ContentRef, ContentStore};
use procloom_core::error::ProcessError;
use procloom_core::event::{EventBus, Plugin};
use procloom_core::message::{Conversation, Message, Role};
use procloom_core::paginate::Paginator;
use procloom_core::process::{FinalResult, ProcessControl};
use procloom_core::tool::{Tool, ToolRegistry};
use procloom_providers::{BackendRouter, build_from_config};
use tracing::{debug, info};

use crate::fd::FileDescriptorPlugin;
use crate::process::ProcessEngine;
use crate::prompt;

/// Answer given to the fork call inside the child's copy of the conversation.
pub const FORK_MARKER: &str = "You are a forked copy of the process that made this call. \
     Answer the prompt that follows; your final answer is returned to the original process.";

/// Answer given to calls that were still pending when the conversation was forked.
pub const FORK_SKIPPED: &str = "Not executed: the conversation was forked before this call ran.";

/// Everything needed to instantiate one program.
struct Prepared {
    config: ProgramConfig,
    tools: Arc<ToolRegistry>,
    fd: Arc<FileDescriptorPlugin>,
    linked: Vec<(String, String)>,
    system_prompt: String,
}

struct FactoryInner {
    config: RuntimeConfig,
    backends: BackendRouter,
    programs: BTreeMap<String, Prepared>,
    plugins: Vec<Arc<dyn Plugin>>,
}

/// Creates processes from named programs. Cheap to clone.
#[derive(Clone)]
pub struct ProcessFactory {
    inner: Arc<FactoryInner>,
}

/// Builder for [`ProcessFactory`].
pub struct ProcessFactoryBuilder {
    config: RuntimeConfig,
    backends: Option<BackendRouter>,
    tools: Vec<Arc<dyn Tool>>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ProcessFactoryBuilder {
    /// Use these backends instead of building them from the configuration.
    pub fn backends(mut self, router: BackendRouter) -> Self {
        self.backends = Some(router);
        self
    }

    /// Register one backend by name. Once any backend is registered this
    /// way, none are built from the configuration.
    pub fn backend(mut self, name: impl Into<String>, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.get_or_insert_with(BackendRouter::new).register(name, backend);
        self
    }

    /// Make a user-defined tool available. Programs enable it by name.
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Attach a plugin to every process. Plugins run in the order they are
    /// added, before the file descriptor plugin.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn build(self) -> Result<ProcessFactory, ProcessError> {
        self.config
            .validate()
            .map_err(|e| ProcessError::Configuration(e.to_string()))?;

        let backends = match self.backends {
            Some(router) => router,
            None => build_from_config(&self.config),
        };

        let mut extras: BTreeMap<String, Arc<dyn Tool>> = BTreeMap::new();
        for tool in self.tools {
            let name = tool.name().to_string();
            if procloom_tools::BUILTIN_TOOLS.contains(&name.as_str()) || extras.contains_key(&name) {
                return Err(ProcessError::Configuration(format!(
                    "tool name already registered: {name}"
                )));
            }
            extras.insert(name, tool);
        }

        let mut programs = BTreeMap::new();
        for (name, program) in &self.config.programs {
            if backends.get(&program.backend).is_none() {
                return Err(ProcessError::Configuration(format!(
                    "program '{name}' uses backend '{}', which is not available",
                    program.backend
                )));
            }
            let linked = program
                .linked_programs
                .iter()
                .map(|linked| {
                    let description = self
                        .config
                        .programs
                        .get(linked)
                        .map(|p| p.description.clone())
                        .unwrap_or_default();
                    (linked.clone(), description)
                })
                .collect::<Vec<_>>();
            let prepared = Prepared {
                tools: Arc::new(build_registry(name, program, &extras)?),
                fd: Arc::new(FileDescriptorPlugin::new(program.fd.clone())?),
                system_prompt: prompt::system_prompt(program, &linked),
                linked,
                config: program.clone(),
            };
            debug!(program = %name, tools = prepared.tools.len(), "Prepared program");
            programs.insert(name.clone(), prepared);
        }

        Ok(ProcessFactory {
            inner: Arc::new(FactoryInner {
                config: self.config,
                backends,
                programs,
                plugins: self.plugins,
            }),
        })
    }
}

/// Tool registry for one program. Aliases replace the name a tool is
/// exposed under; an alias for a tool the program does not list adds it.
fn build_registry(
    name: &str,
    program: &ProgramConfig,
    extras: &BTreeMap<String, Arc<dyn Tool>>,
) -> Result<ToolRegistry, ProcessError> {
    let paginator = Paginator::new(program.fd.page_size)?;
    let lookup = |tool: &str| {
        procloom_tools::builtin(tool, paginator)
            .or_else(|| extras.get(tool).cloned())
            .ok_or_else(|| ProcessError::Configuration(format!("program '{name}' enables unknown tool '{tool}'")))
    };
    let register = |registry: &mut ToolRegistry, exposed: &str, tool: Arc<dyn Tool>| {
        registry
            .register_as(exposed, tool)
            .map_err(|e| ProcessError::Configuration(format!("program '{name}': {e}")))
    };

    let mut registry = ToolRegistry::new();
    for tool in &program.tools {
        let exposed = prompt::exposed_name(program, tool).unwrap_or(tool);
        register(&mut registry, exposed, lookup(tool)?)?;
    }
    for (alias, target) in &program.aliases {
        if !program.tools.contains(target) {
            register(&mut registry, alias, lookup(target)?)?;
        }
    }
    Ok(registry)
}

impl ProcessFactory {
    pub fn builder(config: RuntimeConfig) -> ProcessFactoryBuilder {
        ProcessFactoryBuilder {
            config,
            backends: None,
            tools: Vec::new(),
            plugins: Vec::new(),
        }
    }

    /// Build with backends taken from the configuration.
    pub fn from_config(config: RuntimeConfig) -> Result<Self, ProcessError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Program names, sorted.
    pub fn programs(&self) -> Vec<&str> {
        self.inner.programs.keys().map(|s| s.as_str()).collect()
    }

    /// The tools a program exposes, in registration order.
    pub fn tools(&self, program: &str) -> Option<&ToolRegistry> {
        self.inner.programs.get(program).map(|p| p.tools.as_ref())
    }

    /// The system prompt a program starts with.
    pub fn system_prompt(&self, program: &str) -> Option<&str> {
        self.inner.programs.get(program).map(|p| p.system_prompt.as_str())
    }

    fn prepared(&self, program: &str) -> Result<&Prepared, ProcessError> {
        self.inner
            .programs
            .get(program)
            .ok_or_else(|| ProcessError::UnknownProgram(program.to_string()))
    }

    /// A fresh root process for `program`.
    pub fn create(&self, program: &str) -> Result<ProcessEngine, ProcessError> {
        self.instantiate(program, 0)
    }

    /// A fresh root process for the configured default program.
    pub fn create_default(&self) -> Result<ProcessEngine, ProcessError> {
        self.create(&self.inner.config.default_program)
    }

    fn instantiate(&self, program: &str, depth: usize) -> Result<ProcessEngine, ProcessError> {
        let prepared = self.prepared(program)?;
        let backend = self.inner.backends.resolve(&prepared.config.backend)?;

        let mut bus = EventBus::new();
        for plugin in &self.inner.plugins {
            bus.register(plugin.clone());
        }
        bus.register(prepared.fd.clone());

        let link = ProcessLink {
            factory: self.clone(),
            program: program.to_string(),
            depth,
        };
        let process = ProcessEngine::new(program, prepared.config.clone(), backend)
            .with_system_prompt(&prepared.system_prompt)
            .with_tools(prepared.tools.clone())
            .with_bus(bus)
            .with_control(Arc::new(link))
            .with_depth(depth);
        debug!(process_id = process.id(), program, depth, "Created process");
        Ok(process)
    }

    /// Duplicate `parent`: same program, a deep copy of its conversation
    /// a copy of its store and the same plugins. Parent and child are
    /// independent afterwards.
    pub fn fork(&self, parent: &ProcessEngine) -> Result<ProcessEngine, ProcessError> {
        self.fork_snapshot(
            parent.program(),
            parent.depth(),
            parent.conversation(),
            parent.store(),
            parent.bus(),
        )
    }

    fn fork_snapshot(
        &self,
        program: &str,
        parent_depth: usize,
        conversation: &Conversation,
        store: &ContentStore,
        bus: &EventBus,
    ) -> Result<ProcessEngine, ProcessError> {
        let limit = self.prepared(program)?.config.max_fork_depth;
        let depth = parent_depth + 1;
        if depth > limit {
            return Err(ProcessError::ForkDepthExceeded { depth, limit });
        }
        let mut child = self.instantiate(program, depth)?.with_bus(bus.clone());
        child.adopt(conversation, store);
        Ok(child)
    }

    /// Run `query` in a fresh process for `program`, preloaded with `refs`
    /// copied out of `source`.
    pub async fn spawn(
        &self,
        program: &str,
        query: String,
        source: &ContentStore,
        refs: &[ContentRef],
    ) -> Result<FinalResult, ProcessError> {
        let mut child = self.create(program)?;
        source.copy_refs_into(refs, child.store_mut())?;
        info!(
            process_id = child.id(),
            program,
            preloaded = refs.len(),
            "Spawned process"
        );
        child.run(query).await
    }
}

impl std::fmt::Debug for ProcessFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessFactory")
            .field("programs", &self.programs())
            .field("backends", &self.inner.backends)
            .finish_non_exhaustive()
    }
}

/// The `ProcessControl` a factory hands to each process it creates.
pub struct ProcessLink {
    factory: ProcessFactory,
    program: String,
    depth: usize,
}

#[async_trait]
impl ProcessControl for ProcessLink {
    async fn fork(
        &self,
        conversation: &Conversation,
        store: &ContentStore,
        bus: &EventBus,
        call_id: &str,
        prompt: String,
    ) -> Result<FinalResult, ProcessError> {
        let mut child = self
            .factory
            .fork_snapshot(&self.program, self.depth, conversation, store, bus)?;
        for message in pending_answers(conversation, call_id) {
            child.push_message(message);
        }
        info!(process_id = child.id(), program = %self.program, depth = child.depth(), "Forked process");
        child.run(prompt).await
    }

    async fn spawn(
        &self,
        program: &str,
        query: String,
        store: &ContentStore,
        refs: &[ContentRef],
    ) -> Result<FinalResult, ProcessError> {
        let linked = &self.factory.prepared(&self.program)?.linked;
        if !linked.iter().any(|(name, _)| name == program) {
            return Err(ProcessError::UnknownProgram(program.to_string()));
        }
        self.factory.spawn(program, query, store, refs).await
    }

    fn linked_programs(&self) -> Vec<(String, String)> {
        self.factory
            .prepared(&self.program)
            .map(|p| p.linked.clone())
            .unwrap_or_default()
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

/// Tool results closing out the last assistant turn of a forked snapshot:
/// the fork call gets [`FORK_MARKER`], anything else not yet answered gets
/// [`FORK_SKIPPED`].
fn pending_answers(conversation: &Conversation, call_id: &str) -> Vec<Message> {
    let Some(position) = conversation
        .messages
        .iter()
        .rposition(|m| m.role == Role::Assistant && m.has_tool_calls())
    else {
        return Vec::new();
    };
    let answered: Vec<&str> = conversation.messages[position + 1..]
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();

    conversation.messages[position]
        .tool_calls
        .iter()
        .filter(|call| !answered.contains(&call.id.as_str()))
        .map(|call| {
            let text = if call.id == call_id { FORK_MARKER } else { FORK_SKIPPED };
            Message::tool_result(&call.id, text)
        })
        .collect()
}
