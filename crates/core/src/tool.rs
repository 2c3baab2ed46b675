//! Tool trait and registry: the callable capabilities of a process.
//!
//! Tools receive their JSON arguments plus a `ToolContext` giving access to
//! the owning process's content store, a read-only view of its conversation
//! and the process-control capability used by `spawn` and `fork`.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::ToolDefinition;
use crate::content::{ContentHandle, ContentStore};
use crate::error::{ToolError, ToolErrorKind};
use crate::event::EventBus;
use crate::message::{Conversation, MessageToolCall};
use crate::process::ProcessControl;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Parse the raw argument string the model produced.
    ///
    /// An empty string is treated as `{}`.
    pub fn from_message(call: &MessageToolCall) -> Result<Self, ToolError> {
        let raw = call.arguments.trim();
        let arguments = if raw.is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| {
                ToolError::InvalidArguments(format!("arguments for '{}' are not valid JSON: {e}", call.name))
            })?
        };
        Ok(Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        })
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for (stamped by the registry)
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Why the call failed, when it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorKind>,

    /// Set when the full output lives in the content store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ContentHandle>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
            data: None,
            error: None,
            handle: None,
        }
    }

    pub fn failure(error: &ToolError) -> Self {
        Self {
            call_id: String::new(),
            success: false,
            output: error.to_string(),
            data: None,
            error: Some(error.kind()),
            handle: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }
}

/// Runtime access handed to a tool for the duration of one call.
pub struct ToolContext<'a> {
    /// The calling process's content store
    pub store: &'a mut ContentStore,

    /// Snapshot of the conversation as of this call
    pub conversation: &'a Conversation,

    /// The calling process's plugins; forks re-attach them
    pub bus: &'a EventBus,

    /// Spawn/fork entry point back into the process factory
    pub process: &'a dyn ProcessControl,

    /// Correlation id of the call being executed
    pub call_id: &'a str,
}

/// The core Tool trait.
///
/// Built-in tools (`read_fd`, `fd_to_file`, `spawn`, `fork`) and user-defined
/// ones implement this trait and are registered in a `ToolRegistry`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "read_fd").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type ToolFn = dyn Fn(serde_json::Value) -> Result<String, ToolError> + Send + Sync;

/// A tool backed by a plain closure.
///
/// ```ignore
/// let upper = FnTool::new("upper", "Uppercase text", schema, |args| {
///     Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
/// });
/// ```
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    handler: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Result<String, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(handler),
        }
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        (self.handler)(arguments).map(ToolResult::success)
    }
}

/// Registry of the tools available to one process.
///
/// Names are bound once; schemas come back in registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<(String, Arc<dyn Tool>)>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        self.register_as(name, tool)
    }

    /// Register a tool under `name`, which may differ from the tool's own.
    pub fn register_as(&mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        debug!(tool = %name, target_tool = tool.name(), "Registered tool");
        self.index.insert(name.clone(), self.tools.len());
        self.tools.push((name, tool));
        Ok(())
    }

    /// Get a tool by its registered name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool definitions for the model, in registration order.
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|(name, tool)| {
                let mut def = tool.to_definition();
                def.name.clone_from(name);
                def
            })
            .collect()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call. Never fails: unknown tools, handler errors and
    /// panics all come back as a failed `ToolResult`.
    pub async fn invoke(&self, call: &ToolCall, ctx: &mut ToolContext<'_>) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return ToolResult::failure(&ToolError::UnknownTool(call.name.clone())).with_call_id(&call.id);
        };

        let outcome = AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!(tool = %call.name, error = %e, "Tool returned an error");
                ToolResult::failure(&e)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".to_string());
                warn!(tool = %call.name, %reason, "Tool panicked");
                ToolResult::failure(&ToolError::ExecutionFault {
                    tool_name: call.name.clone(),
                    reason,
                })
            }
        };
        result.with_call_id(&call.id)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
