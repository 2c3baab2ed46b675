//! Plugin bus: observational and behavioral hooks around the process loop.
//!
//! A plugin exposes zero or more capabilities:
//! - [`Observer`] hooks see tool starts, tool ends and final responses. A
//!   fault is logged and the next plugin still runs.
//! - [`Transformer`] hooks may replace user input, tool results and
//!   responses. They run strictly in registration order, each seeing the
//!   previous plugin's output; a fault aborts the turn.
//!
//! [`EventStream`] is an observer that republishes everything on a
//! `tokio::sync::broadcast` channel for live consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::content::{ContentHandle, ContentStore};
use crate::error::HookError;
use crate::tool::{ToolCall, ToolResult};

/// Where in the loop a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    ToolStart,
    ToolEnd,
    Response,
    TransformInput,
    TransformToolResult,
    TransformResponse,
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::Response => "response",
            Self::TransformInput => "transform_input",
            Self::TransformToolResult => "transform_tool_result",
            Self::TransformResponse => "transform_response",
        };
        f.write_str(s)
    }
}

/// Progress of one behavioral chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Pending,
    /// Index of the plugin currently running
    Running(usize),
    Done,
    Aborted,
}

/// Identifies the process a hook fires for.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    pub process_id: &'a str,
    pub depth: usize,
    pub turn: u32,
}

/// Observational hooks. Every method defaults to a no-op.
pub trait Observer: Send + Sync {
    fn on_tool_start(&self, _ctx: &EventContext<'_>, _call: &ToolCall) -> Result<(), HookError> {
        Ok(())
    }

    fn on_tool_end(&self, _ctx: &EventContext<'_>, _call: &ToolCall, _result: &ToolResult) -> Result<(), HookError> {
        Ok(())
    }

    fn on_response(&self, _ctx: &EventContext<'_>, _text: &str) -> Result<(), HookError> {
        Ok(())
    }
}

/// Behavioral hooks. `Ok(None)` leaves the value unchanged.
pub trait Transformer: Send + Sync {
    fn transform_input(
        &self,
        _ctx: &EventContext<'_>,
        _input: &str,
        _store: &mut ContentStore,
    ) -> Result<Option<String>, HookError> {
        Ok(None)
    }

    fn transform_tool_result(
        &self,
        _ctx: &EventContext<'_>,
        _call: &ToolCall,
        _result: &ToolResult,
        _store: &mut ContentStore,
    ) -> Result<Option<ToolResult>, HookError> {
        Ok(None)
    }

    fn transform_response(
        &self,
        _ctx: &EventContext<'_>,
        _text: &str,
        _store: &mut ContentStore,
    ) -> Result<Option<String>, HookError> {
        Ok(None)
    }
}

/// A registered plugin and the capabilities it offers.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn observer(&self) -> Option<&dyn Observer> {
        None
    }

    fn transformer(&self) -> Option<&dyn Transformer> {
        None
    }
}

/// Ordered plugin list for one process.
///
/// Cloning shares the plugin objects; forks re-attach the same plugins.
#[derive(Clone, Default)]
pub struct EventBus {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin. Registration order is dispatch order.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        trace!(plugin = plugin.name(), position = self.plugins.len(), "Registered plugin");
        self.plugins.push(plugin);
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    // --- observational ---

    pub fn emit_tool_start(&self, ctx: &EventContext<'_>, call: &ToolCall) {
        self.observe(HookPoint::ToolStart, |o| o.on_tool_start(ctx, call));
    }

    pub fn emit_tool_end(&self, ctx: &EventContext<'_>, call: &ToolCall, result: &ToolResult) {
        self.observe(HookPoint::ToolEnd, |o| o.on_tool_end(ctx, call, result));
    }

    pub fn emit_response(&self, ctx: &EventContext<'_>, text: &str) {
        self.observe(HookPoint::Response, |o| o.on_response(ctx, text));
    }

    fn observe(&self, point: HookPoint, mut hook: impl FnMut(&dyn Observer) -> Result<(), HookError>) {
        for plugin in &self.plugins {
            let Some(observer) = plugin.observer() else {
                continue;
            };
            if let Err(e) = hook(observer) {
                warn!(plugin = plugin.name(), hook = %point, error = %e, "Observer hook failed");
            }
        }
    }

    // --- behavioral ---

    pub fn transform_input(
        &self,
        ctx: &EventContext<'_>,
        input: String,
        store: &mut ContentStore,
    ) -> Result<String, HookError> {
        self.chain(HookPoint::TransformInput, input, |t, value| {
            t.transform_input(ctx, value, store)
        })
    }

    pub fn transform_tool_result(
        &self,
        ctx: &EventContext<'_>,
        call: &ToolCall,
        result: ToolResult,
        store: &mut ContentStore,
    ) -> Result<ToolResult, HookError> {
        self.chain(HookPoint::TransformToolResult, result, |t, value| {
            t.transform_tool_result(ctx, call, value, store)
        })
    }

    pub fn transform_response(
        &self,
        ctx: &EventContext<'_>,
        text: String,
        store: &mut ContentStore,
    ) -> Result<String, HookError> {
        self.chain(HookPoint::TransformResponse, text, |t, value| {
            t.transform_response(ctx, value, store)
        })
    }

    fn chain<T>(
        &self,
        point: HookPoint,
        mut value: T,
        mut step: impl FnMut(&dyn Transformer, &T) -> Result<Option<T>, HookError>,
    ) -> Result<T, HookError> {
        let mut state = HookState::Pending;
        trace!(hook = %point, ?state);
        for (i, plugin) in self.plugins.iter().enumerate() {
            let Some(transformer) = plugin.transformer() else {
                continue;
            };
            state = HookState::Running(i);
            trace!(hook = %point, ?state, plugin = plugin.name());
            match step(transformer, &value) {
                Ok(Some(replacement)) => value = replacement,
                Ok(None) => {}
                Err(e) => {
                    state = HookState::Aborted;
                    warn!(hook = %point, ?state, plugin = plugin.name(), error = %e, "Behavioral hook failed");
                    return Err(e);
                }
            }
        }
        state = HookState::Done;
        trace!(hook = %point, ?state);
        Ok(value)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.plugin_names()).finish()
    }
}

/// Events republished by [`EventStream`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProcessEvent {
    ToolStarted {
        process_id: String,
        depth: usize,
        turn: u32,
        tool_name: String,
        call_id: String,
        timestamp: DateTime<Utc>,
    },

    ToolFinished {
        process_id: String,
        depth: usize,
        turn: u32,
        tool_name: String,
        call_id: String,
        success: bool,
        handle: Option<ContentHandle>,
        timestamp: DateTime<Utc>,
    },

    ResponseProduced {
        process_id: String,
        depth: usize,
        turn: u32,
        chars: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcasts process events to any number of subscribers.
#[derive(Clone)]
pub struct EventStream {
    sender: broadcast::Sender<Arc<ProcessEvent>>,
}

impl EventStream {
    /// Create a new event stream with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ProcessEvent>> {
        self.sender.subscribe()
    }

    fn publish(&self, event: ProcessEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Plugin for EventStream {
    fn name(&self) -> &str {
        "event_stream"
    }

    fn observer(&self) -> Option<&dyn Observer> {
        Some(self)
    }
}

impl Observer for EventStream {
    fn on_tool_start(&self, ctx: &EventContext<'_>, call: &ToolCall) -> Result<(), HookError> {
        self.publish(ProcessEvent::ToolStarted {
            process_id: ctx.process_id.to_string(),
            depth: ctx.depth,
            turn: ctx.turn,
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn on_tool_end(&self, ctx: &EventContext<'_>, call: &ToolCall, result: &ToolResult) -> Result<(), HookError> {
        self.publish(ProcessEvent::ToolFinished {
            process_id: ctx.process_id.to_string(),
            depth: ctx.depth,
            turn: ctx.turn,
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            success: result.success,
            handle: result.handle,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn on_response(&self, ctx: &EventContext<'_>, text: &str) -> Result<(), HookError> {
        self.publish(ProcessEvent::ResponseProduced {
            process_id: ctx.process_id.to_string(),
            depth: ctx.depth,
            turn: ctx.turn,
            chars: text.chars().count(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
