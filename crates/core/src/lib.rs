//! # procloom core
//!
//! Domain types, traits and error definitions for the procloom process runtime.
//! Every other crate in the workspace builds against what is defined here:
//!
//! - [`message`]: conversations and the messages they are made of
//! - [`backend`]: the model backend capability
//! - [`content`] / [`paginate`]: handle-addressed storage and line-aware paging
//! - [`tool`]: the tool trait and per-process registry
//! - [`event`]: the plugin bus
//! - [`process`]: process lifecycle types and the spawn/fork capability

pub mod backend;
pub mod content;
pub mod error;
pub mod event;
pub mod message;
pub mod paginate;
pub mod process;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use backend::{BackendRequest, BackendResponse, ModelBackend, ToolDefinition, Usage};
pub use content::{ContentHandle, ContentRef, ContentStore};
pub use error::{BackendError, ContentError, HookError, ProcessError, ToolError, ToolErrorKind};
pub use event::{EventBus, EventContext, EventStream, Observer, Plugin, ProcessEvent, Transformer};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use paginate::{Page, Paginator, Unit};
pub use process::{Detached, FinalResult, ProcessControl, ProcessState};
pub use tool::{FnTool, Tool, ToolCall, ToolContext, ToolRegistry, ToolResult};
