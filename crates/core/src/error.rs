//! Error types for the procloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Bounded context errors ---

/// Failures reported by a model backend after its own retry policy ran out.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

/// Errors raised while registering or running tools.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool name already registered: {0}")]
    DuplicateName(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFault { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },
}

impl ToolError {
    /// The serializable tag for this error, carried on failed tool results.
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::UnknownTool(_) => ToolErrorKind::UnknownTool,
            Self::DuplicateName(_) => ToolErrorKind::DuplicateName,
            Self::ExecutionFault { .. } => ToolErrorKind::ExecutionFault,
            Self::InvalidArguments(_) => ToolErrorKind::InvalidArguments,
            Self::Content(ContentError::NotFound(_)) => ToolErrorKind::NotFound,
            Self::Content(ContentError::OutOfRange { .. }) => ToolErrorKind::OutOfRange,
            Self::Content(ContentError::InvalidArgument(_)) => ToolErrorKind::InvalidArgument,
            Self::PermissionDenied { .. } => ToolErrorKind::PermissionDenied,
        }
    }
}

/// Compact tag describing why a tool result failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    DuplicateName,
    ExecutionFault,
    InvalidArguments,
    NotFound,
    OutOfRange,
    InvalidArgument,
    PermissionDenied,
}

/// Content store and paginator misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("No content stored under {0}")]
    NotFound(String),

    #[error("{unit} {start} is out of range (content has {available})")]
    OutOfRange {
        unit: String,
        start: usize,
        available: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// A fault raised by a plugin hook.
#[derive(Debug, Clone, Error)]
#[error("plugin '{plugin}' failed: {message}")]
pub struct HookError {
    pub plugin: String,
    pub message: String,
}

impl HookError {
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Failures that are fatal to a single `run` of a process.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error("Turn limit of {limit} exceeded")]
    TurnLimitExceeded { limit: u32 },

    #[error("Backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Behavioral hook aborted the turn: {0}")]
    HookFault(#[from] HookError),

    #[error("Unknown program: {0}")]
    UnknownProgram(String),

    #[error("Invalid process configuration: {0}")]
    Configuration(String),

    #[error("Fork depth {depth} exceeds the limit of {limit}")]
    ForkDepthExceeded { depth: usize, limit: usize },

    #[error(transparent)]
    Content(#[from] ContentError),
}
