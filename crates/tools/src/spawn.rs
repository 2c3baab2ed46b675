//! `spawn`: delegate a query to another configured program.
//!
//! The child starts from its own program configuration, not from the
//! caller's conversation. Descriptors listed in `additional_preload_fds` are
//! copied into the child's store under the same names before it runs.

use async_trait::async_trait;
use procloom_core::content::ContentRef;
use procloom_core::error::ToolError;
use procloom_core::tool::{Tool, ToolContext, ToolResult};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub const NAME: &str = "spawn";

#[derive(Debug, Deserialize)]
struct Args {
    program_name: String,
    prompt: String,
    #[serde(default)]
    additional_preload_fds: Vec<String>,
}

pub struct SpawnTool;

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Run a prompt in a fresh instance of another program and return its final answer. \
         Pass file descriptors in additional_preload_fds to share stored content with it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "program_name": {
                    "type": "string",
                    "description": "Name of a linked program"
                },
                "prompt": {
                    "type": "string",
                    "description": "The query for the spawned program"
                },
                "additional_preload_fds": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Descriptors (handle:N or ref:label) to copy into the child"
                }
            },
            "required": ["program_name", "prompt"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let args: Args =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let linked = ctx.process.linked_programs();
        if !linked.iter().any(|(name, _)| *name == args.program_name) {
            let available: Vec<&str> = linked.iter().map(|(name, _)| name.as_str()).collect();
            return Err(ToolError::InvalidArguments(format!(
                "'{}' is not a linked program (available: {})",
                args.program_name,
                if available.is_empty() { "none".to_string() } else { available.join(", ") }
            )));
        }

        let refs = args
            .additional_preload_fds
            .iter()
            .map(|fd| fd.parse::<ContentRef>())
            .collect::<Result<Vec<_>, _>>()?;

        info!(program = %args.program_name, preload = refs.len(), "Spawning child process");
        let result = ctx
            .process
            .spawn(&args.program_name, args.prompt, ctx.store, &refs)
            .await
            .map_err(|e| ToolError::ExecutionFault {
                tool_name: NAME.into(),
                reason: format!("spawned program '{}' failed: {e}", args.program_name),
            })?;

        Ok(ToolResult::success(result.text.clone()).with_data(json!({
            "program": args.program_name,
            "turns": result.turns,
            "tool_calls": result.tool_calls,
            "api_calls": result.api_calls,
            "elapsed_ms": result.elapsed_ms,
        })))
    }
}
