//! `fork`: continue the current conversation in parallel copies.
//!
//! Each prompt gets its own child, cloned from the conversation and store as
//! they are at the moment of the call. Children run concurrently; their
//! answers come back in prompt order.

use async_trait::async_trait;
use futures::future::join_all;
use procloom_core::error::{ToolError, ToolErrorKind};
use procloom_core::tool::{Tool, ToolContext, ToolResult};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub const NAME: &str = "fork";

#[derive(Debug, Deserialize)]
struct Args {
    prompts: Vec<String>,
}

pub struct ForkTool;

#[async_trait]
impl Tool for ForkTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Fork this conversation into one copy per prompt. Every copy keeps the full \
         history and stored content so far, answers its own prompt, and its final \
         answer is returned here."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "prompts": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "One prompt per forked copy"
                }
            },
            "required": ["prompts"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let args: Args =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.prompts.is_empty() {
            return Err(ToolError::InvalidArguments("prompts must not be empty".into()));
        }

        info!(children = args.prompts.len(), depth = ctx.process.depth(), "Forking process");
        let (process, conversation, bus, call_id) = (ctx.process, ctx.conversation, ctx.bus, ctx.call_id);
        let store = &*ctx.store;
        let outcomes = join_all(
            args.prompts
                .into_iter()
                .map(|prompt| process.fork(conversation, store, bus, call_id, prompt)),
        )
        .await;

        let mut output = String::new();
        let mut children = Vec::with_capacity(outcomes.len());
        let mut failures = 0;
        for (i, outcome) in outcomes.iter().enumerate() {
            let n = i + 1;
            match outcome {
                Ok(result) => {
                    output.push_str(&format!("[fork {n}]\n{}\n\n", result.text));
                    children.push(json!({
                        "index": n,
                        "success": true,
                        "turns": result.turns,
                        "tool_calls": result.tool_calls,
                    }));
                }
                Err(e) => {
                    failures += 1;
                    output.push_str(&format!("[fork {n}] failed: {e}\n\n"));
                    children.push(json!({ "index": n, "success": false, "error": e.to_string() }));
                }
            }
        }

        let mut result = ToolResult::success(output.trim_end()).with_data(json!({ "children": children }));
        if failures > 0 {
            result.success = false;
            result.error = Some(ToolErrorKind::ExecutionFault);
        }
        Ok(result)
    }
}
