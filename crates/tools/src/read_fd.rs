//! `read_fd`: page through content held in the process's store.

use async_trait::async_trait;
use procloom_core::content::ContentHandle;
use procloom_core::error::ToolError;
use procloom_core::paginate::{Paginator, Unit};
use procloom_core::tool::{Tool, ToolContext, ToolResult};
use serde::Deserialize;
use serde_json::json;

pub const NAME: &str = "read_fd";

#[derive(Debug, Deserialize)]
struct Args {
    fd: String,
    #[serde(default = "first")]
    page: usize,
    #[serde(default)]
    read_all: bool,
    #[serde(default)]
    mode: Option<Unit>,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    count: Option<usize>,
    #[serde(default)]
    extract_to_new_fd: bool,
}

fn first() -> usize {
    1
}

pub struct ReadFdTool {
    paginator: Paginator,
}

impl ReadFdTool {
    pub fn new(paginator: Paginator) -> Self {
        Self { paginator }
    }
}

#[async_trait]
impl Tool for ReadFdTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Read content stored behind a file descriptor (handle:N or ref:label). \
         Reads one page at a time by default; use mode=line or mode=char with \
         start/count for precise ranges, and extract_to_new_fd to save a range \
         under a new handle instead of returning it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "fd": {
                    "type": "string",
                    "description": "The descriptor to read, e.g. handle:3 or ref:summary"
                },
                "page": {
                    "type": "integer",
                    "description": "1-based page number (default 1)",
                    "minimum": 1
                },
                "read_all": {
                    "type": "boolean",
                    "description": "Return the whole content instead of one page"
                },
                "mode": {
                    "type": "string",
                    "enum": ["page", "line", "char"],
                    "description": "Unit for start/count (pages and lines are 1-based, chars are 0-based offsets)"
                },
                "start": { "type": "integer", "minimum": 0 },
                "count": { "type": "integer", "minimum": 1 },
                "extract_to_new_fd": {
                    "type": "boolean",
                    "description": "Store the selected content under a new descriptor and return that descriptor"
                }
            },
            "required": ["fd"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolResult, ToolError> {
        let args: Args =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let (handle, blob) = ctx.store.resolve(&args.fd)?;

        if args.read_all {
            let text = blob.to_string();
            return Ok(finish(ctx, handle, text, json!({ "fd": handle, "read_all": true }), args.extract_to_new_fd));
        }

        match (args.mode, args.start) {
            // A single page, with position metadata
            (None | Some(Unit::Page), None) => {
                let page = self.paginator.page(blob, args.page)?;
                let meta = json!({
                    "fd": handle,
                    "page": page.index,
                    "total_pages": page.total_pages,
                    "start_line": page.start_line,
                    "end_line": page.end_line,
                    "total_lines": page.total_lines,
                    "has_more": page.has_more(),
                });
                let text = page.text.to_string();
                Ok(finish(ctx, handle, text, meta, args.extract_to_new_fd))
            }
            (mode, start) => {
                let unit = mode.unwrap_or(Unit::Page);
                let start = start.unwrap_or(if unit == Unit::Char { 0 } else { 1 });
                let count = args.count.unwrap_or(usize::MAX);
                let text = self.paginator.extract(blob, start, count, unit)?.to_string();
                let meta = json!({
                    "fd": handle,
                    "mode": unit,
                    "start": start,
                    "chars": text.chars().count(),
                });
                Ok(finish(ctx, handle, text, meta, args.extract_to_new_fd))
            }
        }
    }
}

/// Build the result, or store the selection under a new handle.
fn finish(
    ctx: &mut ToolContext<'_>,
    source: ContentHandle,
    text: String,
    mut meta: serde_json::Value,
    extract: bool,
) -> ToolResult {
    if extract {
        let chars = text.chars().count();
        let new_handle = ctx.store.put(text);
        meta["new_fd"] = json!(new_handle);
        let mut result = ToolResult::success(format!(
            "Extracted {chars} characters from {source} into {new_handle}"
        ))
        .with_data(meta);
        result.handle = Some(new_handle);
        return result;
    }

    meta["content"] = json!(text);
    let mut result = ToolResult::success(text).with_data(meta);
    // Already paged out of the store; never re-store it
    result.handle = Some(source);
    result
}
