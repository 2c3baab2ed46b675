//! File descriptors: keeping large content out of the conversation.
//!
//! [`FileDescriptorPlugin`] is a behavioral plugin registered last on every
//! process bus. It:
//! - stores tool output longer than `max_direct_output_chars` and replaces
//!   it with a preview plus its `handle:N`,
//! - does the same for oversized user input when `page_user_input` is on,
//! - binds `<ref id="label">…</ref>` blocks in model output to `ref:label`
//!   when `enable_references` is on.
//!
//! Results that already carry a handle (anything `read_fd` returns) are
//! left alone, so reading a page never re-stores it.

use procloom_config::FdConfig;
use procloom_core::content::{ContentHandle, ContentStore};
use procloom_core::error::{ContentError, HookError};
use procloom_core::event::{EventContext, Plugin, Transformer};
use procloom_core::paginate::Paginator;
use procloom_core::tool::{ToolCall, ToolResult};
use tracing::{debug, warn};

pub const PLUGIN_NAME: &str = "file_descriptor";

const REF_OPEN: &str = "<ref id=\"";
const REF_CLOSE: &str = "</ref>";

pub struct FileDescriptorPlugin {
    config: FdConfig,
    paginator: Paginator,
}

impl FileDescriptorPlugin {
    pub fn new(config: FdConfig) -> Result<Self, ContentError> {
        let paginator = Paginator::new(config.page_size)?;
        Ok(Self { config, paginator })
    }

    pub fn config(&self) -> &FdConfig {
        &self.config
    }

    /// Store `blob` and describe it in `tag` form: a header with the handle
    /// and its size, then the start of the first page.
    fn store_with_preview(&self, tag: &str, blob: String, store: &mut ContentStore) -> (ContentHandle, String) {
        let pages = self.paginator.paginate(&blob);
        let total_pages = pages.len();
        let total_lines = pages.first().map(|p| p.total_lines).unwrap_or(0);
        let preview: String = pages
            .first()
            .map(|p| p.text.chars().take(self.config.preview_chars).collect())
            .unwrap_or_default();
        let chars = blob.chars().count();

        let handle = store.put(blob);
        let rendered = format!(
            "<{tag} fd=\"{handle}\" chars=\"{chars}\" lines=\"{total_lines}\" pages=\"{total_pages}\">\n\
             {preview}\n\
             </{tag}>\n\
             Showing the first {shown} of {chars} characters. Use read_fd with fd=\"{handle}\" to read page by page.",
            shown = preview.chars().count(),
        );
        (handle, rendered)
    }
}

impl Plugin for FileDescriptorPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn transformer(&self) -> Option<&dyn Transformer> {
        Some(self)
    }
}

impl Transformer for FileDescriptorPlugin {
    fn transform_input(
        &self,
        ctx: &EventContext<'_>,
        input: &str,
        store: &mut ContentStore,
    ) -> Result<Option<String>, HookError> {
        if !self.config.enabled || !self.config.page_user_input {
            return Ok(None);
        }
        if input.chars().count() <= self.config.max_input_chars {
            return Ok(None);
        }
        let (handle, rendered) = self.store_with_preview("fd_input", input.to_string(), store);
        debug!(process_id = ctx.process_id, %handle, "Stored oversized user input");
        Ok(Some(rendered))
    }

    fn transform_tool_result(
        &self,
        ctx: &EventContext<'_>,
        call: &ToolCall,
        result: &ToolResult,
        store: &mut ContentStore,
    ) -> Result<Option<ToolResult>, HookError> {
        if !self.config.enabled || result.handle.is_some() {
            return Ok(None);
        }
        if result.output.chars().count() <= self.config.max_direct_output_chars {
            return Ok(None);
        }

        let (handle, rendered) = self.store_with_preview("fd_result", result.output.clone(), store);
        debug!(
            process_id = ctx.process_id,
            tool = %call.name,
            %handle,
            "Stored oversized tool output"
        );
        let mut replaced = result.clone();
        replaced.output = rendered;
        replaced.handle = Some(handle);
        Ok(Some(replaced))
    }

    fn transform_response(
        &self,
        ctx: &EventContext<'_>,
        text: &str,
        store: &mut ContentStore,
    ) -> Result<Option<String>, HookError> {
        if !self.config.enabled || !self.config.enable_references {
            return Ok(None);
        }
        for (label, body) in find_refs(text) {
            match store.label(label, body) {
                Ok(handle) => debug!(process_id = ctx.process_id, label, %handle, "Bound reference"),
                Err(e) => warn!(process_id = ctx.process_id, label, error = %e, "Skipped reference"),
            }
        }
        Ok(None)
    }
}

/// `(label, body)` of every well-formed `<ref id="label">body</ref>` block.
///
/// A single newline right after the opening tag is not part of the body.
pub fn find_refs(text: &str) -> Vec<(&str, &str)> {
    let mut refs = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find(REF_OPEN) {
        let after_open = &rest[open + REF_OPEN.len()..];
        let Some(quote) = after_open.find('"') else {
            break;
        };
        let label = &after_open[..quote];
        let after_label = &after_open[quote + 1..];
        let Some(gt) = after_label.find('>') else {
            break;
        };
        if !after_label[..gt].trim().is_empty() {
            rest = after_label;
            continue;
        }
        let body_and_rest = &after_label[gt + 1..];
        let Some(close) = body_and_rest.find(REF_CLOSE) else {
            break;
        };
        let body = &body_and_rest[..close];
        refs.push((label, body.strip_prefix('\n').unwrap_or(body)));
        rest = &body_and_rest[close + REF_CLOSE.len()..];
    }
    refs
}
