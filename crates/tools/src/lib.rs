//! Built-in tool implementations for procloom.
//!
//! - `read_fd`: page through stored content
//! - `fd_to_file`: write stored content to disk
//! - `spawn`: run a query in another configured program
//! - `fork`: continue the current conversation in parallel copies

pub mod fd_to_file;
pub mod fork;
pub mod read_fd;
pub mod spawn;

#[cfg(test)]
pub(crate) mod test_support;

use procloom_core::paginate::Paginator;
use procloom_core::tool::Tool;
use std::sync::Arc;

pub use fd_to_file::FdToFileTool;
pub use fork::ForkTool;
pub use read_fd::ReadFdTool;
pub use spawn::SpawnTool;

/// Names of every built-in tool, in catalogue order.
pub const BUILTIN_TOOLS: &[&str] = &[read_fd::NAME, fd_to_file::NAME, spawn::NAME, fork::NAME];

/// Instantiate a built-in tool by name.
///
/// `paginator` carries the owning program's page size.
pub fn builtin(name: &str, paginator: Paginator) -> Option<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = match name {
        read_fd::NAME => Arc::new(ReadFdTool::new(paginator)),
        fd_to_file::NAME => Arc::new(FdToFileTool),
        spawn::NAME => Arc::new(SpawnTool),
        fork::NAME => Arc::new(ForkTool),
        _ => return None,
    };
    Some(tool)
}
