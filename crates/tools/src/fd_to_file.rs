//! `fd_to_file`: write stored content out to the filesystem.

use async_trait::async_trait;
use procloom_core::error::ToolError;
use procloom_core::tool::{Tool, ToolContext, ToolResult};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub const NAME: &str = "fd_to_file";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WriteMode {
    #[default]
    Write,
    Append,
}

#[derive(Debug, Deserialize)]
struct Args {
    fd: String,
    path: String,
    #[serde(default)]
    mode: WriteMode,
    #[serde(default = "yes")]
    create: bool,
    #[serde(default = "yes")]
    exist_ok: bool,
}

fn yes() -> bool {
    true
}

pub struct FdToFileTool;

fn denied(reason: String) -> ToolError {
    ToolError::PermissionDenied {
        tool_name: NAME.into(),
        reason,
    }
}

#[async_trait]
impl Tool for FdToFileTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Write the content behind a file descriptor (handle:N or ref:label) to a file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "fd": { "type": "string", "description": "Descriptor to write out" },
                "path": { "type": "string", "description": "Destination file path" },
                "mode": {
                    "type": "string",
                    "enum": ["write", "append"],
                    "description": "Overwrite (default) or append"
                },
                "create": {
                    "type": "boolean",
                    "description": "Create the file (and parent directories) if missing (default true)"
                },
                "exist_ok": {
                    "type": "boolean",
                    "description": "Allow writing to a file that already exists (default true)"
                }
            },
            "required": ["fd", "path"]
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
        let path = Path::new(&args.path);

        let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
        if exists && !args.exist_ok {
            return Err(denied(format!("{} already exists and exist_ok is false", path.display())));
        }
        if !exists && !args.create {
            return Err(denied(format!("{} does not exist and create is false", path.display())));
        }

        if !exists
            && let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Err(ToolError::ExecutionFault {
                tool_name: NAME.into(),
                reason: format!("Failed to create directories: {e}"),
            });
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.create(args.create);
        match args.mode {
            WriteMode::Write => options.write(true).truncate(true),
            WriteMode::Append => options.append(true),
        };

        let write = async {
            let mut file = options.open(path).await?;
            file.write_all(blob.as_bytes()).await?;
            file.flush().await
        };
        write.await.map_err(|e| ToolError::ExecutionFault {
            tool_name: NAME.into(),
            reason: format!("Failed to write {}: {e}", path.display()),
        })?;

        let verb = match args.mode {
            WriteMode::Write => "Wrote",
            WriteMode::Append => "Appended",
        };
        Ok(ToolResult::success(format!(
            "{verb} {} bytes from {handle} to {}",
            blob.len(),
            path.display()
        ))
        .with_data(json!({ "fd": handle, "path": args.path, "bytes": blob.len() })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use procloom_core::error::ToolErrorKind;

    #[tokio::test]
    async fn write_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("out.txt");
        let mut h = Harness::new();
        let handle = h.store.put("stored text");

        let result = h
            .run(
                &FdToFileTool,
                json!({"fd": handle.to_string(), "path": file_path.to_str().unwrap()}),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "stored text");
    }

    #[tokio::test]
    async fn append_mode_and_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("nested/deeper/log.txt");
        let mut h = Harness::new();
        let first = h.store.put("one\n");
        let second = h.store.put("two\n");
        let path = file_path.to_str().unwrap();

        h.run(&FdToFileTool, json!({"fd": first.to_string(), "path": path}))
            .await
            .unwrap();
        h.run(
            &FdToFileTool,
            json!({"fd": second.to_string(), "path": path, "mode": "append"}),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(&file_path).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn respects_create_and_exist_ok() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("existing.txt");
        std::fs::write(&existing, "keep me").unwrap();
        let missing = dir.path().join("missing.txt");
        let mut h = Harness::new();
        let handle = h.store.put("new");

        let err = h
            .run(
                &FdToFileTool,
                json!({"fd": handle.to_string(), "path": existing.to_str().unwrap(), "exist_ok": false}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::PermissionDenied);
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "keep me");

        let err = h
            .run(
                &FdToFileTool,
                json!({"fd": handle.to_string(), "path": missing.to_str().unwrap(), "create": false}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::PermissionDenied);
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn unknown_descriptor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = Harness::new();
        let err = h
            .run(
                &FdToFileTool,
                json!({"fd": "ref:nothing", "path": dir.path().join("x").to_str().unwrap()}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::NotFound);
    }
}
