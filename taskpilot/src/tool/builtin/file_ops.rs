//! Workspace file operations: read, write, list.
//!
//! Every path argument is resolved through [`resolve_sandboxed`], so these
//! tools can only touch files under the agent's workspace.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::tool::{
    ParameterKind, ParameterSchema, Tool, ToolCapability, ToolCategory, ToolContext, ToolMetadata,
    ToolResult, resolve_sandboxed,
};

/// Cap on bytes returned by a single read.
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Read a file from the workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "read_file",
            "Read a UTF-8 text file from the workspace and return its contents.",
            ToolCategory::FileSystem,
        )
        .with_parameters(
            ParameterSchema::new()
                .required("path", ParameterKind::String, "Workspace-relative file path")
                .path_param("path"),
        )
        .with_capabilities(vec![ToolCapability::ReadOnly, ToolCapability::Fast])
    }

    async fn execute(&self, context: &ToolContext, arguments: &Value) -> ToolResult {
        let Some(path) = arguments.get("path").and_then(Value::as_str) else {
            return ToolResult::err("Missing 'path' argument");
        };

        let resolved = match resolve_sandboxed(&context.workspace_path, path) {
            Ok(resolved) => resolved,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.len() > MAX_READ_BYTES => {
                return ToolResult::err(format!(
                    "File '{path}' is too large ({} bytes, limit {MAX_READ_BYTES})",
                    meta.len()
                ));
            }
            Ok(_) => {}
            Err(e) => return ToolResult::err(format!("Cannot read '{path}': {e}")),
        }

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => {
                debug!(path, bytes = content.len(), "read file");
                ToolResult::ok(content.clone())
                    .with_metadata("bytes", json!(content.len()))
                    .with_metadata("path", json!(path))
            }
            Err(e) => ToolResult::err(format!("Cannot read '{path}': {e}")),
        }
    }
}

/// Write a file into the workspace, creating parent directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "write_file",
            "Write text content to a file in the workspace, creating parents as needed.",
            ToolCategory::FileSystem,
        )
        .with_parameters(
            ParameterSchema::new()
                .required("path", ParameterKind::String, "Workspace-relative file path")
                .required("content", ParameterKind::String, "Text content to write")
                .path_param("path"),
        )
        .with_capabilities(vec![ToolCapability::Writable])
    }

    async fn execute(&self, context: &ToolContext, arguments: &Value) -> ToolResult {
        let Some(path) = arguments.get("path").and_then(Value::as_str) else {
            return ToolResult::err("Missing 'path' argument");
        };
        let Some(content) = arguments.get("content").and_then(Value::as_str) else {
            return ToolResult::err("Missing 'content' argument");
        };

        let resolved = match resolve_sandboxed(&context.workspace_path, path) {
            Ok(resolved) => resolved,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::err(format!("Cannot create parent of '{path}': {e}"));
            }
        }

        match tokio::fs::write(&resolved, content).await {
            Ok(()) => {
                debug!(path, bytes = content.len(), "wrote file");
                ToolResult::ok(format!("Wrote {} bytes to {path}", content.len()))
                    .with_metadata("bytes", json!(content.len()))
                    .with_metadata("path", json!(path))
            }
            Err(e) => ToolResult::err(format!("Cannot write '{path}': {e}")),
        }
    }
}

/// List a directory in the workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "list_dir",
            "List the entries of a workspace directory.",
            ToolCategory::FileSystem,
        )
        .with_parameters(
            ParameterSchema::new()
                .optional("path", ParameterKind::String, "Workspace-relative directory (default: root)")
                .path_param("path"),
        )
        .with_capabilities(vec![ToolCapability::ReadOnly, ToolCapability::Fast])
    }

    async fn execute(&self, context: &ToolContext, arguments: &Value) -> ToolResult {
        let path = arguments
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".");

        let resolved = match resolve_sandboxed(&context.workspace_path, path) {
            Ok(resolved) => resolved,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let mut entries = match tokio::fs::read_dir(&resolved).await {
            Ok(entries) => entries,
            Err(e) => return ToolResult::err(format!("Cannot list '{path}': {e}")),
        };

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        ToolResult::ok(names.join("\n")).with_metadata("entries", json!(names.len()))
    }
}
