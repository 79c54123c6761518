//! Built-in tools.
//!
//! A small standard toolbox agents can use out of the box: workspace file
//! operations, HTTP fetch, and web search. All file paths are resolved
//! through the workspace sandbox.

mod file_ops;
mod http;
mod search;

pub use file_ops::{ListDirTool, ReadFileTool, WriteFileTool};
pub use http::HttpFetchTool;
pub use search::{SearchResult, WebSearchTool};

use crate::tool::BoxedTool;

/// The default toolbox: file operations plus network access.
#[must_use]
pub fn base_tools() -> Vec<BoxedTool> {
    vec![
        Box::new(ReadFileTool),
        Box::new(WriteFileTool),
        Box::new(ListDirTool),
        Box::new(HttpFetchTool::new()),
        Box::new(WebSearchTool::new()),
    ]
}

/// Create a built-in tool by name.
///
/// Returns `None` if the name is not a built-in.
#[must_use]
pub fn create_tool(name: &str) -> Option<BoxedTool> {
    match name {
        "read_file" => Some(Box::new(ReadFileTool)),
        "write_file" => Some(Box::new(WriteFileTool)),
        "list_dir" => Some(Box::new(ListDirTool)),
        "http_fetch" => Some(Box::new(HttpFetchTool::new())),
        "web_search" => Some(Box::new(WebSearchTool::new())),
        _ => None,
    }
}
