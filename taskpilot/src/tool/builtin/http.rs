//! HTTP fetch tool.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::tool::{
    ParameterKind, ParameterSchema, Tool, ToolCapability, ToolCategory, ToolContext, ToolMetadata,
    ToolResult,
};

/// Cap on bytes kept from a response body.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// Fetch a URL over HTTP GET and return the response body.
#[derive(Debug, Clone)]
pub struct HttpFetchTool {
    client: reqwest::Client,
}

impl HttpFetchTool {
    /// Create the tool with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("taskpilot/0.3")
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "http_fetch",
            "Fetch a URL over HTTP GET and return status plus body text.",
            ToolCategory::Network,
        )
        .with_parameters(
            ParameterSchema::new().required("url", ParameterKind::String, "Absolute http(s) URL"),
        )
        .with_capabilities(vec![ToolCapability::Network])
    }

    async fn execute(&self, _context: &ToolContext, arguments: &Value) -> ToolResult {
        let Some(url) = arguments.get("url").and_then(Value::as_str) else {
            return ToolResult::err("Missing 'url' argument");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::err(format!("URL must be http(s): {url}"));
        }

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return ToolResult::err(format!("Request failed: {e}")),
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return ToolResult::err(format!("Failed to read response: {e}")),
        };

        let truncated = body.len() > MAX_BODY_BYTES;
        let body: String = if truncated {
            body.chars().take(MAX_BODY_BYTES).collect()
        } else {
            body
        };

        debug!(url, status, bytes = body.len(), "fetched url");
        let success = (200..400).contains(&status);
        let mut result = if success {
            ToolResult::ok(body)
        } else {
            ToolResult::err(format!("HTTP {status} from {url}"))
        };
        result.metadata.insert("status".to_owned(), json!(status));
        result.metadata.insert("truncated".to_owned(), json!(truncated));
        result
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let tool = HttpFetchTool::new();
        let ctx = ToolContext::new("exec", std::env::temp_dir());
        let result = tool.execute(&ctx, &json!({"url": "file:///etc/passwd"})).await;
        assert!(!result.success);
        assert!(result.error.expect("error").contains("http"));
    }

    #[tokio::test]
    async fn missing_url_fails() {
        let tool = HttpFetchTool::new();
        let ctx = ToolContext::new("exec", std::env::temp_dir());
        let result = tool.execute(&ctx, &json!({})).await;
        assert!(!result.success);
    }
}
