//! Single-call tool executor: validation gate, timeout, result shaping.

use std::time::Instant;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::tool::{Tool, ToolContext, validate::validate_arguments};
use crate::tool::ToolResult;

/// Execute one tool call under its declared timeout.
///
/// The pipeline is: validate (all four stages) → dispatch with timeout →
/// shape the result with `execution_id`, `execution_time`, and any
/// validation warnings. Validation failures and timeouts are returned as
/// failed results, never raised.
pub async fn execute_tool(tool: &dyn Tool, context: &ToolContext, arguments: &Value) -> ToolResult {
    let metadata = tool.metadata();
    let started = Instant::now();

    let validation = validate_arguments(tool, &metadata, arguments, context).await;
    if !validation.is_valid() {
        warn!(tool = %metadata.name, errors = ?validation.errors, "tool validation failed");
        let mut result = ToolResult::err(format!(
            "Validation failed: {}",
            validation.errors.join("; ")
        ));
        result.execution_id = context.execution_id.clone();
        result.execution_time = started.elapsed().as_secs_f64();
        result
            .metadata
            .insert("validation_errors".to_owned(), json!(validation.errors));
        result
            .metadata
            .insert("validation_warnings".to_owned(), json!(validation.warnings));
        return result;
    }

    debug!(tool = %metadata.name, execution_id = %context.execution_id, "dispatching tool");

    let mut result = match tokio::time::timeout(tool.timeout(), tool.execute(context, arguments)).await {
        Ok(result) => result,
        Err(_) => ToolResult::err(format!(
            "Tool '{}' timed out after {:.1}s: timeout",
            metadata.name,
            tool.timeout().as_secs_f64()
        )),
    };

    result.execution_id = context.execution_id.clone();
    result.execution_time = started.elapsed().as_secs_f64();

    if !validation.warnings.is_empty() {
        result
            .metadata
            .insert("validation_warnings".to_owned(), json!(validation.warnings));
    }
    if !validation.suggestions.is_empty() {
        result
            .metadata
            .insert("validation_suggestions".to_owned(), json!(validation.suggestions));
    }

    result
}
