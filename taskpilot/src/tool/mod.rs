//! Tool capability model, registry, and sandboxed executor.
//!
//! Tools are registered explicitly at startup — there is no runtime
//! discovery. Each tool declares metadata (parameter schema, category,
//! capabilities) that drives validation, cache eligibility, and the
//! security checks applied before dispatch.

mod executor;
mod registry;
mod validate;

pub mod builtin;

pub use executor::execute_tool;
pub use registry::{ToolRegistry, ToolStatsSnapshot};
pub use validate::{resolve_sandboxed, validate_arguments};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Categories for organizing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ToolCategory {
    /// Reads or writes files under the workspace.
    FileSystem,
    /// Talks to the network.
    Network,
    /// Transforms data.
    DataProcessing,
    /// Generates or runs code.
    Code,
    /// General utilities.
    Utility,
    /// Interacts with the host system.
    System,
    /// Gathers information.
    Research,
}

/// Declared properties of a tool that govern caching and security checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ToolCapability {
    /// Makes no modifications; results are cacheable.
    ReadOnly,
    /// Can modify state; never served from the cache.
    Writable,
    /// Can delete or permanently change state; never cached.
    Destructive,
    /// Makes network calls.
    Network,
    /// High cost or resource usage.
    Expensive,
    /// Low latency.
    Fast,
    /// Can process multiple items per call.
    Batchable,
    /// Supports streaming output.
    Streaming,
}

/// Declared JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    /// A JSON string.
    String,
    /// A JSON integer.
    Integer,
    /// Any JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
}

impl ParameterKind {
    /// Whether a JSON value matches this declared type.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// The JSON-schema name of this type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// A single parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Declared JSON type.
    pub kind: ParameterKind,
    /// Parameter description for the model.
    pub description: String,
    /// Whether the argument names a filesystem path that must stay inside
    /// the workspace sandbox.
    #[serde(default)]
    pub is_path: bool,
}

/// Parameter schema of a tool: named properties plus a required list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter declarations by name, ordered.
    pub properties: BTreeMap<String, ParameterSpec>,
    /// Names of required parameters.
    pub required: Vec<String>,
}

impl ParameterSchema {
    /// Create an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, kind: ParameterKind, description: impl Into<String>) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(
            name,
            ParameterSpec {
                kind,
                description: description.into(),
                is_path: false,
            },
        );
        self
    }

    /// Add an optional parameter.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, kind: ParameterKind, description: impl Into<String>) -> Self {
        self.properties.insert(
            name.into(),
            ParameterSpec {
                kind,
                description: description.into(),
                is_path: false,
            },
        );
        self
    }

    /// Mark a declared parameter as a sandboxed filesystem path.
    #[must_use]
    pub fn path_param(mut self, name: &str) -> Self {
        if let Some(spec) = self.properties.get_mut(name) {
            spec.is_path = true;
        }
        self
    }

    /// Convert to the function-calling JSON schema shape.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    json!({
                        "type": spec.kind.as_str(),
                        "description": spec.description,
                    }),
                )
            })
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

/// Metadata describing a tool's interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Tool name (snake_case, unique within a registry).
    pub name: String,
    /// Description for the model.
    pub description: String,
    /// Organizational category.
    pub category: ToolCategory,
    /// Parameter schema.
    pub parameters: ParameterSchema,
    /// Declared capabilities.
    pub capabilities: Vec<ToolCapability>,
    /// Tool version string.
    pub version: String,
}

impl ToolMetadata {
    /// Create metadata with an empty schema and no capabilities.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, category: ToolCategory) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            parameters: ParameterSchema::new(),
            capabilities: Vec::new(),
            version: "1.0.0".to_owned(),
        }
    }

    /// Set the parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<ToolCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Whether the tool declares a capability.
    #[must_use]
    pub fn has_capability(&self, capability: ToolCapability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Function-calling schema for this tool.
    #[must_use]
    pub fn to_function_schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters.to_json_schema(),
            }
        })
    }
}

/// Context passed to tools during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    /// Unique id of this execution, usable for rollback.
    pub execution_id: String,
    /// Id of the agent making the call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Sandbox root for path-typed arguments.
    pub workspace_path: PathBuf,
    /// Free-form context entries.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolContext {
    /// Create a context for a workspace.
    #[must_use]
    pub fn new(execution_id: impl Into<String>, workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            execution_id: execution_id.into(),
            agent_id: None,
            workspace_path: workspace_path.into(),
            metadata: Map::new(),
        }
    }

    /// Attach the calling agent's id.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Result of validating tool arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Hard violations; execution proceeds only when empty.
    pub errors: Vec<String>,
    /// Non-fatal findings propagated into result metadata.
    pub warnings: Vec<String>,
    /// Optional improvement hints.
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    /// A report with no findings.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Whether execution may proceed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another report's findings into this one.
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.suggestions.extend(other.suggestions);
    }
}

/// Outcome of a single tool execution.
///
/// Failures are encoded in the record rather than raised: the engine turns
/// them into observations and reflection input instead of unwinding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the call succeeded.
    pub success: bool,
    /// Tool output (empty on failure).
    #[serde(default)]
    pub output: String,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Direct monetary cost of the call, if any.
    #[serde(default)]
    pub cost: f64,
    /// Id of the execution that produced this result.
    #[serde(default)]
    pub execution_id: String,
    /// Wall-clock duration of the call in seconds.
    #[serde(default)]
    pub execution_time: f64,
    /// Whether this result was served from the cache.
    #[serde(default)]
    pub cached: bool,
    /// Free-form result metadata (validation warnings, byte counts, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    /// Create a successful result.
    #[must_use]
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            ..Self::default()
        }
    }

    /// Create a failed result.
    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// An executable tool.
///
/// Implementations are registered with a [`ToolRegistry`] at startup. The
/// default hook implementations make the minimal tool just `metadata()` and
/// `execute()`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's interface description.
    fn metadata(&self) -> ToolMetadata;

    /// One-time initialization (connect, load resources).
    ///
    /// The registry guarantees this runs at most once per tool and that
    /// declared dependencies are initialized first.
    async fn initialize(&self) -> crate::error::Result<()> {
        Ok(())
    }

    /// Execute the tool.
    async fn execute(&self, context: &ToolContext, arguments: &Value) -> ToolResult;

    /// Tool-specific business rules, run as validation stage three.
    async fn validate_business(&self, _arguments: &Value, _context: &ToolContext) -> ValidationReport {
        ValidationReport::ok()
    }

    /// Tool-specific resource pre-checks, run as validation stage four.
    async fn validate_resources(&self, _arguments: &Value, _context: &ToolContext) -> ValidationReport {
        ValidationReport::ok()
    }

    /// Undo the effects of a previous execution.
    ///
    /// Invoked by the engine's replan path for failed `writable` steps;
    /// never called automatically by the executor.
    async fn rollback(&self, _execution_id: &str) -> crate::error::Result<()> {
        Ok(())
    }

    /// Release resources when the tool is unloaded.
    async fn cleanup(&self) {}

    /// Per-call execution timeout.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// A type-erased tool.
pub type BoxedTool = Box<dyn Tool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_kind_matching() {
        assert!(ParameterKind::String.matches(&json!("x")));
        assert!(ParameterKind::Integer.matches(&json!(3)));
        assert!(!ParameterKind::Integer.matches(&json!(3.5)));
        assert!(ParameterKind::Number.matches(&json!(3.5)));
        assert!(ParameterKind::Object.matches(&json!({})));
        assert!(!ParameterKind::Array.matches(&json!({})));
    }

    #[test]
    fn schema_to_json() {
        let schema = ParameterSchema::new()
            .required("path", ParameterKind::String, "File path")
            .optional("limit", ParameterKind::Integer, "Max bytes")
            .path_param("path");
        let value = schema.to_json_schema();
        assert_eq!(value["type"], "object");
        assert_eq!(value["properties"]["path"]["type"], "string");
        assert_eq!(value["required"][0], "path");
        assert!(schema.properties["path"].is_path);
        assert!(!schema.properties["limit"].is_path);
    }

    #[test]
    fn validation_report_merge() {
        let mut report = ValidationReport::ok();
        report.merge(ValidationReport {
            errors: vec!["bad".into()],
            warnings: vec!["odd".into()],
            suggestions: Vec::new(),
        });
        assert!(!report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }
}
