//! Pre-dispatch validation pipeline and workspace sandbox.
//!
//! Four stages run in order — schema, security, business logic, resources —
//! and all of them run even when earlier stages fail, so a single report
//! carries every finding. Execution proceeds only with zero errors.

use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::tool::{Tool, ToolCapability, ToolContext, ToolMetadata, ValidationReport};

/// Patterns that flag an argument as potentially dangerous.
///
/// Matches produce warnings; the hard traversal error for writable tools is
/// applied separately on path-typed arguments.
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    ("..", "directory traversal"),
    ("<script>", "HTML injection"),
    ("${", "template injection"),
    ("{{", "template injection"),
    ("exec(", "code execution"),
    ("eval(", "code execution"),
    ("system(", "system call"),
    ("subprocess", "subprocess call"),
];

/// Run the full validation pipeline for one tool call.
pub async fn validate_arguments(
    tool: &dyn Tool,
    metadata: &ToolMetadata,
    arguments: &Value,
    context: &ToolContext,
) -> ValidationReport {
    let mut report = validate_schema(metadata, arguments);
    report.merge(validate_security(metadata, arguments));
    report.merge(tool.validate_business(arguments, context).await);
    report.merge(tool.validate_resources(arguments, context).await);
    report
}

/// Stage one: required parameters, unknown parameters, declared types.
pub(crate) fn validate_schema(metadata: &ToolMetadata, arguments: &Value) -> ValidationReport {
    let mut report = ValidationReport::ok();
    let schema = &metadata.parameters;

    let Some(args) = arguments.as_object() else {
        report
            .errors
            .push(format!("Arguments must be a JSON object, got {}", json_type(arguments)));
        return report;
    };

    for required in &schema.required {
        if !args.contains_key(required) {
            report
                .errors
                .push(format!("Missing required parameter '{required}'"));
        }
    }

    for (name, value) in args {
        match schema.properties.get(name) {
            Some(spec) => {
                if !spec.kind.matches(value) {
                    report.errors.push(format!(
                        "Parameter '{name}' has wrong type. Expected {}, got {}",
                        spec.kind.as_str(),
                        json_type(value)
                    ));
                }
            }
            None => report.warnings.push(format!("Unknown parameter '{name}'")),
        }
    }

    report
}

/// Stage two: injection sigils and traversal markers.
///
/// String arguments containing known-dangerous substrings are flagged as
/// warnings. For tools declaring the `writable` capability, a `..` segment
/// in a path-typed argument is a hard error.
pub(crate) fn validate_security(metadata: &ToolMetadata, arguments: &Value) -> ValidationReport {
    let mut report = ValidationReport::ok();
    let Some(args) = arguments.as_object() else {
        return report;
    };

    let writable = metadata.has_capability(ToolCapability::Writable)
        || metadata.has_capability(ToolCapability::Destructive);

    for (name, value) in args {
        let Some(text) = value.as_str() else { continue };
        let lowered = text.to_lowercase();

        for (pattern, description) in DANGEROUS_PATTERNS {
            if lowered.contains(pattern) {
                report.warnings.push(format!(
                    "Parameter '{name}' contains potential {description}: {}",
                    truncate(text, 50)
                ));
            }
        }

        let is_path = metadata
            .parameters
            .properties
            .get(name)
            .is_some_and(|spec| spec.is_path);
        if writable && is_path && has_parent_component(text) {
            report
                .errors
                .push(format!("Parameter '{name}' contains path traversal: {text}"));
        }
    }

    report
}

fn has_parent_component(text: &str) -> bool {
    Path::new(text)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Resolve a path argument against the workspace sandbox.
///
/// The input is joined onto `workspace` and the result must stay inside it
/// after symlink resolution: the deepest existing ancestor is canonicalized
/// and checked against the canonicalized workspace root. Absolute inputs
/// are re-rooted under the workspace.
pub fn resolve_sandboxed(workspace: &Path, input: &str) -> Result<PathBuf> {
    let workspace_canonical = workspace
        .canonicalize()
        .map_err(|e| Error::validation(format!("Workspace not accessible: {e}")))?;

    let relative = Path::new(input);
    let mut resolved = workspace_canonical.clone();
    for component in relative.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(&workspace_canonical) {
                    return Err(Error::validation(format!(
                        "Path '{input}' escapes the workspace via traversal"
                    )));
                }
            }
            Component::Normal(part) => resolved.push(part),
        }
    }

    // Canonicalize the deepest existing ancestor so symlinks cannot smuggle
    // the path outside the sandbox.
    let mut probe = resolved.clone();
    let mut tail = Vec::new();
    loop {
        match probe.canonicalize() {
            Ok(canonical) => {
                let mut real = canonical;
                for part in tail.iter().rev() {
                    real.push(part);
                }
                if !real.starts_with(&workspace_canonical) {
                    return Err(Error::validation(format!(
                        "Path '{input}' resolves outside the workspace"
                    )));
                }
                return Ok(real);
            }
            Err(_) => match (probe.file_name().map(std::ffi::OsStr::to_os_string), probe.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name);
                    probe = parent.to_path_buf();
                }
                _ => {
                    return Err(Error::validation(format!(
                        "Path '{input}' cannot be resolved"
                    )));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ParameterKind, ParameterSchema, ToolCategory};
    use serde_json::json;

    fn write_metadata() -> ToolMetadata {
        ToolMetadata::new("write_file", "Write a file", ToolCategory::FileSystem)
            .with_parameters(
                ParameterSchema::new()
                    .required("path", ParameterKind::String, "File path")
                    .required("content", ParameterKind::String, "File body")
                    .path_param("path"),
            )
            .with_capabilities(vec![ToolCapability::Writable])
    }

    #[test]
    fn schema_missing_required() {
        let report = validate_schema(&write_metadata(), &json!({"path": "a.txt"}));
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("content"));
    }

    #[test]
    fn schema_unknown_parameter_warns() {
        let report = validate_schema(
            &write_metadata(),
            &json!({"path": "a.txt", "content": "x", "mode": "append"}),
        );
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("mode")));
    }

    #[test]
    fn schema_type_mismatch() {
        let report = validate_schema(&write_metadata(), &json!({"path": 42, "content": "x"}));
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("wrong type"));
    }

    #[test]
    fn security_traversal_is_hard_error_for_writable() {
        let report = validate_security(
            &write_metadata(),
            &json!({"path": "../etc/passwd", "content": "x"}),
        );
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("traversal"));
    }

    #[test]
    fn security_injection_is_warning() {
        let report = validate_security(
            &write_metadata(),
            &json!({"path": "a.txt", "content": "${injected}"}),
        );
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("template injection")));
    }

    #[test]
    fn sandbox_rejects_escape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = resolve_sandboxed(dir.path(), "../outside.txt");
        assert!(err.is_err());
    }

    #[test]
    fn sandbox_allows_nested_new_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolved = resolve_sandboxed(dir.path(), "sub/dir/new.txt").expect("resolve");
        assert!(resolved.starts_with(dir.path().canonicalize().expect("canonicalize")));
        assert!(resolved.ends_with("sub/dir/new.txt"));
    }

    #[test]
    fn sandbox_reroots_absolute_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolved = resolve_sandboxed(dir.path(), "/etc/passwd").expect("resolve");
        assert!(resolved.starts_with(dir.path().canonicalize().expect("canonicalize")));
    }
}
