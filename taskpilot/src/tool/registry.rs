//! Tool registry: explicit registration, dependency-ordered initialization,
//! dispatch, and per-tool statistics.
//!
//! The registry is shared across agents and treated as immutable once
//! initialization finishes; the per-tool stats counters are the only
//! shared-mutable state and use atomics so concurrent increments cannot
//! corrupt them.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tool::{
    BoxedTool, ToolCapability, ToolContext, ToolMetadata, ToolResult, executor::execute_tool,
};

/// Atomic execution counters for one tool.
#[derive(Debug, Default)]
struct ToolStats {
    executions: AtomicU64,
    errors: AtomicU64,
    total_duration_micros: AtomicU64,
}

impl ToolStats {
    fn record(&self, success: bool, duration_secs: f64) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let micros = (duration_secs * 1_000_000.0).max(0.0) as u64;
        self.total_duration_micros.fetch_add(micros, Ordering::Relaxed);
    }
}

/// Point-in-time statistics for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToolStatsSnapshot {
    /// Total executions.
    pub executions: u64,
    /// Failed executions.
    pub errors: u64,
    /// Mean execution time in seconds, 0 when never executed.
    pub avg_duration_secs: f64,
    /// Success percentage, 100 when never executed.
    pub success_rate: f64,
}

struct Registration {
    tool: BoxedTool,
    metadata: ToolMetadata,
    dependencies: HashSet<String>,
    stats: ToolStats,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.metadata.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Registry of executable tools.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Registration>,
    initialized: Mutex<HashSet<String>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with no dependencies.
    pub fn register(&mut self, tool: BoxedTool) {
        self.register_with_dependencies(tool, Vec::new());
    }

    /// Register a tool, declaring other registered tools it depends on.
    ///
    /// Dependencies are initialized before the tool itself. Registering the
    /// same name twice replaces the earlier tool.
    pub fn register_with_dependencies(&mut self, tool: BoxedTool, dependencies: Vec<String>) {
        let metadata = tool.metadata();
        let name = metadata.name.clone();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "tool already registered, overwriting");
        }
        let missing: Vec<&String> = dependencies
            .iter()
            .filter(|dep| !self.tools.contains_key(*dep))
            .collect();
        if !missing.is_empty() {
            warn!(tool = %name, ?missing, "tool registered with missing dependencies");
        }
        info!(tool = %name, ?dependencies, "registered tool");
        self.tools.insert(
            name,
            Registration {
                tool,
                metadata,
                dependencies: dependencies.into_iter().collect(),
                stats: ToolStats::default(),
            },
        );
    }

    /// Whether a tool is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Metadata of a registered tool.
    #[must_use]
    pub fn metadata(&self, name: &str) -> Option<&ToolMetadata> {
        self.tools.get(name).map(|r| &r.metadata)
    }

    /// Metadata of every registered tool, sorted by name.
    #[must_use]
    pub fn all_metadata(&self) -> Vec<&ToolMetadata> {
        let mut all: Vec<&ToolMetadata> = self.tools.values().map(|r| &r.metadata).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Names of tools declaring a capability.
    #[must_use]
    pub fn by_capability(&self, capability: ToolCapability) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .filter(|r| r.metadata.has_capability(capability))
            .map(|r| r.metadata.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Function-calling schemas for every tool, sorted by name.
    #[must_use]
    pub fn function_schemas(&self) -> Vec<Value> {
        self.all_metadata()
            .into_iter()
            .map(ToolMetadata::to_function_schema)
            .collect()
    }

    /// Initialize one tool, initializing its dependencies first.
    ///
    /// Idempotent: already-initialized tools are skipped. Dependency cycles
    /// are rejected.
    pub async fn initialize(&self, name: &str) -> Result<()> {
        let order = self.initialization_order(name)?;
        for step in order {
            let already = {
                let initialized = self.initialized.lock().expect("initialized lock");
                initialized.contains(&step)
            };
            if already {
                continue;
            }
            let registration = self
                .tools
                .get(&step)
                .ok_or_else(|| Error::config(format!("Unknown tool: {step}")))?;
            registration.tool.initialize().await?;
            info!(tool = %step, "tool initialized");
            self.initialized
                .lock()
                .expect("initialized lock")
                .insert(step);
        }
        Ok(())
    }

    /// Initialize every registered tool.
    pub async fn initialize_all(&self) -> Result<()> {
        for name in self.names() {
            self.initialize(&name).await?;
        }
        Ok(())
    }

    /// Dependency-first initialization order for one tool.
    fn initialization_order(&self, name: &str) -> Result<Vec<String>> {
        if !self.tools.contains_key(name) {
            return Err(Error::config(format!("Unknown tool: {name}")));
        }

        let mut order = Vec::new();
        let mut visiting = HashSet::new();
        let mut done = HashSet::new();
        let mut stack = vec![(name.to_owned(), false)];

        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                visiting.remove(&current);
                if done.insert(current.clone()) {
                    order.push(current);
                }
                continue;
            }
            if done.contains(&current) {
                continue;
            }
            if !visiting.insert(current.clone()) {
                return Err(Error::config(format!(
                    "Dependency cycle involving tool '{current}'"
                )));
            }
            stack.push((current.clone(), true));
            if let Some(registration) = self.tools.get(&current) {
                for dep in &registration.dependencies {
                    if self.tools.contains_key(dep) && !done.contains(dep) {
                        stack.push((dep.clone(), false));
                    }
                }
            }
        }

        Ok(order)
    }

    /// Execute a registered tool.
    ///
    /// Builds a fresh execution id, ensures the tool is initialized, runs
    /// the validation gate and dispatch, and records per-tool statistics.
    /// Unknown tools and in-call failures come back as failed results.
    pub async fn execute(
        &self,
        name: &str,
        arguments: &Value,
        agent_id: Option<&str>,
        workspace_path: &std::path::Path,
    ) -> ToolResult {
        let Some(registration) = self.tools.get(name) else {
            return ToolResult::err(format!("Tool not found: {name}"));
        };

        if let Err(e) = self.initialize(name).await {
            return ToolResult::err(format!("Tool initialization failed: {e}"));
        }

        let mut context = ToolContext::new(Uuid::new_v4().to_string(), workspace_path);
        if let Some(agent_id) = agent_id {
            context = context.with_agent_id(agent_id);
        }

        let result = execute_tool(registration.tool.as_ref(), &context, arguments).await;
        registration.stats.record(result.success, result.execution_time);
        debug!(
            tool = %name,
            success = result.success,
            execution_time = result.execution_time,
            "tool executed"
        );
        result
    }

    /// Invoke a tool's rollback hook for a past execution.
    pub async fn rollback(&self, name: &str, execution_id: &str) -> Result<()> {
        let registration = self
            .tools
            .get(name)
            .ok_or_else(|| Error::config(format!("Unknown tool: {name}")))?;
        info!(tool = %name, execution_id, "rolling back tool execution");
        registration.tool.rollback(execution_id).await
    }

    /// Statistics for one tool.
    #[must_use]
    pub fn stats(&self, name: &str) -> Option<ToolStatsSnapshot> {
        self.tools.get(name).map(|registration| {
            let executions = registration.stats.executions.load(Ordering::Relaxed);
            let errors = registration.stats.errors.load(Ordering::Relaxed);
            let total_micros = registration
                .stats
                .total_duration_micros
                .load(Ordering::Relaxed);
            ToolStatsSnapshot {
                executions,
                errors,
                avg_duration_secs: if executions == 0 {
                    0.0
                } else {
                    total_micros as f64 / 1_000_000.0 / executions as f64
                },
                success_rate: if executions == 0 {
                    100.0
                } else {
                    (executions - errors) as f64 / executions as f64 * 100.0
                },
            }
        })
    }

    /// Run every tool's cleanup hook and forget initialization state.
    pub async fn cleanup_all(&self) {
        for registration in self.tools.values() {
            registration.tool.cleanup().await;
        }
        self.initialized.lock().expect("initialized lock").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ParameterKind, ParameterSchema, Tool, ToolCategory};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct InitProbe {
        order: Mutex<Vec<String>>,
    }

    struct ProbedTool {
        name: &'static str,
        probe: Arc<InitProbe>,
        init_count: AtomicUsize,
    }

    #[async_trait]
    impl Tool for ProbedTool {
        fn metadata(&self) -> ToolMetadata {
            ToolMetadata::new(self.name, "Probe", ToolCategory::Utility).with_parameters(
                ParameterSchema::new().optional("x", ParameterKind::String, "x"),
            )
        }

        async fn initialize(&self) -> Result<()> {
            self.init_count.fetch_add(1, Ordering::SeqCst);
            self.probe
                .order
                .lock()
                .expect("order lock")
                .push(self.name.to_owned());
            Ok(())
        }

        async fn execute(&self, _context: &ToolContext, _arguments: &Value) -> ToolResult {
            ToolResult::ok(self.name)
        }
    }

    fn probed(name: &'static str, probe: &Arc<InitProbe>) -> BoxedTool {
        Box::new(ProbedTool {
            name,
            probe: Arc::clone(probe),
            init_count: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn dependencies_initialize_first_and_once() {
        let probe = Arc::new(InitProbe::default());
        let mut registry = ToolRegistry::new();
        registry.register(probed("base", &probe));
        registry.register_with_dependencies(probed("derived", &probe), vec!["base".into()]);

        registry.initialize("derived").await.expect("initialize");
        registry.initialize("derived").await.expect("initialize again");

        let order = probe.order.lock().expect("order lock").clone();
        assert_eq!(order, vec!["base".to_owned(), "derived".to_owned()]);
    }

    #[tokio::test]
    async fn cycle_is_rejected() {
        let probe = Arc::new(InitProbe::default());
        let mut registry = ToolRegistry::new();
        registry.register_with_dependencies(probed("a", &probe), vec!["b".into()]);
        registry.register_with_dependencies(probed("b", &probe), vec!["a".into()]);

        let err = registry.initialize("a").await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn unknown_tool_fails_as_result() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("nope", &json!({}), None, std::env::temp_dir().as_path())
            .await;
        assert!(!result.success);
        assert!(result.error.expect("error").contains("not found"));
    }

    #[tokio::test]
    async fn stats_accumulate() {
        let probe = Arc::new(InitProbe::default());
        let mut registry = ToolRegistry::new();
        registry.register(probed("echoish", &probe));

        let workspace = std::env::temp_dir();
        registry.execute("echoish", &json!({}), None, &workspace).await;
        registry.execute("echoish", &json!({}), None, &workspace).await;

        let stats = registry.stats("echoish").expect("stats");
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.errors, 0);
        assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);
    }
}
