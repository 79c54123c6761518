//! Multi-agent coordination.
//!
//! The orchestrator owns every agent it creates: each gets a unique id and
//! its own workspace subdirectory, and runs under one of three strategies.
//! Memory is shared by value only — children import snapshots, never live
//! references to a parent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentEngine, AgentMode, AgentPhase, RunReport};
use crate::config::{AgentConfig, Limits, TaskContext};
use crate::error::{Error, Result};
use crate::llm::{ChatModel, Message, Pricing};
use crate::memory::MemorySnapshot;
use crate::tool::ToolRegistry;

/// Directory under the orchestrator root holding agent workspaces.
const SHARED_DIR: &str = "shared";

/// How a set of tasks is coordinated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationStrategy {
    /// All agents run concurrently; results are aggregated at the end.
    Parallel,
    /// Agents run one at a time, each seeded with its predecessor's result.
    Sequential,
    /// A coordinator delegates each task to a child, then aggregates.
    Hierarchical,
}

impl CoordinationStrategy {
    /// Wire name of the strategy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
            Self::Hierarchical => "hierarchical",
        }
    }
}

/// Outcome of one agent's run inside a coordination.
#[derive(Debug, Clone)]
pub struct AgentRunSummary {
    /// Id of the agent.
    pub agent_id: String,
    /// The task it ran.
    pub task: String,
    /// Whether it completed.
    pub success: bool,
    /// Terminal phase.
    pub phase: AgentPhase,
    /// Final report payload.
    pub result: Value,
}

impl AgentRunSummary {
    fn from_report(task: &str, report: &RunReport) -> Self {
        Self {
            agent_id: report.agent_id.clone(),
            task: task.to_owned(),
            success: report.success,
            phase: report.phase,
            result: json!({
                "type": report.phase.as_str(),
                "iterations": report.iterations,
                "total_cost": report.total_cost,
                "total_tool_calls": report.total_tool_calls,
                "errors": report.errors,
                "summary": report.summary,
            }),
        }
    }
}

/// Result of coordinating a set of tasks.
#[derive(Debug, Clone)]
pub struct CoordinationReport {
    /// Strategy used.
    pub strategy: CoordinationStrategy,
    /// Per-agent outcomes (children only, for hierarchical runs).
    pub results: Vec<AgentRunSummary>,
    /// How many agents completed.
    pub success_count: usize,
    /// The coordinator's outcome, for hierarchical runs.
    pub coordinator: Option<AgentRunSummary>,
}

struct AgentEntry {
    engine: AgentEngine,
    task: String,
    last_activity: Instant,
}

/// Creates and coordinates agents under a shared workspace root.
pub struct Orchestrator {
    workspace_root: PathBuf,
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    limits: Limits,
    config: AgentConfig,
    pricing: Pricing,
    agents: HashMap<String, AgentEntry>,
    created: u64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workspace_root", &self.workspace_root)
            .field("agents", &self.agents.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator over a workspace root.
    #[must_use]
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        model: Arc<dyn ChatModel>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            model,
            registry,
            limits: Limits::default(),
            config: AgentConfig::default(),
            pricing: Pricing::default(),
            agents: HashMap::new(),
            created: 0,
        }
    }

    /// Set the per-agent limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the per-agent engine config.
    #[must_use]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the pricing table passed to every agent.
    #[must_use]
    pub const fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Number of agents currently tracked.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Phases of every tracked agent by id.
    #[must_use]
    pub fn agent_phases(&self) -> HashMap<String, AgentPhase> {
        self.agents
            .iter()
            .map(|(id, entry)| (id.clone(), entry.engine.state().phase))
            .collect()
    }

    /// Memory snapshot of a tracked agent.
    #[must_use]
    pub fn memory_snapshot(&self, agent_id: &str) -> Option<MemorySnapshot> {
        self.agents
            .get(agent_id)
            .map(|entry| entry.engine.memory().snapshot())
    }

    /// Create a new agent with its own workspace subdirectory.
    ///
    /// The agent is not tracked until it has run through one of the
    /// coordination strategies.
    pub fn create_agent(&mut self) -> Result<AgentEngine> {
        self.created += 1;
        let agent_id = format!(
            "agent_{}_{}",
            self.created,
            &Uuid::new_v4().simple().to_string()[..8]
        );

        let workspace = self.workspace_root.join(SHARED_DIR).join(&agent_id);
        std::fs::create_dir_all(&workspace)?;

        let context = TaskContext::new(agent_id.clone(), &workspace).with_limits(self.limits);
        let engine = AgentEngine::builder()
            .model(Arc::clone(&self.model))
            .registry(Arc::clone(&self.registry))
            .context(context)
            .config(self.config.clone())
            .pricing(self.pricing)
            .mode(AgentMode::Autonomous)
            .agent_id(agent_id.clone())
            .build()?;

        info!(agent_id = %agent_id, workspace = %workspace.display(), "created agent");
        Ok(engine)
    }

    /// Run a set of tasks under a coordination strategy.
    pub async fn coordinate(
        &mut self,
        tasks: &[String],
        strategy: CoordinationStrategy,
    ) -> Result<CoordinationReport> {
        if tasks.is_empty() {
            return Err(Error::config("no tasks to coordinate"));
        }
        info!(strategy = strategy.as_str(), tasks = tasks.len(), "coordinating agents");

        match strategy {
            CoordinationStrategy::Parallel => self.run_parallel(tasks).await,
            CoordinationStrategy::Sequential => self.run_sequential(tasks).await,
            CoordinationStrategy::Hierarchical => self.run_hierarchical(tasks).await,
        }
    }

    /// All agents start concurrently; no cross-agent sharing during the run.
    async fn run_parallel(&mut self, tasks: &[String]) -> Result<CoordinationReport> {
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut engine = self.create_agent()?;
            let task = task.clone();
            handles.push(tokio::spawn(async move {
                let report = engine.run(&task).await;
                (engine, task, report)
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for handle in futures::future::join_all(handles).await {
            match handle {
                Ok((engine, task, Ok(report))) => {
                    results.push(AgentRunSummary::from_report(&task, &report));
                    self.track(engine, task);
                }
                Ok((engine, task, Err(e))) => {
                    results.push(AgentRunSummary {
                        agent_id: engine.agent_id().to_owned(),
                        task: task.clone(),
                        success: false,
                        phase: AgentPhase::Failed,
                        result: json!({"type": "failed", "error": e.to_string()}),
                    });
                    self.track(engine, task);
                }
                Err(e) => {
                    warn!(error = %e, "parallel agent task panicked");
                    results.push(AgentRunSummary {
                        agent_id: String::new(),
                        task: String::new(),
                        success: false,
                        phase: AgentPhase::Failed,
                        result: json!({"type": "failed", "error": e.to_string()}),
                    });
                }
            }
        }

        let success_count = results.iter().filter(|r| r.success).count();
        Ok(CoordinationReport {
            strategy: CoordinationStrategy::Parallel,
            results,
            success_count,
            coordinator: None,
        })
    }

    /// Agents run one at a time; each successor is seeded with the
    /// predecessor's final result as a system message.
    async fn run_sequential(&mut self, tasks: &[String]) -> Result<CoordinationReport> {
        let mut results: Vec<AgentRunSummary> = Vec::with_capacity(tasks.len());
        let mut previous_result: Option<Value> = None;

        for task in tasks {
            let mut engine = self.create_agent()?;

            if let Some(previous) = &previous_result {
                engine.memory_mut().add_message(Message::system(format!(
                    "Previous agent result: {}",
                    serde_json::to_string_pretty(previous).unwrap_or_default()
                )));
            }

            let summary = match engine.run(task).await {
                Ok(report) => AgentRunSummary::from_report(task, &report),
                Err(e) => AgentRunSummary {
                    agent_id: engine.agent_id().to_owned(),
                    task: task.clone(),
                    success: false,
                    phase: AgentPhase::Failed,
                    result: json!({"type": "failed", "error": e.to_string()}),
                },
            };
            previous_result = Some(summary.result.clone());
            results.push(summary);
            self.track(engine, task.clone());
        }

        let success_count = results.iter().filter(|r| r.success).count();
        Ok(CoordinationReport {
            strategy: CoordinationStrategy::Sequential,
            results,
            success_count,
            coordinator: None,
        })
    }

    /// A coordinator delegates every task to a child agent seeded with a
    /// snapshot of the coordinator's memory, then runs an aggregation task.
    async fn run_hierarchical(&mut self, tasks: &[String]) -> Result<CoordinationReport> {
        let coordinator_goal = format!("Coordinate subtasks: {}", tasks.join(", "));
        let mut coordinator = self.create_agent()?;
        coordinator
            .memory_mut()
            .add_message(Message::user(coordinator_goal.clone()));
        let seed = coordinator.memory().snapshot();

        let mut delegated = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut child = self.create_agent()?;
            child.memory_mut().import(seed.clone());

            let summary = match child.run(task).await {
                Ok(report) => AgentRunSummary::from_report(task, &report),
                Err(e) => AgentRunSummary {
                    agent_id: child.agent_id().to_owned(),
                    task: task.clone(),
                    success: false,
                    phase: AgentPhase::Failed,
                    result: json!({"type": "failed", "error": e.to_string()}),
                },
            };

            coordinator.memory_mut().add_message(Message::system(format!(
                "Delegated task '{}' finished ({}): {}",
                task,
                if summary.success { "success" } else { "failure" },
                summary.result
            )));
            delegated.push(summary);
            self.track(child, task.clone());
        }

        let aggregate_task = format!("Aggregate results from {} subtasks", tasks.len());
        let coordinator_summary = match coordinator.run(&aggregate_task).await {
            Ok(report) => AgentRunSummary::from_report(&aggregate_task, &report),
            Err(e) => AgentRunSummary {
                agent_id: coordinator.agent_id().to_owned(),
                task: aggregate_task.clone(),
                success: false,
                phase: AgentPhase::Failed,
                result: json!({"type": "failed", "error": e.to_string()}),
            },
        };
        self.track(coordinator, coordinator_goal);

        let success_count = delegated.iter().filter(|r| r.success).count();
        Ok(CoordinationReport {
            strategy: CoordinationStrategy::Hierarchical,
            results: delegated,
            success_count,
            coordinator: Some(coordinator_summary),
        })
    }

    fn track(&mut self, engine: AgentEngine, task: String) {
        self.agents.insert(
            engine.agent_id().to_owned(),
            AgentEntry {
                engine,
                task,
                last_activity: Instant::now(),
            },
        );
    }

    /// Remove agents that have sat in a terminal phase longer than
    /// `max_age`, exporting their metrics when configured.
    ///
    /// Returns how many agents were removed.
    pub fn cleanup_idle(&mut self, max_age: Duration) -> usize {
        let expired: Vec<String> = self
            .agents
            .iter()
            .filter(|(_, entry)| {
                entry.engine.state().phase.is_terminal() && entry.last_activity.elapsed() > max_age
            })
            .map(|(id, _)| id.clone())
            .collect();

        for agent_id in &expired {
            if let Some(entry) = self.agents.remove(agent_id) {
                if self.config.export_metrics {
                    if let Err(e) = entry.engine.export_metrics() {
                        warn!(agent_id = %agent_id, error = %e, "metrics export on cleanup failed");
                    }
                }
                info!(agent_id = %agent_id, task = %entry.task, "cleaned up idle agent");
            }
        }

        expired.len()
    }
}
