//! The agent execution engine.
//!
//! [`AgentEngine`] drives one task through the control loop:
//!
//! 1. PLAN — decompose the goal into a [`Plan`] via the planner
//! 2. ACT — execute the current step (tool, reasoning, or clarification)
//! 3. OBSERVE — append an observation and update counters
//! 4. REFLECT — replan on error streaks, stagnation, or budget pressure
//!
//! The loop is strictly sequential: one step at a time, every state
//! mutation serialized on this loop. Progress is published through a
//! non-blocking update channel; in-loop failures are data, and only
//! budget exhaustion or an engine fault terminates a run early.

mod checkpoint;
mod events;
mod listener;
mod state;

pub use checkpoint::Checkpoint;
pub use events::{AgentUpdate, UpdateKind, UpdateReceiver, UpdateSender};
pub use listener::{AgentListener, NoopListener};
pub use state::{AgentPhase, AgentState};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::budget::{BudgetEnforcer, BudgetSnapshot, BudgetUsage};
use crate::cache::{ExecutionCache, is_cacheable, reasoning_fingerprint, tool_fingerprint};
use crate::config::{AgentConfig, TaskContext};
use crate::error::{Error, Result};
use crate::llm::{ChatModel, CompletionRequest, Message, Pricing};
use crate::memory::MemoryStore;
use crate::metrics::MetricsCollector;
use crate::plan::{
    ActionType, ExecutionResult, Plan, PlanStatus, PlanStep, PlanStrategy, StepStatus,
};
use crate::planner::{ExecutionStats, Planner, ReplanDecision, replan_needed};
use crate::tool::{ToolCapability, ToolRegistry};

/// Operating mode of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    /// Full plan/act/observe/reflect loop.
    #[default]
    Autonomous,
    /// Chat with inline tool calls, no plan.
    Assistant,
    /// Full loop forced onto the debugging strategy.
    Debug,
    /// Planning only; stops once the plan is produced.
    Validate,
    /// One-step synthetic plan with a keyword tool heuristic.
    BiteSized,
}

impl AgentMode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Autonomous => "autonomous",
            Self::Assistant => "assistant",
            Self::Debug => "debug",
            Self::Validate => "validate",
            Self::BiteSized => "bite_sized",
        }
    }
}

/// Cooperative pause signal shared with an engine.
///
/// Pausing takes effect at the next pre-step budget check; an in-flight
/// tool or model call always completes first.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle {
    flag: Arc<AtomicBool>,
}

impl PauseHandle {
    /// Request a pause.
    pub fn pause(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear the pause request.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Whether a pause is requested.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Final record of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Id of the agent.
    pub agent_id: String,
    /// Terminal phase.
    pub phase: AgentPhase,
    /// Whether the run completed.
    pub success: bool,
    /// Loop iterations executed.
    pub iterations: u64,
    /// Accumulated cost in USD.
    pub total_cost: f64,
    /// Tool invocations made.
    pub total_tool_calls: u64,
    /// Errors recorded during the run.
    pub errors: Vec<String>,
    /// Final budget usage.
    pub budget: BudgetSnapshot,
    /// Wall-clock duration in seconds.
    pub execution_time: f64,
    /// Goal/strategy/progress summary.
    pub summary: Value,
}

/// Builder for [`AgentEngine`].
pub struct AgentEngineBuilder {
    model: Option<Arc<dyn ChatModel>>,
    registry: Option<Arc<ToolRegistry>>,
    context: Option<TaskContext>,
    config: AgentConfig,
    mode: AgentMode,
    pricing: Pricing,
    listener: Arc<dyn AgentListener>,
    agent_id: Option<String>,
}

impl std::fmt::Debug for AgentEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEngineBuilder")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Default for AgentEngineBuilder {
    fn default() -> Self {
        Self {
            model: None,
            registry: None,
            context: None,
            config: AgentConfig::default(),
            mode: AgentMode::default(),
            pricing: Pricing::default(),
            listener: Arc::new(NoopListener),
            agent_id: None,
        }
    }
}

impl AgentEngineBuilder {
    /// Set the language model.
    #[must_use]
    pub fn model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the shared tool registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the run context (workspace + limits).
    #[must_use]
    pub fn context(mut self, context: TaskContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the engine tuning config.
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the operating mode.
    #[must_use]
    pub const fn mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the pricing table used to derive LLM cost.
    #[must_use]
    pub const fn pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Attach a listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn AgentListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Use a caller-chosen agent id instead of a random one.
    #[must_use]
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the model, registry, or context is
    /// missing.
    pub fn build(self) -> Result<AgentEngine> {
        let model = self.model.ok_or_else(|| Error::config("engine requires a model"))?;
        let registry = self
            .registry
            .ok_or_else(|| Error::config("engine requires a tool registry"))?;
        let context = self
            .context
            .ok_or_else(|| Error::config("engine requires a task context"))?;

        let agent_id = self
            .agent_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_owned());

        let planner = Planner::new(
            Arc::clone(&model),
            registry.all_metadata().into_iter().cloned().collect(),
        )
        .with_pricing(self.pricing)
        .with_temperature(self.config.planning_temperature);

        let (updates, update_rx) = UpdateSender::channel(agent_id.clone());
        let enforcer = BudgetEnforcer::new(context.limits);
        let cache = ExecutionCache::new(
            context.limits.max_cache_size,
            context.limits.tool_cache_ttl_seconds,
        );
        let metrics = MetricsCollector::new(agent_id.clone());

        info!(agent_id = %agent_id, mode = self.mode.as_str(), "agent initialized");

        Ok(AgentEngine {
            state: AgentState::new(agent_id),
            model,
            registry,
            planner,
            memory: MemoryStore::new(),
            cache,
            enforcer,
            context,
            config: self.config,
            mode: self.mode,
            pricing: self.pricing,
            listener: self.listener,
            updates,
            update_rx: Some(update_rx),
            metrics,
            pause: PauseHandle::default(),
            system_prompt: String::new(),
            started: Instant::now(),
        })
    }
}

/// The agent execution engine. See the module docs for the loop shape.
pub struct AgentEngine {
    state: AgentState,
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    planner: Planner,
    memory: MemoryStore,
    cache: ExecutionCache,
    enforcer: BudgetEnforcer,
    context: TaskContext,
    config: AgentConfig,
    mode: AgentMode,
    pricing: Pricing,
    listener: Arc<dyn AgentListener>,
    updates: UpdateSender,
    update_rx: Option<UpdateReceiver>,
    metrics: MetricsCollector,
    pause: PauseHandle,
    system_prompt: String,
    started: Instant,
}

impl std::fmt::Debug for AgentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentEngine")
            .field("agent_id", &self.state.agent_id)
            .field("mode", &self.mode)
            .field("phase", &self.state.phase)
            .finish_non_exhaustive()
    }
}

impl AgentEngine {
    /// Start building an engine.
    #[must_use]
    pub fn builder() -> AgentEngineBuilder {
        AgentEngineBuilder::default()
    }

    /// The agent's id.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.state.agent_id
    }

    /// Current run state (read-only).
    #[must_use]
    pub const fn state(&self) -> &AgentState {
        &self.state
    }

    /// The agent's memory store.
    #[must_use]
    pub const fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Mutable access to the agent's memory (for seeding before a run).
    pub fn memory_mut(&mut self) -> &mut MemoryStore {
        &mut self.memory
    }

    /// Take the update stream. Yields `None` after the first call.
    pub fn take_updates(&mut self) -> Option<UpdateReceiver> {
        self.update_rx.take()
    }

    /// Handle used to pause the run from another task.
    #[must_use]
    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    /// The workspace this agent operates in.
    #[must_use]
    pub fn workspace_path(&self) -> &std::path::Path {
        &self.context.workspace_path
    }

    /// Export this agent's metrics (JSON + CSV) under its workspace.
    pub fn export_metrics(&self) -> Result<()> {
        self.metrics.export(&self.context.workspace_path)?;
        Ok(())
    }

    fn usage(&self) -> BudgetUsage {
        BudgetUsage {
            iterations: self.state.iteration,
            total_cost: self.state.total_cost,
            total_tool_calls: self.state.total_tool_calls,
        }
    }

    fn emit(&self, kind: UpdateKind, data: Value) {
        self.updates
            .emit(kind, self.state.phase, self.state.iteration, data);
    }

    fn set_phase(&mut self, phase: AgentPhase) {
        if self.state.phase != phase {
            debug!(agent_id = %self.state.agent_id, previous = %self.state.phase, next = %phase, "phase change");
            self.state.phase = phase;
            self.listener.on_phase_change(&self.state.agent_id, phase);
        }
    }

    /// Run a task to a terminal phase.
    ///
    /// Consumes updates via the channel from [`take_updates`](Self::take_updates);
    /// the returned [`RunReport`] is the final record. In-loop failures do
    /// not produce an `Err`: the report's phase and error list carry them.
    pub async fn run(&mut self, task: &str) -> Result<RunReport> {
        info!(agent_id = %self.state.agent_id, mode = self.mode.as_str(), task = %truncate(task, 100), "starting run");
        self.started = Instant::now();

        self.set_phase(AgentPhase::Initializing);
        self.state.task = task.to_owned();
        self.memory.add_message(Message::user(task));
        self.system_prompt = self.build_system_prompt(task);

        let similar_count = self.memory.find_similar_tasks(task, 5).len();
        self.emit(
            UpdateKind::Init,
            json!({
                "task": task,
                "agent_id": self.state.agent_id,
                "mode": self.mode.as_str(),
                "limits": self.context.limits,
                "similar_tasks_count": similar_count,
            }),
        );

        let outcome = match self.mode {
            AgentMode::Assistant => self.run_assistant(task).await,
            AgentMode::BiteSized => {
                self.install_bite_sized_plan(task);
                self.run_loop().await
            }
            AgentMode::Autonomous | AgentMode::Debug | AgentMode::Validate => {
                self.plan_phase(task).await;
                if self.mode == AgentMode::Validate {
                    self.set_phase(AgentPhase::Completed);
                    Ok(())
                } else if !self.state.phase.is_terminal() {
                    self.run_loop().await
                } else {
                    Ok(())
                }
            }
        };

        if let Err(e) = outcome {
            // EngineFailure: preserve state for post-mortem and surface a
            // failed update instead of propagating.
            warn!(agent_id = %self.state.agent_id, error = %e, "engine failure");
            self.state.add_error(e.to_string());
            self.listener.on_error(&self.state.agent_id, &e.to_string());
            self.set_phase(AgentPhase::Failed);
            self.emit(
                UpdateKind::Failed,
                json!({
                    "error": e.to_string(),
                    "errors": self.state.errors,
                    "phase": self.state.phase,
                }),
            );
        }

        self.finish_run(task).await;
        Ok(self.report())
    }

    /// Resume a paused run with the preserved plan and remaining budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] when the agent is not paused or has no
    /// plan to continue.
    pub async fn resume(&mut self) -> Result<RunReport> {
        if self.state.phase != AgentPhase::Stopped || self.state.plan.is_none() {
            return Err(Error::engine("nothing to resume"));
        }
        info!(agent_id = %self.state.agent_id, "resuming run");
        self.pause.clear();
        self.set_phase(AgentPhase::Executing);
        let task = self.state.task.clone();
        if let Err(e) = self.run_loop().await {
            self.state.add_error(e.to_string());
            self.set_phase(AgentPhase::Failed);
            self.emit(
                UpdateKind::Failed,
                json!({"error": e.to_string(), "errors": self.state.errors}),
            );
        }
        self.finish_run(&task).await;
        Ok(self.report())
    }

    // -----------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------

    async fn plan_phase(&mut self, task: &str) {
        self.set_phase(AgentPhase::Planning);
        self.emit(
            UpdateKind::Planning,
            json!({"status": "Creating execution plan..."}),
        );

        let previous_attempts: Vec<String> = self
            .memory
            .find_similar_tasks(task, 2)
            .into_iter()
            .map(|record| {
                format!(
                    "{} ({})",
                    record.goal,
                    if record.success { "succeeded" } else { "failed" }
                )
            })
            .collect();

        let strategy = match self.mode {
            AgentMode::Debug | AgentMode::Validate => Some(PlanStrategy::Debugging),
            _ => None,
        };

        let outcome = self
            .planner
            .create_plan(task, &self.context, &previous_attempts, strategy)
            .await;

        self.state.total_cost += outcome.cost;
        let mut plan = outcome.plan;
        plan.status = PlanStatus::Executing;

        self.emit(
            UpdateKind::PlanCreated,
            json!({
                "plan": plan,
                "strategy": plan.strategy.as_str(),
                "step_count": plan.steps.len(),
            }),
        );
        self.state.plan = Some(plan);
    }

    fn install_bite_sized_plan(&mut self, task: &str) {
        let tool_name = self.select_tool_for(task);
        let step = match tool_name {
            Some(tool_name) => PlanStep::tool_call(
                "bite_sized_step",
                format!("Complete task: {task}"),
                tool_name,
                json!({"task": task}),
            )
            .with_expected_outcome("Task completed quickly"),
            None => PlanStep::reasoning("bite_sized_step", format!("Complete task: {task}")),
        };
        let mut plan = Plan::new(task, vec![step], PlanStrategy::BiteSized);
        plan.status = PlanStatus::Executing;
        self.emit(
            UpdateKind::PlanCreated,
            json!({"plan": plan, "strategy": plan.strategy.as_str(), "step_count": 1}),
        );
        self.state.plan = Some(plan);
    }

    /// Keyword heuristic choosing the best tool for a quick task.
    fn select_tool_for(&self, task: &str) -> Option<String> {
        let task_lower = task.to_lowercase();
        let names = self.registry.names();

        if ["write", "create", "save"].iter().any(|w| task_lower.contains(w)) {
            for candidate in ["write_file", "create_file", "file_write"] {
                if names.iter().any(|n| n == candidate) {
                    return Some(candidate.to_owned());
                }
            }
        }
        if ["read", "open", "show"].iter().any(|w| task_lower.contains(w)) {
            for candidate in ["read_file", "file_read", "open_file"] {
                if names.iter().any(|n| n == candidate) {
                    return Some(candidate.to_owned());
                }
            }
        }
        if ["search", "look up", "lookup"].iter().any(|w| task_lower.contains(w)) {
            if names.iter().any(|n| n == "web_search") {
                return Some("web_search".to_owned());
            }
        }
        names.first().cloned()
    }

    // -----------------------------------------------------------------
    // The control loop
    // -----------------------------------------------------------------

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            if self.state.phase.is_terminal() {
                return Ok(());
            }

            self.set_phase(AgentPhase::Executing);

            // 1. Pre-step budget check (also where pause takes effect).
            if self.pause.is_paused() {
                info!(agent_id = %self.state.agent_id, "pause requested");
                self.state
                    .metadata
                    .insert("stop_reason".to_owned(), json!("pause requested"));
                self.set_phase(AgentPhase::Stopped);
                return Ok(());
            }

            let check = self.enforcer.check(&self.usage());
            if check.should_stop {
                let reason = check.reason.unwrap_or_else(|| "limit reached".to_owned());
                warn!(agent_id = %self.state.agent_id, %reason, "limit reached");
                self.emit(
                    UpdateKind::LimitReached,
                    json!({
                        "reason": reason,
                        "limits": self.enforcer.snapshot(&self.usage()),
                    }),
                );
                self.state
                    .metadata
                    .insert("stop_reason".to_owned(), json!(reason));
                self.set_phase(AgentPhase::Stopped);
                return Ok(());
            }

            // 2. Surface warnings.
            for warning in &check.warnings {
                self.listener.on_limit_warning(&self.state.agent_id, warning);
                self.emit(UpdateKind::Warning, json!({"message": warning}));
            }

            // 3. Fetch the current step.
            let Some(step) = self.current_step_snapshot() else {
                self.set_phase(AgentPhase::Completed);
                return Ok(());
            };

            let step_number = self.plan_cursor() + 1;
            let total_steps = self.plan_len();
            debug!(agent_id = %self.state.agent_id, step = step_number, total = total_steps, "executing step");
            self.emit(
                UpdateKind::StepStart,
                json!({
                    "step_number": step_number,
                    "total_steps": total_steps,
                    "step": step,
                }),
            );
            if let Some(current) = self.state.plan.as_mut().and_then(Plan::current_mut) {
                current.advance_status(StepStatus::Running);
            }

            // Dispatch by action type.
            let step_started = Instant::now();
            let result = self.execute_step(&step).await;

            self.metrics.record_step(
                step.id.clone(),
                step_started.elapsed().as_secs_f64(),
                result.success,
                result.tool_used.clone(),
            );

            // 4. Observe.
            self.set_phase(AgentPhase::Observing);
            let observation = observation_for(&result);
            self.state
                .add_observation(observation.clone(), self.config.observation_history_size);
            self.listener.on_observation(&self.state.agent_id, &observation);

            // 5. Counters. Cached results never dispatched a tool and
            // contribute nothing to cost or the tool call budget.
            self.state.iteration += 1;
            self.state.total_cost += result.cost;
            if result.tool_used.is_some() && !result.cached {
                self.state.total_tool_calls += 1;
            }

            // 6. Error streak.
            if result.success {
                self.state.consecutive_errors = 0;
            } else {
                self.state.consecutive_errors += 1;
                if let Some(error) = &result.error {
                    self.state.add_error(error.clone());
                    self.listener.on_error(&self.state.agent_id, error);
                }
            }

            self.emit(
                UpdateKind::StepResult,
                json!({
                    "step": step,
                    "result": result,
                    "observation": observation,
                }),
            );
            if !result.success {
                self.emit(
                    UpdateKind::StepError,
                    json!({
                        "step": step,
                        "error": result.error,
                    }),
                );
            }
            self.emit(UpdateKind::Observation, json!({"observation": observation}));

            // Attach the outcome to the step now: a replan may discard the
            // tail, and rolling back a discarded writable step needs the
            // execution id recorded on it.
            if let Some(current) = self.state.plan.as_mut().and_then(Plan::current_mut) {
                current.result = Some(result.clone());
            }

            // Reflect when the step demands it, the streak tripped, or the
            // trigger policy fires.
            let pressure = self.enforcer.highest_pressure(&self.usage());
            let must_replan = result.needs_replan
                || replan_needed(
                    self.state.consecutive_errors,
                    self.config.max_consecutive_errors,
                    &self.state.observations,
                    self.state.iteration,
                    self.plan_cursor(),
                    pressure,
                );

            if must_replan {
                self.handle_replanning().await;
                match self.plan_status() {
                    Some(PlanStatus::Completed) => {
                        self.set_phase(AgentPhase::Completed);
                        return Ok(());
                    }
                    Some(PlanStatus::Failed) => {
                        self.set_phase(AgentPhase::Failed);
                        self.emit(
                            UpdateKind::Failed,
                            json!({
                                "error": "plan marked as failed during reflection",
                                "errors": self.state.errors,
                            }),
                        );
                        return Ok(());
                    }
                    _ => {
                        self.set_phase(AgentPhase::Executing);
                        continue;
                    }
                }
            }

            // 7. Mark the step and advance.
            let is_complete = {
                let plan = self
                    .state
                    .plan
                    .as_mut()
                    .ok_or_else(|| Error::engine("no active plan"))?;
                if let Some(current) = plan.current_mut() {
                    current.advance_status(if result.success {
                        StepStatus::Completed
                    } else {
                        StepStatus::Failed
                    });
                }
                plan.advance();
                plan.is_complete()
            };

            if is_complete {
                self.set_phase(AgentPhase::Completed);
                return Ok(());
            }

            // 8. Periodic checkpoint.
            if self.config.checkpoint_interval > 0
                && self.state.iteration % self.config.checkpoint_interval == 0
            {
                self.write_checkpoint().await;
            }
        }
    }

    fn current_step_snapshot(&self) -> Option<PlanStep> {
        self.state.plan.as_ref().and_then(|p| p.current().cloned())
    }

    fn plan_cursor(&self) -> usize {
        self.state.plan.as_ref().map_or(0, |p| p.current_step)
    }

    fn plan_len(&self) -> usize {
        self.state.plan.as_ref().map_or(0, |p| p.steps.len())
    }

    fn plan_status(&self) -> Option<PlanStatus> {
        self.state.plan.as_ref().map(|p| p.status)
    }

    // -----------------------------------------------------------------
    // Step dispatch
    // -----------------------------------------------------------------

    async fn execute_step(&mut self, step: &PlanStep) -> ExecutionResult {
        match step.action_type {
            ActionType::ToolCall => self.execute_tool_step(step).await,
            ActionType::Reasoning => self.execute_reasoning_step(step).await,
            ActionType::Clarification => self.execute_clarification_step(step),
        }
    }

    async fn execute_tool_step(&mut self, step: &PlanStep) -> ExecutionResult {
        let Some(tool_name) = step.tool_name.as_deref() else {
            return ExecutionResult::err("Tool step missing tool name");
        };
        let Some(metadata) = self.registry.metadata(tool_name) else {
            return ExecutionResult::err(format!("Tool not found: {tool_name}"));
        };

        let cacheable = is_cacheable(&metadata.capabilities);
        let context_fingerprint = json!({
            "workspace": self.context.workspace_path,
            "agent_id": self.state.agent_id,
        });
        let key = tool_fingerprint(tool_name, &step.arguments, &context_fingerprint);

        if cacheable {
            if let Some(value) = self.cache.get(&key) {
                debug!(tool = tool_name, "serving tool result from cache");
                let output = value.as_str().map(str::to_owned).unwrap_or_else(|| value.to_string());
                let mut result = ExecutionResult::cached(output, Some(tool_name.to_owned()));
                result.metadata.insert("cache_hit".to_owned(), json!(true));
                return result;
            }
        }

        self.listener
            .on_tool_call(&self.state.agent_id, tool_name, &step.arguments);
        self.emit(
            UpdateKind::ToolCall,
            json!({"tool": tool_name, "arguments": step.arguments}),
        );

        let tool_result = self
            .registry
            .execute(
                tool_name,
                &step.arguments,
                Some(&self.state.agent_id),
                &self.context.workspace_path,
            )
            .await;

        self.emit(
            UpdateKind::ToolResult,
            json!({
                "tool": tool_name,
                "success": tool_result.success,
                "output": tool_result.output,
                "error": tool_result.error,
            }),
        );

        if tool_result.success && cacheable {
            self.cache.insert(key, json!(tool_result.output));
        }

        let mut result = ExecutionResult {
            success: tool_result.success,
            output: tool_result.output,
            error: tool_result.error,
            tool_used: Some(tool_name.to_owned()),
            cost: tool_result.cost,
            cached: false,
            needs_replan: false,
            metadata: tool_result.metadata,
        };
        result
            .metadata
            .insert("execution_id".to_owned(), json!(tool_result.execution_id));
        result.metadata.insert(
            "execution_time".to_owned(),
            json!(tool_result.execution_time),
        );
        result
    }

    async fn execute_reasoning_step(&mut self, step: &PlanStep) -> ExecutionResult {
        let goal = self
            .state
            .plan
            .as_ref()
            .map_or_else(|| self.state.task.clone(), |p| p.goal.clone());

        let mut messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(format!("Task: {goal}")),
            Message::user(format!("Current step to reason about: {}", step.description)),
        ];
        let recent = self.state.recent_observations(3);
        if !recent.is_empty() {
            let listing: Vec<String> = recent.iter().map(|o| format!("- {o}")).collect();
            messages.push(Message::system(format!(
                "Recent observations:\n{}",
                listing.join("\n")
            )));
        }

        let key = reasoning_fingerprint(&messages, self.config.reasoning_temperature);
        if self.config.enable_reasoning_cache {
            if let Some(value) = self.cache.get(&key) {
                debug!("serving reasoning result from cache");
                let output = value.as_str().map(str::to_owned).unwrap_or_default();
                let mut result = ExecutionResult::cached(output, None);
                result.metadata.insert("cache_hit".to_owned(), json!(true));
                return result;
            }
        }

        let request = CompletionRequest::new(messages, self.config.reasoning_temperature)
            .max_tokens(1024);

        match self.model.complete(&request).await {
            Ok(response) => {
                let cost = self.pricing.cost(response.usage);
                if self.config.enable_reasoning_cache && !response.content.is_empty() {
                    self.cache.insert(key, json!(response.content));
                }
                self.memory.add_message(Message::assistant(format!(
                    "Reasoning for '{}': {}",
                    step.description, response.content
                )));
                let mut result = ExecutionResult::ok(response.content);
                result.cost = cost;
                result
                    .metadata
                    .insert("usage".to_owned(), json!(response.usage));
                result
            }
            Err(e) => ExecutionResult::err(format!("Reasoning error: {e}")),
        }
    }

    /// Clarification: answered from memory in autonomous mode, otherwise
    /// always `success=false, needs_replan=true`.
    fn execute_clarification_step(&mut self, step: &PlanStep) -> ExecutionResult {
        if self.mode == AgentMode::Autonomous {
            let similar = self.memory.find_similar_tasks(&step.description, 3);
            if !similar.is_empty() {
                info!(
                    agent_id = %self.state.agent_id,
                    similar = similar.len(),
                    "clarification inferred from memory"
                );
                // Distinct event so audits can tell inferred answers from
                // user-supplied ones.
                self.emit(
                    UpdateKind::ClarificationInferred,
                    json!({
                        "questions": step.metadata.questions,
                        "similar_tasks": similar.len(),
                    }),
                );
                let mut result = ExecutionResult::ok("Inferred approach from similar tasks");
                result
                    .metadata
                    .insert("clarification_inferred".to_owned(), json!(true));
                return result;
            }
        }

        let questions = if step.metadata.questions.is_empty() {
            vec!["Need clarification to proceed".to_owned()]
        } else {
            step.metadata.questions.clone()
        };

        let mut result = ExecutionResult::err(format!("Awaiting user input: {questions:?}"));
        result.output = "Clarification needed".to_owned();
        result.needs_replan = true;
        result
            .metadata
            .insert("clarification_needed".to_owned(), json!(questions));
        result
    }

    // -----------------------------------------------------------------
    // Reflection
    // -----------------------------------------------------------------

    async fn handle_replanning(&mut self) {
        self.set_phase(AgentPhase::Replanning);
        self.listener.on_replan(&self.state.agent_id, self.plan_cursor());
        self.emit(
            UpdateKind::Replanning,
            json!({
                "reason": "Observations suggest plan adjustment needed",
                "observations": self.state.recent_observations(5),
                "consecutive_errors": self.state.consecutive_errors,
            }),
        );

        let stats = ExecutionStats {
            iterations: self.state.iteration,
            total_cost: self.state.total_cost,
            total_tool_calls: self.state.total_tool_calls,
            consecutive_errors: self.state.consecutive_errors,
        };
        let observations = self.state.observations.clone();

        let Some(plan) = self.state.plan.as_mut() else {
            return;
        };
        let old_tail: Vec<PlanStep> = plan.steps[plan.current_step.min(plan.steps.len())..].to_vec();

        let outcome = self.planner.replan(plan, &observations, &stats).await;
        self.state.total_cost += outcome.cost;

        match outcome.decision {
            ReplanDecision::Adjust => {
                self.rollback_discarded_steps(&old_tail).await;

                let (goal, cursor) = {
                    let plan = self.state.plan.as_ref().expect("plan present");
                    (plan.goal.clone(), plan.current_step)
                };
                self.memory
                    .archive_observations(&goal, cursor, &self.state.observations);
                let history = self.config.observation_history_size;
                if self.state.observations.len() > history {
                    let drop = self.state.observations.len() - history;
                    self.state.observations.drain(..drop);
                }

                self.state.consecutive_errors = 0;
                self.emit(
                    UpdateKind::PlanUpdated,
                    json!({
                        "plan": self.state.plan,
                        "reason": "Plan adjusted based on observations",
                        "observations_archived": true,
                    }),
                );
            }
            ReplanDecision::AskForHelp => {
                self.emit(
                    UpdateKind::PlanUpdated,
                    json!({
                        "plan": self.state.plan,
                        "reason": "Clarification step inserted",
                    }),
                );
            }
            ReplanDecision::Continue => {
                debug!(agent_id = %self.state.agent_id, "continuing with current plan");
                // Give the current plan another chance to make progress.
                self.state.consecutive_errors = 0;
            }
            ReplanDecision::Complete | ReplanDecision::Fail => {}
        }
    }

    /// Roll back failed `writable` tool steps whose results are being
    /// discarded by a plan adjustment.
    async fn rollback_discarded_steps(&mut self, discarded: &[PlanStep]) {
        for step in discarded {
            let Some(result) = &step.result else { continue };
            if result.success {
                continue;
            }
            let Some(tool_name) = &result.tool_used else { continue };
            let writable = self
                .registry
                .metadata(tool_name)
                .is_some_and(|m| m.has_capability(ToolCapability::Writable));
            if !writable {
                continue;
            }
            let Some(execution_id) = result.metadata.get("execution_id").and_then(Value::as_str)
            else {
                continue;
            };
            if let Err(e) = self.registry.rollback(tool_name, execution_id).await {
                warn!(tool = %tool_name, error = %e, "rollback failed");
            }
        }
    }

    // -----------------------------------------------------------------
    // Assistant mode
    // -----------------------------------------------------------------

    async fn run_assistant(&mut self, task: &str) -> Result<()> {
        self.set_phase(AgentPhase::Executing);
        self.memory.add_message(Message::system(self.system_prompt.clone()));

        let mut messages = vec![Message::system(self.system_prompt.clone())];
        messages.extend(self.memory.recent_messages(10));

        let request = CompletionRequest::new(messages, self.config.reasoning_temperature)
            .max_tokens(2048)
            .with_tools(self.registry.function_schemas());

        let response = self.model.complete(&request).await.map_err(|e| {
            Error::llm(format!("assistant completion failed: {e}"))
        })?;

        self.state.iteration += 1;
        self.state.total_cost += self.pricing.cost(response.usage);

        if !response.content.is_empty() {
            self.memory.add_message(Message::assistant(response.content.clone()));
            self.emit(
                UpdateKind::AssistantResponse,
                json!({"content": response.content}),
            );
        }

        for call in &response.tool_calls {
            self.listener
                .on_tool_call(&self.state.agent_id, &call.name, &call.arguments);
            self.emit(
                UpdateKind::ToolCall,
                json!({"tool": call.name, "arguments": call.arguments}),
            );

            let result = self
                .registry
                .execute(
                    &call.name,
                    &call.arguments,
                    Some(&self.state.agent_id),
                    &self.context.workspace_path,
                )
                .await;
            self.state.total_tool_calls += 1;

            self.memory.add_message(Message::tool(
                &call.id,
                if result.success {
                    result.output.clone()
                } else {
                    format!("Error: {}", result.error.clone().unwrap_or_default())
                },
            ));
            self.emit(
                UpdateKind::ToolResult,
                json!({
                    "tool": call.name,
                    "success": result.success,
                    "output": result.output,
                    "error": result.error,
                }),
            );
        }

        self.set_phase(AgentPhase::Completed);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------

    async fn finish_run(&mut self, task: &str) {
        let execution_time = self.started.elapsed().as_secs_f64();

        match self.state.phase {
            AgentPhase::Completed => {
                if let Some(plan) = self.state.plan.clone() {
                    self.memory.learn_from_success(task, &plan);
                }
                self.emit(
                    UpdateKind::Completed,
                    json!({
                        "success": true,
                        "execution_time": execution_time,
                        "summary": self.execution_summary(execution_time),
                    }),
                );
            }
            AgentPhase::Stopped => {
                let reason = self
                    .state
                    .metadata
                    .get("stop_reason")
                    .and_then(Value::as_str)
                    .unwrap_or("Execution stopped before completion")
                    .to_owned();
                self.emit(
                    UpdateKind::Stopped,
                    json!({
                        "success": false,
                        "execution_time": execution_time,
                        "reason": reason,
                        "errors": self.state.errors,
                        "limits": self.enforcer.snapshot(&self.usage()),
                    }),
                );
            }
            // Failed updates are emitted where the failure is detected.
            _ => {}
        }

        self.listener.on_complete(&self.state.agent_id, self.state.phase);

        self.metrics
            .record_session(self.state.phase == AgentPhase::Completed);
        if self.config.export_metrics {
            if let Err(e) = self.metrics.export(&self.context.workspace_path) {
                warn!(agent_id = %self.state.agent_id, error = %e, "metrics export failed");
            }
        }
        self.emit(UpdateKind::Metrics, json!(self.metrics.summary()));
    }

    fn execution_summary(&self, execution_time: f64) -> Value {
        let (goal, strategy, total, completed) = self.state.plan.as_ref().map_or_else(
            || (self.state.task.clone(), "none".to_owned(), 0, 0),
            |plan| {
                (
                    plan.goal.clone(),
                    plan.strategy.as_str().to_owned(),
                    plan.steps.len(),
                    plan.steps
                        .iter()
                        .filter(|s| s.status == StepStatus::Completed)
                        .count(),
                )
            },
        );

        json!({
            "goal": goal,
            "strategy": strategy,
            "steps": {
                "total": total,
                "completed": completed,
                "success_rate": if total > 0 { completed as f64 / total as f64 * 100.0 } else { 0.0 },
            },
            "execution": {
                "iterations": self.state.iteration,
                "total_cost": self.state.total_cost,
                "total_tool_calls": self.state.total_tool_calls,
                "duration": execution_time,
            },
            "learnings": self.state.recent_observations(5),
        })
    }

    fn report(&self) -> RunReport {
        RunReport {
            agent_id: self.state.agent_id.clone(),
            phase: self.state.phase,
            success: self.state.phase == AgentPhase::Completed,
            iterations: self.state.iteration,
            total_cost: self.state.total_cost,
            total_tool_calls: self.state.total_tool_calls,
            errors: self.state.errors.clone(),
            budget: self.enforcer.snapshot(&self.usage()),
            execution_time: self.started.elapsed().as_secs_f64(),
            summary: self.execution_summary(self.started.elapsed().as_secs_f64()),
        }
    }

    async fn write_checkpoint(&mut self) {
        let checkpoint = Checkpoint::capture(
            &self.state,
            self.enforcer.snapshot(&self.usage()),
            self.metrics.summary(),
            self.config.observation_history_size,
        );

        // Best-effort: a failed write never aborts a run.
        match checkpoint.save(&self.context.workspace_path).await {
            Ok(path) => {
                self.listener
                    .on_checkpoint(&self.state.agent_id, self.state.iteration);
                if let Ok(value) = serde_json::to_value(&checkpoint) {
                    self.memory.save_checkpoint(value);
                }
                self.emit(
                    UpdateKind::Checkpoint,
                    json!({
                        "iteration": self.state.iteration,
                        "path": path,
                    }),
                );
            }
            Err(e) => {
                warn!(agent_id = %self.state.agent_id, error = %e, "checkpoint write failed");
            }
        }
    }

    fn build_system_prompt(&self, task: &str) -> String {
        let mut tools_desc = Vec::new();
        for metadata in self.registry.all_metadata() {
            tools_desc.push(format!("**{}**: {}", metadata.name, metadata.description));
        }

        let patterns = self.memory.common_patterns();
        let patterns_desc = if patterns.is_empty() {
            "- No patterns yet".to_owned()
        } else {
            patterns
                .iter()
                .take(3)
                .map(|p| format!("- {p}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let similar: Vec<String> = self
            .memory
            .find_similar_tasks(task, 2)
            .into_iter()
            .map(|record| {
                format!(
                    "- {} (success: {})",
                    truncate(&record.goal, 50),
                    record.success
                )
            })
            .collect();
        let task_context = if similar.is_empty() {
            String::new()
        } else {
            format!("\n## RELEVANT PAST TASKS:\n{}\n", similar.join("\n"))
        };

        format!(
            "# Autonomous Agent\n\
             ## Agent ID: {agent_id}\n\
             ## Mode: {mode}\n\n\
             ## CAPABILITIES:\n\
             You have access to {tool_count} tools:\n{tools}\n\n\
             ## WORKSPACE:\n\
             - Path: {workspace}\n\
             - Memory: {successes} successful tasks in history\n\
             {task_context}\n\
             ## OPERATING PRINCIPLES:\n\
             1. Take initiative, don't ask for permission to use tools\n\
             2. Minimize steps, cost, and time\n\
             3. Learn from observations and adjust plans\n\
             4. Respect limits and handle errors gracefully\n\n\
             ## LIMITS (HARD CONSTRAINTS):\n\
             - Max iterations: {max_iterations}\n\
             - Max cost: ${max_cost:.4}\n\
             - Max tool calls: {max_tool_calls}\n\
             - Max time: {max_time}s\n\n\
             ## LEARNING FROM HISTORY:\n\
             Common successful patterns:\n{patterns}\n",
            agent_id = self.state.agent_id,
            mode = self.mode.as_str(),
            tool_count = self.registry.names().len(),
            tools = tools_desc.join("\n"),
            workspace = self.context.workspace_path.display(),
            successes = self.memory.successful_task_count(),
            task_context = task_context,
            max_iterations = self.context.limits.max_iterations,
            max_cost = self.context.limits.max_cost,
            max_tool_calls = self.context.limits.max_tool_calls,
            max_time = self.context.limits.max_time_seconds,
            patterns = patterns_desc,
        )
    }
}

/// Textual observation derived from a step result.
fn observation_for(result: &ExecutionResult) -> String {
    match (&result.tool_used, result.success) {
        (Some(tool), true) => format!("Tool '{tool}' succeeded: {}", truncate(&result.output, 100)),
        (Some(tool), false) => format!(
            "Tool '{tool}' failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
        (None, true) => format!("Reasoning completed: {}", truncate(&result.output, 100)),
        (None, false) => format!(
            "Reasoning failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_owned()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_text_shapes() {
        let ok = ExecutionResult {
            tool_used: Some("write_file".into()),
            ..ExecutionResult::ok("done")
        };
        assert!(observation_for(&ok).starts_with("Tool 'write_file' succeeded"));

        let failed = ExecutionResult {
            tool_used: Some("write_file".into()),
            ..ExecutionResult::err("boom")
        };
        assert!(observation_for(&failed).contains("failed: boom"));

        let reasoning = ExecutionResult::ok("thought");
        assert!(observation_for(&reasoning).starts_with("Reasoning completed"));
    }

    #[test]
    fn pause_handle_round_trip() {
        let handle = PauseHandle::default();
        assert!(!handle.is_paused());
        handle.pause();
        assert!(handle.is_paused());
        handle.clear();
        assert!(!handle.is_paused());
    }
}
