//! Plan creation from a goal via the language model.
//!
//! The planner selects a strategy from the goal text, issues one completion
//! requesting a strategy-specific JSON schema, and validates the parsed
//! steps against the tool registry. Malformed output degrades to a generic
//! three-step fallback plan rather than an error.

mod parse;
mod replan;

pub use replan::{ExecutionStats, ReplanDecision, ReplanOutcome, replan_needed};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::TaskContext;
use crate::llm::{ChatModel, CompletionRequest, Message, Pricing, Usage};
use crate::plan::{ActionType, Plan, PlanStatus, PlanStep, PlanStrategy, StepMetadata};
use crate::tool::ToolMetadata;

/// Planning prompt for linear tasks.
const STEP_BY_STEP_PROMPT: &str = r#"You are an expert task planner specializing in systematic, step-by-step execution.

Given a user's goal, create a detailed, sequential execution plan. Each step should be:
1. Concrete and actionable
2. Dependent only on previous steps
3. With clear success criteria

Available tools:
{tools}

Output ONLY valid JSON in this exact format:
{
  "goal": "The user's goal",
  "strategy": "step_by_step",
  "steps": [
    {
      "id": "step_1",
      "description": "What to do in this step",
      "action_type": "tool_call|reasoning|clarification",
      "tool_name": "tool_name or null",
      "arguments": {},
      "dependencies": ["previous_step_id"],
      "expected_outcome": "What we expect to achieve",
      "success_criteria": ["specific criteria"],
      "time_estimate_minutes": 1
    }
  ],
  "requires_clarification": false,
  "clarification_questions": []
}

User's goal: {goal}

Current context:
{context}
"#;

/// Planning prompt for creative, open-ended tasks.
const EXPLORATORY_PROMPT: &str = r#"You are an expert creative planner specializing in exploratory tasks.

Given a user's goal, create a flexible, adaptive plan that allows for exploration and iteration. Focus on learning, experimentation, and refinement.

Available tools:
{tools}

Output ONLY valid JSON in this exact format:
{
  "goal": "The user's goal",
  "strategy": "exploratory",
  "steps": [
    {
      "id": "explore_1",
      "description": "Explore initial approach",
      "action_type": "tool_call|reasoning",
      "tool_name": "tool_name or null",
      "arguments": {},
      "expected_outcome": "Initial findings"
    }
  ],
  "requires_clarification": false,
  "clarification_questions": []
}

User's goal: {goal}

Current context:
{context}
"#;

/// Planning prompt for problem-solving tasks.
const DEBUGGING_PROMPT: &str = r#"You are an expert debugging planner specializing in problem-solving.

Given a user's goal, create a systematic debugging plan that isolates issues, tests hypotheses, and implements fixes methodically.

Available tools:
{tools}

Output ONLY valid JSON in this exact format:
{
  "goal": "The user's goal",
  "strategy": "debugging",
  "steps": [
    {
      "id": "diagnose_1",
      "description": "Isolate the issue",
      "action_type": "tool_call|reasoning",
      "tool_name": "tool_name or null",
      "arguments": {},
      "expected_outcome": "Confirmation or refutation"
    }
  ],
  "requires_clarification": false,
  "clarification_questions": []
}

User's goal: {goal}

Current context:
{context}
"#;

/// Planning prompt used when no strategy-specific template applies.
const DEFAULT_PROMPT: &str = r#"You are an expert task planner. Given a user's goal, create a detailed execution plan.

Analyze the task and choose the most appropriate approach. Consider complexity, resources needed, and potential risks.

Available tools:
{tools}

Output ONLY valid JSON in this exact format:
{
  "goal": "The user's goal",
  "strategy": "step_by_step|exploratory|debugging|research|optimization",
  "steps": [
    {
      "id": "unique_step_id",
      "description": "What to do in this step",
      "action_type": "tool_call|reasoning|clarification",
      "tool_name": "tool_name or null",
      "arguments": {},
      "dependencies": [],
      "expected_outcome": "What we expect to achieve",
      "success_criteria": ["criterion1"],
      "failure_handling": "retry|replan|ask_for_help"
    }
  ],
  "requires_clarification": false,
  "clarification_questions": []
}

User's goal: {goal}

Current context:
{context}
"#;

/// A plan plus the cost of producing it.
#[derive(Debug, Clone)]
pub struct PlanningOutcome {
    /// The produced plan.
    pub plan: Plan,
    /// Token usage of the planning call.
    pub usage: Usage,
    /// Cost in USD derived from usage.
    pub cost: f64,
}

/// Creates and adapts execution plans using the language model.
pub struct Planner {
    model: Arc<dyn ChatModel>,
    tools: Vec<ToolMetadata>,
    tool_index: HashMap<String, usize>,
    default_strategy: PlanStrategy,
    pricing: Pricing,
    temperature: f32,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("model", &self.model.model_id())
            .field("tools", &self.tools.len())
            .field("default_strategy", &self.default_strategy)
            .finish_non_exhaustive()
    }
}

impl Planner {
    /// Create a planner over the given model and tool metadata.
    #[must_use]
    pub fn new(model: Arc<dyn ChatModel>, tools: Vec<ToolMetadata>) -> Self {
        let tool_index = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        Self {
            model,
            tools,
            tool_index,
            default_strategy: PlanStrategy::StepByStep,
            pricing: Pricing::default(),
            temperature: 0.25,
        }
    }

    /// Set the strategy used when the goal matches no keyword family.
    #[must_use]
    pub const fn with_default_strategy(mut self, strategy: PlanStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Set the pricing table used to derive planning cost.
    #[must_use]
    pub const fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    /// Set the planning temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Pick a strategy for a goal from keyword families.
    ///
    /// A caller-supplied override always wins. Goals under 100 characters
    /// that match no family use `step_by_step`.
    #[must_use]
    pub fn select_strategy(&self, goal: &str, supplied: Option<PlanStrategy>) -> PlanStrategy {
        if let Some(strategy) = supplied {
            return strategy;
        }
        let goal_lower = goal.to_lowercase();

        const DEBUG_WORDS: &[&str] = &["debug", "fix", "error", "issue", "problem"];
        const RESEARCH_WORDS: &[&str] = &["explore", "research", "find", "investigate", "analyze"];
        const OPTIMIZE_WORDS: &[&str] = &["optimize", "improve", "speed up", "efficient"];
        const CREATIVE_WORDS: &[&str] = &["creative", "design", "brainstorm", "ideas"];

        if DEBUG_WORDS.iter().any(|w| goal_lower.contains(w)) {
            return PlanStrategy::Debugging;
        }
        if RESEARCH_WORDS.iter().any(|w| goal_lower.contains(w)) {
            return PlanStrategy::Research;
        }
        if OPTIMIZE_WORDS.iter().any(|w| goal_lower.contains(w)) {
            return PlanStrategy::Optimization;
        }
        if CREATIVE_WORDS.iter().any(|w| goal_lower.contains(w)) {
            return PlanStrategy::Exploratory;
        }
        if goal.len() < 100 {
            return PlanStrategy::StepByStep;
        }
        self.default_strategy
    }

    /// Create an execution plan for a goal.
    ///
    /// Never fails outright: LLM transport errors and unparseable output
    /// both produce the three-step fallback plan.
    pub async fn create_plan(
        &self,
        goal: &str,
        context: &TaskContext,
        previous_attempts: &[String],
        strategy: Option<PlanStrategy>,
    ) -> PlanningOutcome {
        let strategy = self.select_strategy(goal, strategy);
        info!(strategy = strategy.as_str(), "creating plan");

        let prompt = self.build_prompt(goal, context, previous_attempts, strategy);
        let request = CompletionRequest::new(
            vec![
                Message::system("You are an expert task planner with strong analytical skills."),
                Message::user(prompt),
            ],
            self.temperature,
        )
        .max_tokens(4096)
        .json_object();

        let response = match self.model.complete(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "planning call failed, using fallback plan");
                return PlanningOutcome {
                    plan: self.fallback_plan(goal, &e.to_string()),
                    usage: Usage::zero(),
                    cost: 0.0,
                };
            }
        };

        let usage = response.usage;
        let cost = self.pricing.cost(usage);

        let plan = match parse::parse_object(&response.content) {
            Ok(data) => self.build_plan(goal, strategy, &data),
            Err(e) => {
                warn!(error = %e, "plan output unparseable, using fallback plan");
                self.fallback_plan(goal, &e.to_string())
            }
        };

        info!(
            steps = plan.steps.len(),
            strategy = plan.strategy.as_str(),
            cost,
            "plan created"
        );
        PlanningOutcome { plan, usage, cost }
    }

    fn build_prompt(
        &self,
        goal: &str,
        context: &TaskContext,
        previous_attempts: &[String],
        strategy: PlanStrategy,
    ) -> String {
        let template = match strategy {
            PlanStrategy::StepByStep | PlanStrategy::BiteSized => STEP_BY_STEP_PROMPT,
            PlanStrategy::Exploratory => EXPLORATORY_PROMPT,
            PlanStrategy::Debugging => DEBUGGING_PROMPT,
            PlanStrategy::Research | PlanStrategy::Optimization | PlanStrategy::Fallback => {
                DEFAULT_PROMPT
            }
        };

        template
            .replace("{tools}", &self.format_tools())
            .replace("{goal}", goal)
            .replace("{context}", &format_context(context, previous_attempts))
    }

    fn format_tools(&self) -> String {
        if self.tools.is_empty() {
            return "- (no tools registered)".to_owned();
        }
        let mut lines = Vec::new();
        for tool in &self.tools {
            lines.push(format!("- {}: {}", tool.name, tool.description));
            for (name, spec) in &tool.parameters.properties {
                lines.push(format!("    {name}: {}", spec.description));
            }
        }
        lines.join("\n")
    }

    /// Turn parsed plan JSON into a validated [`Plan`].
    fn build_plan(&self, goal: &str, strategy: PlanStrategy, data: &Value) -> Plan {
        if data
            .get("requires_clarification")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let questions = string_list(data.get("clarification_questions"));
            info!(?questions, "plan requires clarification");
            let mut plan = Plan::new(
                goal,
                vec![PlanStep::clarification("clarification", questions)],
                strategy,
            );
            plan.status = PlanStatus::Planning;
            return plan;
        }

        let mut warnings = Vec::new();
        let mut steps = Vec::new();

        for (index, raw) in data
            .get("steps")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
        {
            match self.build_step(index, raw, &mut warnings) {
                Some(step) => steps.push(step),
                None => warnings.push(format!("Step {index}: dropped (no usable description)")),
            }
        }

        if steps.is_empty() {
            warn!("plan contained no usable steps, using fallback plan");
            return self.fallback_plan(goal, "plan contained no usable steps");
        }

        let strategy = data
            .get("strategy")
            .and_then(Value::as_str)
            .and_then(PlanStrategy::parse)
            .unwrap_or(strategy);

        let mut plan = Plan::new(
            data.get("goal").and_then(Value::as_str).unwrap_or(goal),
            steps,
            strategy,
        );
        if !warnings.is_empty() {
            debug!(?warnings, "plan validation findings");
            plan.metadata
                .insert("validation_warnings".to_owned(), Value::from(warnings));
        }
        plan
    }

    fn build_step(&self, index: usize, raw: &Value, warnings: &mut Vec<String>) -> Option<PlanStep> {
        let description = raw
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())?
            .to_owned();

        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("step_{}", index + 1));

        let action_type = match raw.get("action_type").and_then(Value::as_str) {
            Some("tool_call") => ActionType::ToolCall,
            Some("clarification") => ActionType::Clarification,
            Some("reasoning") | None => ActionType::Reasoning,
            Some(other) => {
                warnings.push(format!("Step '{id}': unknown action_type '{other}'"));
                ActionType::Reasoning
            }
        };

        let mut step = PlanStep {
            id,
            description,
            action_type,
            tool_name: raw
                .get("tool_name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty() && *n != "null")
                .map(str::to_owned),
            arguments: raw.get("arguments").cloned().unwrap_or_else(|| Value::Object(Default::default())),
            expected_outcome: raw
                .get("expected_outcome")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            dependencies: string_list(raw.get("dependencies")),
            metadata: StepMetadata {
                success_criteria: string_list(raw.get("success_criteria")),
                failure_handling: raw
                    .get("failure_handling")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default(),
                time_estimate_minutes: raw.get("time_estimate_minutes").and_then(Value::as_f64),
                questions: Vec::new(),
                extra: Default::default(),
            },
            status: crate::plan::StepStatus::Pending,
            result: None,
        };

        if step.action_type == ActionType::ToolCall {
            match step.tool_name.as_deref() {
                None => {
                    warnings.push(format!(
                        "Step '{}': tool call without tool name, downgraded to reasoning",
                        step.id
                    ));
                    step.action_type = ActionType::Reasoning;
                }
                Some(tool_name) if !self.tool_index.contains_key(tool_name) => {
                    warnings.push(format!(
                        "Step '{}': unknown tool '{tool_name}', downgraded to reasoning",
                        step.id
                    ));
                    step.description = format!("Reason about: {}", step.description);
                    step.action_type = ActionType::Reasoning;
                    step.tool_name = None;
                    step.arguments = Value::Object(Default::default());
                }
                Some(tool_name) => {
                    self.check_tool_arguments(tool_name, &step, warnings);
                }
            }
        }

        Some(step)
    }

    fn check_tool_arguments(&self, tool_name: &str, step: &PlanStep, warnings: &mut Vec<String>) {
        let Some(&index) = self.tool_index.get(tool_name) else {
            return;
        };
        let schema = &self.tools[index].parameters;
        let args = step.arguments.as_object();

        for required in &schema.required {
            if args.is_none_or(|a| !a.contains_key(required)) {
                warnings.push(format!(
                    "Tool '{tool_name}': missing required parameter '{required}'"
                ));
            }
        }
        if let Some(args) = args {
            for name in args.keys() {
                if !schema.properties.contains_key(name) {
                    warnings.push(format!("Tool '{tool_name}': unknown parameter '{name}'"));
                }
            }
        }
    }

    /// Generic three-step plan used when planning itself fails.
    #[must_use]
    pub fn fallback_plan(&self, goal: &str, reason: &str) -> Plan {
        warn!(reason, "creating fallback plan");
        let steps = vec![
            PlanStep::reasoning(
                "fallback_1",
                format!("Analyze and understand the task: {goal}"),
            )
            .with_expected_outcome("Clear understanding of requirements"),
            PlanStep::reasoning("fallback_2", "Execute the main task with available tools")
                .with_expected_outcome("Task completion attempt"),
            PlanStep::reasoning("fallback_3", "Review and validate results")
                .with_expected_outcome("Verified completion or identified issues"),
        ];
        let mut plan = Plan::new(goal, steps, PlanStrategy::Fallback);
        plan.metadata
            .insert("fallback_reason".to_owned(), Value::String(reason.to_owned()));
        plan
    }
}

fn format_context(context: &TaskContext, previous_attempts: &[String]) -> String {
    let mut parts = vec![
        format!("Workspace: {}", context.workspace_path.display()),
        format!(
            "Limits: max_iterations={}, max_cost=${:.2}, max_tool_calls={}",
            context.limits.max_iterations, context.limits.max_cost, context.limits.max_tool_calls
        ),
    ];
    if !previous_attempts.is_empty() {
        parts.push("Previous attempts:".to_owned());
        for (i, attempt) in previous_attempts.iter().rev().take(3).enumerate() {
            parts.push(format!("  Attempt {}: {attempt}", i + 1));
        }
    }
    parts.join("\n")
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect()
}
