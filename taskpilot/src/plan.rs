//! Plans, steps, and execution results.
//!
//! A [`Plan`] is the unit of replanning: an ordered list of [`PlanStep`]s
//! with a cursor. Step status only moves forward
//! (pending → running → completed/failed/skipped), and a replan replaces
//! only the steps at or after the cursor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a step does when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Dispatch a registered tool.
    ToolCall,
    /// Ask the model to reason over recent context.
    Reasoning,
    /// Ask the user (or memory) for missing information.
    Clarification,
}

/// Lifecycle state of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Dropped without executing.
    Skipped,
}

impl StepStatus {
    /// Whether this status may transition to `next`.
    ///
    /// Status advances monotonically; terminal states never change.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Skipped)
        )
    }
}

/// Lifecycle state of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Being constructed.
    Planning,
    /// Steps are executing.
    Executing,
    /// All work finished.
    Completed,
    /// Abandoned as unachievable.
    Failed,
}

/// Family of planning prompt used to produce a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    /// Linear, deterministic tasks.
    StepByStep,
    /// Creative, open-ended tasks.
    Exploratory,
    /// Problem-solving tasks.
    Debugging,
    /// Information gathering.
    Research,
    /// Performance improvement.
    Optimization,
    /// One-step quick execution.
    BiteSized,
    /// Generic plan used when planning itself failed.
    Fallback,
}

impl PlanStrategy {
    /// The wire name of the strategy.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StepByStep => "step_by_step",
            Self::Exploratory => "exploratory",
            Self::Debugging => "debugging",
            Self::Research => "research",
            Self::Optimization => "optimization",
            Self::BiteSized => "bite_sized",
            Self::Fallback => "fallback",
        }
    }

    /// Parse a wire name, if recognized.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "step_by_step" => Some(Self::StepByStep),
            "exploratory" => Some(Self::Exploratory),
            "debugging" => Some(Self::Debugging),
            "research" => Some(Self::Research),
            "optimization" => Some(Self::Optimization),
            "bite_sized" => Some(Self::BiteSized),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

/// Policy applied when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Try the step again.
    Retry,
    /// Trigger a replan.
    #[default]
    Replan,
    /// Ask the user for help.
    AskForHelp,
}

/// Step metadata: success criteria, failure policy, estimates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetadata {
    /// Criteria that define success for the step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_criteria: Vec<String>,
    /// What to do when the step fails.
    #[serde(default)]
    pub failure_handling: FailurePolicy,
    /// Estimated time to complete, in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_estimate_minutes: Option<f64>,
    /// For clarification steps, the questions to ask.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<String>,
    /// Anything else the planner attached.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Outcome of executing one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the step succeeded.
    pub success: bool,
    /// Step output (tool output or reasoning text).
    #[serde(default)]
    pub output: String,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Name of the tool used, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_used: Option<String>,
    /// Cost accrued by this step in USD. A cached result costs 0.
    #[serde(default)]
    pub cost: f64,
    /// Whether the result was served from the execution cache.
    #[serde(default)]
    pub cached: bool,
    /// Whether the engine should replan before continuing.
    #[serde(default)]
    pub needs_replan: bool,
    /// Free-form result metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionResult {
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

    /// A cached copy of a previous value: `cost = 0`, `cached = true`.
    #[must_use]
    pub fn cached(output: impl Into<String>, tool_used: Option<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            tool_used,
            cost: 0.0,
            cached: true,
            ..Self::default()
        }
    }
}

/// A single executable unit of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable id within the plan.
    pub id: String,
    /// What this step does.
    pub description: String,
    /// How this step executes.
    pub action_type: ActionType,
    /// Required when `action_type` is `ToolCall`; must resolve in the
    /// registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
    /// What the planner expects this step to achieve.
    #[serde(default)]
    pub expected_outcome: String,
    /// Ids of steps this one depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Planner-attached metadata.
    #[serde(default)]
    pub metadata: StepMetadata,
    /// Lifecycle state.
    #[serde(default = "default_step_status")]
    pub status: StepStatus,
    /// Execution outcome once finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

const fn default_step_status() -> StepStatus {
    StepStatus::Pending
}

impl PlanStep {
    /// Create a reasoning step.
    #[must_use]
    pub fn reasoning(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            action_type: ActionType::Reasoning,
            tool_name: None,
            arguments: Value::Object(Map::new()),
            expected_outcome: String::new(),
            dependencies: Vec::new(),
            metadata: StepMetadata::default(),
            status: StepStatus::Pending,
            result: None,
        }
    }

    /// Create a tool call step.
    #[must_use]
    pub fn tool_call(
        id: impl Into<String>,
        description: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            action_type: ActionType::ToolCall,
            tool_name: Some(tool_name.into()),
            arguments,
            expected_outcome: String::new(),
            dependencies: Vec::new(),
            metadata: StepMetadata::default(),
            status: StepStatus::Pending,
            result: None,
        }
    }

    /// Create a clarification step asking the given questions.
    #[must_use]
    pub fn clarification(id: impl Into<String>, questions: Vec<String>) -> Self {
        Self {
            id: id.into(),
            description: "Get clarification from the user".to_owned(),
            action_type: ActionType::Clarification,
            tool_name: None,
            arguments: Value::Object(Map::new()),
            expected_outcome: "User provides needed information".to_owned(),
            dependencies: Vec::new(),
            metadata: StepMetadata {
                questions,
                ..StepMetadata::default()
            },
            status: StepStatus::Pending,
            result: None,
        }
    }

    /// Set the expected outcome.
    #[must_use]
    pub fn with_expected_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.expected_outcome = outcome.into();
        self
    }

    /// Move the step to a new status if the transition is legal.
    pub fn advance_status(&mut self, next: StepStatus) {
        if self.status.can_advance_to(next) {
            self.status = next;
        }
    }
}

/// An ordered sequence of steps with a cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// The goal this plan pursues.
    pub goal: String,
    /// Ordered steps.
    pub steps: Vec<PlanStep>,
    /// Index of the next step to execute; always in `[0, steps.len()]`.
    pub current_step: usize,
    /// Lifecycle state.
    pub status: PlanStatus,
    /// Prompt family that produced the plan.
    pub strategy: PlanStrategy,
    /// Plan-level metadata (learnings, adjustments, warnings).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Plan {
    /// Create a plan in the `Planning` state.
    #[must_use]
    pub fn new(goal: impl Into<String>, steps: Vec<PlanStep>, strategy: PlanStrategy) -> Self {
        Self {
            goal: goal.into(),
            steps,
            current_step: 0,
            status: PlanStatus::Planning,
            strategy,
            metadata: Map::new(),
        }
    }

    /// The step at the cursor, if any.
    #[must_use]
    pub fn current(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step)
    }

    /// Mutable access to the step at the cursor.
    pub fn current_mut(&mut self) -> Option<&mut PlanStep> {
        self.steps.get_mut(self.current_step)
    }

    /// Move the cursor to the next step, clamped to `steps.len()`.
    pub fn advance(&mut self) {
        if self.current_step < self.steps.len() {
            self.current_step += 1;
        }
    }

    /// Whether the plan has nothing left to run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_step >= self.steps.len() || self.status == PlanStatus::Completed
    }

    /// Replace every step from the cursor onward, preserving completed work.
    ///
    /// The cursor itself does not move; the new steps start executing at
    /// the current position.
    pub fn replace_tail(&mut self, replacement: Vec<PlanStep>) {
        self.steps.truncate(self.current_step);
        self.steps.extend(replacement);
    }

    /// Append a learning note to the plan metadata.
    pub fn record_learnings(&mut self, learnings: &[String]) {
        if learnings.is_empty() {
            return;
        }
        let entry = self
            .metadata
            .entry("learnings".to_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = entry {
            items.extend(learnings.iter().map(|l| Value::String(l.clone())));
        }
    }
}
