//! Reflection: deciding whether and how to change the plan mid-run.

use serde_json::Value;
use tracing::{info, warn};

use crate::llm::{CompletionRequest, Message, Usage};
use crate::plan::{Plan, PlanStatus, PlanStep, PlanStrategy};
use crate::planner::{Planner, parse};

/// Markers that flag an observation as a failure.
const FAILURE_MARKERS: &[&str] = &["failed", "error"];

/// Execution statistics handed to the replanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionStats {
    /// Completed loop iterations.
    pub iterations: u64,
    /// Accumulated cost in USD.
    pub total_cost: f64,
    /// Tool invocations so far.
    pub total_tool_calls: u64,
    /// Current failure streak.
    pub consecutive_errors: u32,
}

/// The replanner's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplanDecision {
    /// Keep the current plan.
    Continue,
    /// The remaining steps were replaced.
    Adjust,
    /// The goal is already achieved.
    Complete,
    /// The goal cannot be achieved.
    Fail,
    /// Clarification is required to proceed.
    AskForHelp,
}

impl ReplanDecision {
    fn parse(tag: &str) -> Self {
        match tag {
            "adjust" => Self::Adjust,
            "complete" => Self::Complete,
            "fail" => Self::Fail,
            "ask_for_help" => Self::AskForHelp,
            _ => Self::Continue,
        }
    }
}

/// Outcome of one replanning pass.
#[derive(Debug, Clone)]
pub struct ReplanOutcome {
    /// What the replanner decided.
    pub decision: ReplanDecision,
    /// Model confidence in `[0, 1]`.
    pub confidence: f64,
    /// Learnings worth keeping.
    pub learnings: Vec<String>,
    /// Token usage of the replanning call.
    pub usage: Usage,
    /// Cost of the replanning call in USD.
    pub cost: f64,
}

impl ReplanOutcome {
    fn conservative(usage: Usage, cost: f64) -> Self {
        Self {
            decision: ReplanDecision::Continue,
            confidence: 0.0,
            learnings: Vec::new(),
            usage,
            cost,
        }
    }
}

/// Whether the engine should run a reflection pass now.
///
/// Triggers: the failure streak reached its threshold, at least two of the
/// last three observations carry failure markers, many iterations with
/// little plan progress, or any budget limit at 80% or beyond.
#[must_use]
pub fn replan_needed(
    consecutive_errors: u32,
    max_consecutive_errors: u32,
    observations: &[String],
    iterations: u64,
    current_step: usize,
    budget_pressure: f64,
) -> bool {
    if max_consecutive_errors > 0 && consecutive_errors >= max_consecutive_errors {
        return true;
    }

    if observations.len() >= 5 {
        let recent_failures = observations
            .iter()
            .rev()
            .take(3)
            .filter(|obs| {
                let lowered = obs.to_lowercase();
                FAILURE_MARKERS.iter().any(|m| lowered.contains(m))
            })
            .count();
        if recent_failures >= 2 {
            return true;
        }
    }

    if iterations > 10 && current_step < 3 {
        return true;
    }

    budget_pressure >= 0.8
}

const REPLAN_PROMPT: &str = r#"You are reviewing and updating an execution plan based on new observations.

Current situation:
- Original goal: {goal}
- Progress: {completed_steps}/{total_steps} steps completed
- Current step: {current_step}

Observations from execution:
{observations}

Status analysis:
{status_analysis}

Plan review criteria:
1. Are we making progress toward the goal?
2. Do new observations suggest a different approach?
3. Are there new opportunities or risks?
4. Should we adjust, continue, or abandon?

Output ONLY valid JSON:
{
  "decision": "continue|adjust|complete|fail|ask_for_help",
  "reason": "Explanation of the decision",
  "confidence": 0.5,
  "learnings": ["key learning"],
  "updated_plan": {
    "steps": [],
    "strategy_change": null
  },
  "recommendations": []
}
"#;

impl Planner {
    /// Review the plan against recent observations and apply the decision.
    ///
    /// `adjust` replaces the steps at and after the cursor; `complete` and
    /// `fail` flip the plan status; `ask_for_help` inserts a clarification
    /// step after the current one. On any model or parse failure the
    /// decision defaults to `continue`.
    pub async fn replan(
        &self,
        plan: &mut Plan,
        observations: &[String],
        stats: &ExecutionStats,
    ) -> ReplanOutcome {
        info!(observations = observations.len(), "replanning");

        let prompt = build_replan_prompt(plan, observations, stats);
        let request = CompletionRequest::new(
            vec![
                Message::system("You are an expert at adapting plans based on execution feedback."),
                Message::user(prompt),
            ],
            self.temperature,
        )
        .max_tokens(2048)
        .json_object();

        let response = match self.model.complete(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "replanning call failed, continuing with current plan");
                return ReplanOutcome::conservative(Usage::zero(), 0.0);
            }
        };

        let usage = response.usage;
        let cost = self.pricing.cost(usage);

        let data = match parse::parse_object(&response.content) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "replan output unparseable, continuing with current plan");
                return ReplanOutcome::conservative(usage, cost);
            }
        };

        let decision = ReplanDecision::parse(data.get("decision").and_then(Value::as_str).unwrap_or("continue"));
        let confidence = data
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let reason = data
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let learnings: Vec<String> = data
            .get("learnings")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();

        info!(?decision, confidence, "replanning decision");

        match decision {
            ReplanDecision::Continue => plan.record_learnings(&learnings),
            ReplanDecision::Complete => {
                plan.status = PlanStatus::Completed;
                plan.metadata
                    .insert("completion_reason".to_owned(), Value::String(reason));
            }
            ReplanDecision::Fail => {
                plan.status = PlanStatus::Failed;
                plan.metadata
                    .insert("failure_reason".to_owned(), Value::String(reason));
            }
            ReplanDecision::AskForHelp => {
                let questions: Vec<String> = data
                    .get("recommendations")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect();
                let step = PlanStep::clarification(
                    format!("clarify_{}", plan.current_step),
                    questions,
                );
                let insert_at = (plan.current_step + 1).min(plan.steps.len());
                plan.steps.insert(insert_at, step);
            }
            ReplanDecision::Adjust => {
                self.apply_adjustment(plan, &data, &reason, confidence, &learnings);
            }
        }

        ReplanOutcome {
            decision,
            confidence,
            learnings,
            usage,
            cost,
        }
    }

    fn apply_adjustment(
        &self,
        plan: &mut Plan,
        data: &Value,
        reason: &str,
        confidence: f64,
        learnings: &[String],
    ) {
        let updated = data.get("updated_plan").cloned().unwrap_or(Value::Null);
        let replacement = self.steps_from_value(updated.get("steps"));

        if replacement.is_empty() {
            // Nothing usable came back; treat as continue.
            plan.record_learnings(learnings);
            return;
        }

        plan.replace_tail(replacement);

        if let Some(strategy) = updated
            .get("strategy_change")
            .and_then(Value::as_str)
            .and_then(PlanStrategy::parse)
        {
            plan.strategy = strategy;
        }

        let adjustments = plan
            .metadata
            .entry("adjustments".to_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = adjustments {
            items.push(serde_json::json!({
                "step": plan.current_step,
                "reason": reason,
                "confidence": confidence,
                "learnings": learnings,
            }));
        }
    }

    /// Build steps from a replan `updated_plan.steps` array.
    fn steps_from_value(&self, steps: Option<&Value>) -> Vec<PlanStep> {
        let mut warnings = Vec::new();
        let built: Vec<PlanStep> = steps
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .enumerate()
            .filter_map(|(i, raw)| self.build_step(i, raw, &mut warnings))
            .collect();
        if !warnings.is_empty() {
            warn!(?warnings, "replan step validation findings");
        }
        built
    }
}

fn build_replan_prompt(plan: &Plan, observations: &[String], stats: &ExecutionStats) -> String {
    let current_step = plan
        .current()
        .map_or_else(|| "None".to_owned(), |s| s.description.clone());

    let recent: Vec<String> = observations
        .iter()
        .rev()
        .take(10)
        .rev()
        .map(|obs| format!("- {obs}"))
        .collect();

    REPLAN_PROMPT
        .replace("{goal}", &plan.goal)
        .replace("{completed_steps}", &plan.current_step.to_string())
        .replace("{total_steps}", &plan.steps.len().to_string())
        .replace("{current_step}", &current_step)
        .replace("{observations}", &recent.join("\n"))
        .replace("{status_analysis}", &analyze_status(plan, observations, stats))
}

fn analyze_status(plan: &Plan, observations: &[String], stats: &ExecutionStats) -> String {
    let mut analysis = Vec::new();

    let progress = if plan.steps.is_empty() {
        0.0
    } else {
        plan.current_step as f64 / plan.steps.len() as f64 * 100.0
    };
    analysis.push(format!(
        "Progress: {progress:.1}% ({}/{} steps)",
        plan.current_step,
        plan.steps.len()
    ));

    if !observations.is_empty() {
        let successes = observations
            .iter()
            .filter(|obs| {
                let lowered = obs.to_lowercase();
                lowered.contains("succeeded") || lowered.contains("success")
            })
            .count();
        let errors = observations
            .iter()
            .filter(|obs| {
                let lowered = obs.to_lowercase();
                FAILURE_MARKERS.iter().any(|m| lowered.contains(m))
            })
            .count();
        analysis.push(format!("Observations: {successes} successful, {errors} errors"));
        if errors > successes {
            analysis.push("Warning: more errors than successes".to_owned());
        }
    }

    if stats.total_cost > 0.0 {
        analysis.push(format!("Cost: ${:.4}", stats.total_cost));
    }
    if stats.total_tool_calls > 0 {
        analysis.push(format!("Tool calls: {}", stats.total_tool_calls));
    }
    if stats.consecutive_errors > 0 {
        analysis.push(format!("Consecutive errors: {}", stats.consecutive_errors));
    }

    analysis
        .into_iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
