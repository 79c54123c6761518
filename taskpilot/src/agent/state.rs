//! Agent phase and run state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plan::Plan;

/// Phase of the agent state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    /// Run accepted, nothing started yet.
    Initializing,
    /// Producing the initial plan.
    Planning,
    /// Executing plan steps.
    Executing,
    /// Processing the latest result.
    Observing,
    /// Reviewing the plan against observations.
    Replanning,
    /// Finished successfully.
    Completed,
    /// Terminated by an engine failure.
    Failed,
    /// Halted by a limit or a pause request.
    Stopped,
}

impl AgentPhase {
    /// Whether the phase is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Observing => "observing",
            Self::Replanning => "replanning",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state of one agent run.
///
/// Owned exclusively by the engine; every mutation happens on the engine's
/// single-threaded control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Unique agent id.
    pub agent_id: String,
    /// The goal being pursued.
    pub task: String,
    /// Current phase.
    pub phase: AgentPhase,
    /// Completed loop iterations.
    pub iteration: u64,
    /// Accumulated LLM cost in USD.
    pub total_cost: f64,
    /// Tool invocations so far.
    pub total_tool_calls: u64,
    /// Current failure streak.
    pub consecutive_errors: u32,
    /// Recent observations, bounded by the history size.
    pub observations: Vec<String>,
    /// Errors recorded during the run.
    pub errors: Vec<String>,
    /// The active plan, if any.
    pub plan: Option<Plan>,
    /// Free-form state annotations.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentState {
    /// Create fresh state for an agent id.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task: String::new(),
            phase: AgentPhase::Initializing,
            iteration: 0,
            total_cost: 0.0,
            total_tool_calls: 0,
            consecutive_errors: 0,
            observations: Vec::new(),
            errors: Vec::new(),
            plan: None,
            metadata: Map::new(),
        }
    }

    /// Append an observation, trimming the window to `history_size`.
    pub fn add_observation(&mut self, observation: impl Into<String>, history_size: usize) {
        self.observations.push(observation.into());
        if history_size > 0 && self.observations.len() > history_size {
            let drop = self.observations.len() - history_size;
            self.observations.drain(..drop);
        }
    }

    /// Record an error message.
    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// The last `count` observations, oldest first.
    #[must_use]
    pub fn recent_observations(&self, count: usize) -> Vec<String> {
        let start = self.observations.len().saturating_sub(count);
        self.observations[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_window_is_bounded() {
        let mut state = AgentState::new("a1");
        for i in 0..25 {
            state.add_observation(format!("obs {i}"), 10);
        }
        assert_eq!(state.observations.len(), 10);
        assert_eq!(state.observations[0], "obs 15");
        assert_eq!(state.observations[9], "obs 24");
    }

    #[test]
    fn terminal_phases() {
        assert!(AgentPhase::Completed.is_terminal());
        assert!(AgentPhase::Failed.is_terminal());
        assert!(AgentPhase::Stopped.is_terminal());
        assert!(!AgentPhase::Executing.is_terminal());
    }
}
