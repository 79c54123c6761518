//! Checkpoint persistence.
//!
//! A checkpoint captures enough state to continue a run: phase, plan,
//! recent observations, budget usage, and metrics. Checkpoints are written
//! every few iterations under the agent's workspace; write failures are
//! logged by the engine and never abort a run.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::state::{AgentPhase, AgentState};
use crate::budget::BudgetSnapshot;
use crate::error::Result;
use crate::metrics::MetricsSummary;
use crate::plan::Plan;
use crate::util::now_unix_seconds;

/// Directory under the workspace where checkpoints land.
const CHECKPOINT_DIR: &str = "checkpoints";

/// A point-in-time snapshot of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Write time, unix seconds.
    pub timestamp: f64,
    /// Id of the checkpointed agent.
    pub agent_id: String,
    /// Phase at checkpoint time.
    pub phase: AgentPhase,
    /// Iteration counter at checkpoint time.
    pub iteration: u64,
    /// The active plan.
    pub plan: Option<Plan>,
    /// Recent observations (bounded by the history size).
    pub recent_observations: Vec<String>,
    /// Budget usage at checkpoint time.
    pub budget_snapshot: BudgetSnapshot,
    /// Metrics summary at checkpoint time.
    pub metrics: MetricsSummary,
}

impl Checkpoint {
    /// Capture a checkpoint from run state.
    #[must_use]
    pub fn capture(
        state: &AgentState,
        budget_snapshot: BudgetSnapshot,
        metrics: MetricsSummary,
        history_size: usize,
    ) -> Self {
        Self {
            timestamp: now_unix_seconds(),
            agent_id: state.agent_id.clone(),
            phase: state.phase,
            iteration: state.iteration,
            plan: state.plan.clone(),
            recent_observations: state.recent_observations(history_size),
            budget_snapshot,
            metrics,
        }
    }

    /// Write the checkpoint as pretty JSON under the workspace.
    ///
    /// Returns the written path.
    pub async fn save(&self, workspace: &Path) -> Result<PathBuf> {
        let dir = workspace.join(CHECKPOINT_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!(
            "checkpoint_{}_{:06}.json",
            self.agent_id, self.iteration
        ));
        let payload = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, payload).await?;
        Ok(path)
    }

    /// Load a checkpoint from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Rebuild continuable run state from this checkpoint.
    ///
    /// Counters derive from the stored budget snapshot; wall time restarts
    /// with the new engine.
    #[must_use]
    pub fn restore_state(&self) -> AgentState {
        let mut state = AgentState::new(self.agent_id.clone());
        state.phase = self.phase;
        state.iteration = self.iteration;
        state.total_cost = self.budget_snapshot.cost.current;
        state.total_tool_calls = self.budget_snapshot.tool_calls.current.max(0.0) as u64;
        state.observations = self.recent_observations.clone();
        state.plan = self.plan.clone();
        if let Some(plan) = &state.plan {
            state.task = plan.goal.clone();
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetEnforcer, BudgetUsage};
    use crate::config::Limits;
    use crate::metrics::MetricsCollector;
    use crate::plan::{Plan, PlanStep, PlanStrategy};

    fn sample_state() -> AgentState {
        let mut state = AgentState::new("agent-7");
        state.task = "write the summary".to_owned();
        state.phase = AgentPhase::Executing;
        state.iteration = 6;
        state.total_cost = 0.42;
        state.total_tool_calls = 3;
        state.add_observation("Tool 'write_file' succeeded: done", 10);
        state.plan = Some(Plan::new(
            "write the summary",
            vec![PlanStep::reasoning("s1", "draft")],
            PlanStrategy::StepByStep,
        ));
        state
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = sample_state();
        let enforcer = BudgetEnforcer::new(Limits::default());
        let snapshot = enforcer.snapshot(&BudgetUsage {
            iterations: state.iteration,
            total_cost: state.total_cost,
            total_tool_calls: state.total_tool_calls,
        });
        let metrics = MetricsCollector::new("agent-7").summary();

        let checkpoint = Checkpoint::capture(&state, snapshot, metrics, 10);
        let path = checkpoint.save(dir.path()).await.expect("save");
        assert!(path.exists());

        let loaded = Checkpoint::load(&path).await.expect("load");
        assert_eq!(loaded.agent_id, "agent-7");
        assert_eq!(loaded.iteration, 6);

        let restored = loaded.restore_state();
        assert_eq!(restored.phase, AgentPhase::Executing);
        assert_eq!(restored.iteration, state.iteration);
        assert_eq!(restored.total_tool_calls, state.total_tool_calls);
        assert!((restored.total_cost - state.total_cost).abs() < 1e-9);
        assert_eq!(restored.observations, state.observations);
        assert_eq!(restored.plan, state.plan);
        assert_eq!(restored.task, "write the summary");
    }
}
