//! Per-run configuration: resource limits and engine tuning knobs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Resource limits enforced on a single agent run.
///
/// Every numeric limit follows one convention: a value `<= 0` means
/// "unlimited". The [`BudgetEnforcer`](crate::budget::BudgetEnforcer) treats
/// such limits as never tripping and reports their usage percentage as zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum loop iterations (steps executed).
    pub max_iterations: i64,
    /// Maximum accumulated LLM cost in USD.
    pub max_cost: f64,
    /// Maximum number of tool invocations.
    pub max_tool_calls: i64,
    /// Maximum wall-clock time for the run, in seconds.
    pub max_time_seconds: i64,
    /// Maximum number of entries held by the execution cache.
    pub max_cache_size: i64,
    /// Time-to-live for cached tool results, in seconds.
    pub tool_cache_ttl_seconds: i64,
}

impl Limits {
    /// Default maximum iterations.
    pub const DEFAULT_MAX_ITERATIONS: i64 = 50;
    /// Default maximum cost in USD.
    pub const DEFAULT_MAX_COST: f64 = 5.0;
    /// Default maximum tool calls.
    pub const DEFAULT_MAX_TOOL_CALLS: i64 = 100;
    /// Default wall-clock budget in seconds.
    pub const DEFAULT_MAX_TIME_SECONDS: i64 = 1800;
    /// Default cache capacity.
    pub const DEFAULT_MAX_CACHE_SIZE: i64 = 100;
    /// Default cache TTL in seconds.
    pub const DEFAULT_TOOL_CACHE_TTL_SECONDS: i64 = 300;

    /// Create limits with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            max_cost: Self::DEFAULT_MAX_COST,
            max_tool_calls: Self::DEFAULT_MAX_TOOL_CALLS,
            max_time_seconds: Self::DEFAULT_MAX_TIME_SECONDS,
            max_cache_size: Self::DEFAULT_MAX_CACHE_SIZE,
            tool_cache_ttl_seconds: Self::DEFAULT_TOOL_CACHE_TTL_SECONDS,
        }
    }

    /// Create limits where nothing is enforced.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_iterations: 0,
            max_cost: 0.0,
            max_tool_calls: 0,
            max_time_seconds: 0,
            max_cache_size: Self::DEFAULT_MAX_CACHE_SIZE,
            tool_cache_ttl_seconds: Self::DEFAULT_TOOL_CACHE_TTL_SECONDS,
        }
    }

    /// Set the iteration limit.
    #[must_use]
    pub const fn with_max_iterations(mut self, max: i64) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the cost limit in USD.
    #[must_use]
    pub const fn with_max_cost(mut self, max: f64) -> Self {
        self.max_cost = max;
        self
    }

    /// Set the tool call limit.
    #[must_use]
    pub const fn with_max_tool_calls(mut self, max: i64) -> Self {
        self.max_tool_calls = max;
        self
    }

    /// Set the wall-clock limit in seconds.
    #[must_use]
    pub const fn with_max_time_seconds(mut self, max: i64) -> Self {
        self.max_time_seconds = max;
        self
    }

    /// Set the cache capacity.
    #[must_use]
    pub const fn with_max_cache_size(mut self, max: i64) -> Self {
        self.max_cache_size = max;
        self
    }

    /// Set the cache TTL in seconds.
    #[must_use]
    pub const fn with_tool_cache_ttl_seconds(mut self, ttl: i64) -> Self {
        self.tool_cache_ttl_seconds = ttl;
        self
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Sampling temperature for reasoning steps.
    pub reasoning_temperature: f32,
    /// Sampling temperature for planning and replanning calls.
    pub planning_temperature: f32,
    /// Consecutive step failures before a replan is forced.
    pub max_consecutive_errors: u32,
    /// How many observations the working set retains.
    pub observation_history_size: usize,
    /// Write a checkpoint every N iterations.
    pub checkpoint_interval: u64,
    /// Whether reasoning (LLM) results may be served from the cache.
    pub enable_reasoning_cache: bool,
    /// Export metrics files (JSON + CSV) when a run finalizes.
    pub export_metrics: bool,
}

impl AgentConfig {
    /// Create a config with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reasoning_temperature: 0.7,
            planning_temperature: 0.25,
            max_consecutive_errors: 3,
            observation_history_size: 10,
            checkpoint_interval: 5,
            enable_reasoning_cache: true,
            export_metrics: false,
        }
    }

    /// Set the replan error streak threshold.
    #[must_use]
    pub const fn with_max_consecutive_errors(mut self, n: u32) -> Self {
        self.max_consecutive_errors = n;
        self
    }

    /// Set the observation window size.
    #[must_use]
    pub const fn with_observation_history_size(mut self, n: usize) -> Self {
        self.observation_history_size = n;
        self
    }

    /// Enable or disable metrics export at run completion.
    #[must_use]
    pub const fn with_export_metrics(mut self, enabled: bool) -> Self {
        self.export_metrics = enabled;
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run execution context: identity, workspace, and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    /// Stable identifier for the run.
    pub task_id: String,
    /// Root directory all path-typed tool arguments resolve against.
    pub workspace_path: PathBuf,
    /// Enforced resource limits.
    pub limits: Limits,
}

impl TaskContext {
    /// Create a context for a workspace with default limits.
    #[must_use]
    pub fn new(task_id: impl Into<String>, workspace_path: impl AsRef<Path>) -> Self {
        Self {
            task_id: task_id.into(),
            workspace_path: workspace_path.as_ref().to_path_buf(),
            limits: Limits::default(),
        }
    }

    /// Replace the limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_defaults() {
        let limits = Limits::default();
        assert_eq!(limits.max_iterations, 50);
        assert!((limits.max_cost - 5.0).abs() < f64::EPSILON);
        assert_eq!(limits.max_tool_calls, 100);
    }

    #[test]
    fn limits_builder() {
        let limits = Limits::default().with_max_cost(0.5).with_max_iterations(3);
        assert_eq!(limits.max_iterations, 3);
        assert!((limits.max_cost - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn unlimited_is_non_positive() {
        let limits = Limits::unlimited();
        assert!(limits.max_iterations <= 0);
        assert!(limits.max_cost <= 0.0);
        assert!(limits.max_time_seconds <= 0);
    }
}
