//! Resource budget enforcement.
//!
//! The enforcer is consulted before every step dispatch and again when
//! reflection triggers are evaluated. It never divides by a non-positive
//! maximum: a limit `<= 0` is unlimited, never trips, and reports 0%.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::Limits;

/// Warning threshold as a fraction of a limit.
const WARN_FRACTION: f64 = 0.9;

/// Counters the enforcer evaluates against [`Limits`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BudgetUsage {
    /// Completed loop iterations.
    pub iterations: u64,
    /// Accumulated LLM cost in USD.
    pub total_cost: f64,
    /// Tool invocations so far.
    pub total_tool_calls: u64,
}

/// Outcome of a budget check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetCheck {
    /// True when any enforced limit is met or exceeded.
    pub should_stop: bool,
    /// Which limit tripped, when `should_stop` is true.
    pub reason: Option<String>,
    /// Approaching-limit warnings (>= 90%), only when not stopping.
    pub warnings: Vec<String>,
}

/// Usage of a single limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitStatus {
    /// Current value.
    pub current: f64,
    /// Configured maximum (`<= 0` means unlimited).
    pub max: f64,
    /// Percentage used; 0 whenever `max <= 0`.
    pub percent: f64,
}

impl LimitStatus {
    fn new(current: f64, max: f64) -> Self {
        Self {
            current,
            max,
            percent: safe_percent(current, max),
        }
    }
}

/// Point-in-time usage of every limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    /// Iteration usage.
    pub iterations: LimitStatus,
    /// Cost usage.
    pub cost: LimitStatus,
    /// Tool call usage.
    pub tool_calls: LimitStatus,
    /// Wall-clock usage in seconds.
    pub time: LimitStatus,
}

/// Tracks iterations, cost, tool calls, and wall time against [`Limits`].
///
/// The wall clock is monotonic and captured when the enforcer is created,
/// which happens at engine start.
#[derive(Debug, Clone)]
pub struct BudgetEnforcer {
    limits: Limits,
    started_at: Instant,
}

impl BudgetEnforcer {
    /// Create an enforcer, capturing the monotonic start instant.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            started_at: Instant::now(),
        }
    }

    /// The limits being enforced.
    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Seconds elapsed since engine start.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Check every limit against the given counters.
    ///
    /// `should_stop` is set as soon as one enforced limit is met or
    /// exceeded; warnings are only produced when the run may continue.
    #[must_use]
    pub fn check(&self, usage: &BudgetUsage) -> BudgetCheck {
        let limits = &self.limits;
        let elapsed = self.elapsed_seconds();
        let mut check = BudgetCheck::default();

        let iterations = usage.iterations as f64;
        if limits.max_iterations > 0 && iterations >= limits.max_iterations as f64 {
            check.should_stop = true;
            check.reason = Some(format!(
                "Reached max iterations ({}/{})",
                usage.iterations, limits.max_iterations
            ));
        }

        if limits.max_cost > 0.0 && usage.total_cost >= limits.max_cost {
            check.should_stop = true;
            check.reason = Some(format!(
                "Reached max cost (${:.4}/${:.4})",
                usage.total_cost, limits.max_cost
            ));
        }

        let tool_calls = usage.total_tool_calls as f64;
        if limits.max_tool_calls > 0 && tool_calls >= limits.max_tool_calls as f64 {
            check.should_stop = true;
            check.reason = Some(format!(
                "Reached max tool calls ({}/{})",
                usage.total_tool_calls, limits.max_tool_calls
            ));
        }

        if limits.max_time_seconds > 0 && elapsed >= limits.max_time_seconds as f64 {
            check.should_stop = true;
            check.reason = Some(format!(
                "Reached time limit ({elapsed:.1}s/{}s)",
                limits.max_time_seconds
            ));
        }

        if !check.should_stop {
            if near_limit(iterations, limits.max_iterations as f64) {
                check.warnings.push(format!(
                    "Approaching iteration limit: {}/{}",
                    usage.iterations, limits.max_iterations
                ));
            }
            if limits.max_cost > 0.0 && usage.total_cost >= limits.max_cost * WARN_FRACTION {
                check.warnings.push(format!(
                    "Approaching cost limit: ${:.4}/${:.4}",
                    usage.total_cost, limits.max_cost
                ));
            }
            if near_limit(tool_calls, limits.max_tool_calls as f64) {
                check.warnings.push(format!(
                    "Approaching tool call limit: {}/{}",
                    usage.total_tool_calls, limits.max_tool_calls
                ));
            }
            if near_limit(elapsed, limits.max_time_seconds as f64) {
                check.warnings.push(format!(
                    "Approaching time limit: {elapsed:.1}s/{}s",
                    limits.max_time_seconds
                ));
            }
        }

        check
    }

    /// Fraction of the most-consumed enforced limit, in `[0, 1]`.
    ///
    /// Used by the reflection trigger that replans when any limit passes
    /// 80%.
    #[must_use]
    pub fn highest_pressure(&self, usage: &BudgetUsage) -> f64 {
        let snapshot = self.snapshot(usage);
        [
            snapshot.iterations.percent,
            snapshot.cost.percent,
            snapshot.tool_calls.percent,
            snapshot.time.percent,
        ]
        .into_iter()
        .fold(0.0_f64, f64::max)
            / 100.0
    }

    /// Current usage of every limit.
    #[must_use]
    pub fn snapshot(&self, usage: &BudgetUsage) -> BudgetSnapshot {
        let limits = &self.limits;
        BudgetSnapshot {
            iterations: LimitStatus::new(usage.iterations as f64, limits.max_iterations as f64),
            cost: LimitStatus::new(usage.total_cost, limits.max_cost),
            tool_calls: LimitStatus::new(
                usage.total_tool_calls as f64,
                limits.max_tool_calls as f64,
            ),
            time: LimitStatus::new(self.elapsed_seconds(), limits.max_time_seconds as f64),
        }
    }
}

fn near_limit(current: f64, max: f64) -> bool {
    max > 0.0 && current >= max * WARN_FRACTION
}

fn safe_percent(current: f64, max: f64) -> f64 {
    if max <= 0.0 {
        return 0.0;
    }
    current / max * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enforcer(limits: Limits) -> BudgetEnforcer {
        BudgetEnforcer::new(limits)
    }

    #[test]
    fn stops_at_iteration_limit() {
        let enforcer = enforcer(Limits::default().with_max_iterations(10));
        let check = enforcer.check(&BudgetUsage {
            iterations: 10,
            ..Default::default()
        });
        assert!(check.should_stop);
        assert!(check.reason.expect("reason").contains("iterations"));
    }

    #[test]
    fn does_not_stop_below_limit() {
        let enforcer = enforcer(Limits::default().with_max_iterations(10));
        let check = enforcer.check(&BudgetUsage {
            iterations: 8,
            ..Default::default()
        });
        assert!(!check.should_stop);
        assert!(check.warnings.is_empty());
    }

    #[test]
    fn warns_at_ninety_percent() {
        let enforcer = enforcer(Limits::default().with_max_iterations(10));
        let check = enforcer.check(&BudgetUsage {
            iterations: 9,
            ..Default::default()
        });
        assert!(!check.should_stop);
        assert_eq!(check.warnings.len(), 1);
        assert!(check.warnings[0].contains("iteration"));
    }

    #[test]
    fn stops_on_cost() {
        let enforcer = enforcer(Limits::default().with_max_cost(0.01));
        let check = enforcer.check(&BudgetUsage {
            total_cost: 0.02,
            ..Default::default()
        });
        assert!(check.should_stop);
        assert!(check.reason.expect("reason").contains("cost"));
    }

    #[test]
    fn non_positive_limits_never_stop() {
        let enforcer = enforcer(Limits::unlimited().with_max_time_seconds(0));
        let check = enforcer.check(&BudgetUsage {
            iterations: 1_000_000,
            total_cost: 1e9,
            total_tool_calls: 1_000_000,
        });
        assert!(!check.should_stop);
        assert!(check.warnings.is_empty());

        let snapshot = enforcer.snapshot(&BudgetUsage {
            iterations: 42,
            total_cost: 7.0,
            total_tool_calls: 13,
        });
        assert!((snapshot.iterations.percent - 0.0).abs() < f64::EPSILON);
        assert!((snapshot.cost.percent - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn snapshot_percentages() {
        let enforcer = enforcer(
            Limits::default()
                .with_max_iterations(100)
                .with_max_cost(10.0),
        );
        let snapshot = enforcer.snapshot(&BudgetUsage {
            iterations: 25,
            total_cost: 5.0,
            total_tool_calls: 0,
        });
        assert!((snapshot.iterations.percent - 25.0).abs() < 1e-9);
        assert!((snapshot.cost.percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn highest_pressure_picks_max() {
        let enforcer = enforcer(
            Limits::default()
                .with_max_iterations(100)
                .with_max_cost(10.0)
                .with_max_time_seconds(0),
        );
        let pressure = enforcer.highest_pressure(&BudgetUsage {
            iterations: 10,
            total_cost: 8.5,
            total_tool_calls: 0,
        });
        assert!((pressure - 0.85).abs() < 1e-9);
    }
}
