//! Per-agent execution metrics and export.
//!
//! The collector records one entry per step plus a session record, and can
//! export the summary as JSON and a flat CSV under the agent's workspace.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::util::now_unix_seconds;

/// Directory under the workspace where exports land.
const METRICS_DIR: &str = "metrics";

/// Metrics for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetric {
    /// Id of the step.
    pub step_id: String,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
    /// Whether the step succeeded.
    pub success: bool,
    /// Tool used, if any.
    pub tool_used: Option<String>,
}

/// Session-level metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionMetric {
    /// Session start, unix seconds.
    pub started_at: f64,
    /// Total duration in seconds.
    pub duration_secs: f64,
    /// Whether the run completed.
    pub success: bool,
}

/// Serializable metrics summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Owning agent id.
    pub agent_id: String,
    /// Session record.
    pub session: SessionMetric,
    /// Per-step records.
    pub steps: Vec<StepMetric>,
    /// Count of successful steps.
    pub successful_steps: usize,
    /// Count of failed steps.
    pub failed_steps: usize,
}

/// Records step and session metrics for one agent.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    agent_id: String,
    started_at: f64,
    steps: Vec<StepMetric>,
    session: Option<SessionMetric>,
}

impl MetricsCollector {
    /// Create a collector for an agent.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            started_at: now_unix_seconds(),
            steps: Vec::new(),
            session: None,
        }
    }

    /// Record one executed step.
    pub fn record_step(
        &mut self,
        step_id: impl Into<String>,
        duration_secs: f64,
        success: bool,
        tool_used: Option<String>,
    ) {
        self.steps.push(StepMetric {
            step_id: step_id.into(),
            duration_secs,
            success,
            tool_used,
        });
    }

    /// Record the session outcome.
    pub fn record_session(&mut self, success: bool) {
        self.session = Some(SessionMetric {
            started_at: self.started_at,
            duration_secs: now_unix_seconds() - self.started_at,
            success,
        });
    }

    /// Build the serializable summary.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let successful_steps = self.steps.iter().filter(|s| s.success).count();
        MetricsSummary {
            agent_id: self.agent_id.clone(),
            session: self.session.unwrap_or(SessionMetric {
                started_at: self.started_at,
                duration_secs: now_unix_seconds() - self.started_at,
                success: false,
            }),
            steps: self.steps.clone(),
            successful_steps,
            failed_steps: self.steps.len() - successful_steps,
        }
    }

    /// Export the summary as JSON and flat CSV under `<workspace>/metrics/`.
    ///
    /// Returns the two written paths (JSON first).
    pub fn export(&self, workspace: &Path) -> Result<(PathBuf, PathBuf)> {
        let dir = workspace.join(METRICS_DIR);
        std::fs::create_dir_all(&dir)?;
        let summary = self.summary();

        let json_path = dir.join(format!("metrics_{}.json", self.agent_id));
        std::fs::write(&json_path, serde_json::to_vec_pretty(&summary)?)?;

        let csv_path = dir.join(format!("metrics_{}.csv", self.agent_id));
        let mut writer = csv::Writer::from_path(&csv_path)
            .map_err(|e| crate::error::Error::engine(format!("CSV export failed: {e}")))?;
        write_csv(&mut writer, &summary)
            .map_err(|e| crate::error::Error::engine(format!("CSV export failed: {e}")))?;

        info!(
            agent_id = %self.agent_id,
            json = %json_path.display(),
            csv = %csv_path.display(),
            "metrics exported"
        );
        Ok((json_path, csv_path))
    }
}

fn write_csv<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    summary: &MetricsSummary,
) -> csv::Result<()> {
    writer.write_record(["category", "metric", "value"])?;
    writer.write_record([
        "session",
        "duration_secs",
        &summary.session.duration_secs.to_string(),
    ])?;
    writer.write_record(["session", "success", &summary.session.success.to_string()])?;
    writer.write_record([
        "session",
        "started_at",
        &summary.session.started_at.to_string(),
    ])?;

    for step in &summary.steps {
        writer.write_record(["step", "id", &step.step_id])?;
        writer.write_record(["step", "duration_secs", &step.duration_secs.to_string()])?;
        writer.write_record(["step", "success", &step.success.to_string()])?;
        writer.write_record([
            "step",
            "tool_used",
            step.tool_used.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_outcomes() {
        let mut collector = MetricsCollector::new("a1");
        collector.record_step("s1", 0.1, true, Some("write_file".into()));
        collector.record_step("s2", 0.2, false, None);
        collector.record_session(true);

        let summary = collector.summary();
        assert_eq!(summary.steps.len(), 2);
        assert_eq!(summary.successful_steps, 1);
        assert_eq!(summary.failed_steps, 1);
        assert!(summary.session.success);
    }

    #[test]
    fn export_writes_json_and_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut collector = MetricsCollector::new("a1");
        collector.record_step("s1", 0.1, true, Some("read_file".into()));
        collector.record_session(true);

        let (json_path, csv_path) = collector.export(dir.path()).expect("export");
        assert!(json_path.exists());
        assert!(csv_path.exists());

        let csv_text = std::fs::read_to_string(&csv_path).expect("read csv");
        assert!(csv_text.starts_with("category,metric,value"));
        assert!(csv_text.contains("step,id,s1"));

        let json_text = std::fs::read_to_string(&json_path).expect("read json");
        let parsed: MetricsSummary = serde_json::from_str(&json_text).expect("parse");
        assert_eq!(parsed.agent_id, "a1");
    }
}
