//! Real-time progress events.
//!
//! Every observable engine transition emits an [`AgentUpdate`] through an
//! unbounded channel: the producer side never blocks the control loop, and
//! updates for one agent are strictly FIFO with non-decreasing iteration
//! numbers. Consumers route on [`UpdateKind`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::state::AgentPhase;
use crate::util::now_unix_seconds;

/// Type tag of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum UpdateKind {
    /// Run accepted; carries task, mode, and limits.
    Init,
    /// Planning started.
    Planning,
    /// The initial plan is ready.
    PlanCreated,
    /// A step is about to execute.
    StepStart,
    /// A step finished (successfully or not).
    StepResult,
    /// A step raised an engine-level error.
    StepError,
    /// An observation was appended.
    Observation,
    /// A limit is close to tripping.
    Warning,
    /// Reflection started.
    Replanning,
    /// Reflection changed the plan.
    PlanUpdated,
    /// A limit tripped; the run is stopping.
    LimitReached,
    /// The run halted before completion.
    Stopped,
    /// The run finished successfully.
    Completed,
    /// The run failed.
    Failed,
    /// A tool is being invoked.
    ToolCall,
    /// A tool invocation finished.
    ToolResult,
    /// Final metrics summary.
    Metrics,
    /// A checkpoint was written.
    Checkpoint,
    /// A clarification was answered from memory instead of the user.
    ClarificationInferred,
    /// Assistant-mode model reply.
    AssistantResponse,
}

/// A progress event emitted by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUpdate {
    /// Event type, used for routing.
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    /// Emission time, unix seconds.
    pub timestamp: f64,
    /// Id of the emitting agent.
    pub agent_id: String,
    /// Agent phase at emission time.
    pub phase: AgentPhase,
    /// Iteration counter at emission time.
    pub iteration: u64,
    /// Event payload.
    pub data: Value,
}

/// Receiving half of an agent's update stream.
pub type UpdateReceiver = mpsc::UnboundedReceiver<AgentUpdate>;

/// Non-blocking update producer.
///
/// Wraps an unbounded sender; emitting never suspends and a disconnected
/// consumer is ignored, so a slow or absent reader can never backpressure
/// the engine loop.
#[derive(Debug, Clone)]
pub struct UpdateSender {
    agent_id: String,
    tx: mpsc::UnboundedSender<AgentUpdate>,
}

impl UpdateSender {
    /// Create a sender/receiver pair for an agent.
    #[must_use]
    pub fn channel(agent_id: impl Into<String>) -> (Self, UpdateReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                agent_id: agent_id.into(),
                tx,
            },
            rx,
        )
    }

    /// Emit one update.
    pub fn emit(&self, kind: UpdateKind, phase: AgentPhase, iteration: u64, data: Value) {
        let update = AgentUpdate {
            kind,
            timestamp: now_unix_seconds(),
            agent_id: self.agent_id.clone(),
            phase,
            iteration,
            data,
        };
        // A closed receiver just means nobody is listening.
        let _ = self.tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn updates_are_fifo() {
        let (tx, mut rx) = UpdateSender::channel("a1");
        tx.emit(UpdateKind::Init, AgentPhase::Initializing, 0, json!({}));
        tx.emit(UpdateKind::Planning, AgentPhase::Planning, 0, json!({}));
        tx.emit(UpdateKind::StepStart, AgentPhase::Executing, 1, json!({}));

        assert_eq!(rx.try_recv().expect("first").kind, UpdateKind::Init);
        assert_eq!(rx.try_recv().expect("second").kind, UpdateKind::Planning);
        assert_eq!(rx.try_recv().expect("third").kind, UpdateKind::StepStart);
    }

    #[test]
    fn emit_survives_dropped_receiver() {
        let (tx, rx) = UpdateSender::channel("a1");
        drop(rx);
        tx.emit(UpdateKind::Completed, AgentPhase::Completed, 5, json!({}));
    }

    #[test]
    fn serialization_uses_type_tag() {
        let update = AgentUpdate {
            kind: UpdateKind::LimitReached,
            timestamp: 1.0,
            agent_id: "a1".into(),
            phase: AgentPhase::Stopped,
            iteration: 3,
            data: json!({"reason": "cost"}),
        };
        let value = serde_json::to_value(&update).expect("serialize");
        assert_eq!(value["type"], "limit_reached");
        assert_eq!(value["phase"], "stopped");
    }
}
