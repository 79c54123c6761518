//! Typed event listener.
//!
//! The update stream is the primary observation surface; a listener is a
//! secondary convenience for embedding hosts that want synchronous hooks.
//! Every method has a no-op default, so implementations override only what
//! they care about. Listener calls happen inline on the engine loop and
//! must return quickly.

use serde_json::Value;

use crate::agent::state::AgentPhase;

/// Synchronous hooks into agent lifecycle events.
pub trait AgentListener: Send + Sync {
    /// The agent moved to a new phase.
    fn on_phase_change(&self, _agent_id: &str, _phase: AgentPhase) {}

    /// A tool is about to be invoked.
    fn on_tool_call(&self, _agent_id: &str, _tool_name: &str, _arguments: &Value) {}

    /// An observation was appended.
    fn on_observation(&self, _agent_id: &str, _observation: &str) {}

    /// A limit crossed its warning threshold.
    fn on_limit_warning(&self, _agent_id: &str, _warning: &str) {}

    /// An error was recorded.
    fn on_error(&self, _agent_id: &str, _error: &str) {}

    /// A checkpoint was written.
    fn on_checkpoint(&self, _agent_id: &str, _iteration: u64) {}

    /// A reflection pass ran.
    fn on_replan(&self, _agent_id: &str, _current_step: usize) {}

    /// The run reached a terminal phase.
    fn on_complete(&self, _agent_id: &str, _phase: AgentPhase) {}
}

/// A listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl AgentListener for NoopListener {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        phases: Mutex<Vec<AgentPhase>>,
    }

    impl AgentListener for Recording {
        fn on_phase_change(&self, _agent_id: &str, phase: AgentPhase) {
            self.phases.lock().expect("lock").push(phase);
        }
    }

    #[test]
    fn defaults_are_noops() {
        let listener = NoopListener;
        listener.on_phase_change("a", AgentPhase::Planning);
        listener.on_error("a", "boom");
    }

    #[test]
    fn overridden_hook_fires() {
        let listener = Recording::default();
        listener.on_phase_change("a", AgentPhase::Executing);
        listener.on_observation("a", "ignored by default impl");
        assert_eq!(*listener.phases.lock().expect("lock"), vec![AgentPhase::Executing]);
    }
}
