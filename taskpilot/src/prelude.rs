//! Convenience re-exports for embedding hosts.

pub use crate::agent::{
    AgentEngine, AgentListener, AgentMode, AgentPhase, AgentState, AgentUpdate, Checkpoint,
    NoopListener, PauseHandle, RunReport, UpdateKind, UpdateReceiver,
};
pub use crate::budget::{BudgetCheck, BudgetEnforcer, BudgetSnapshot, BudgetUsage};
pub use crate::cache::ExecutionCache;
pub use crate::config::{AgentConfig, Limits, TaskContext};
pub use crate::error::{Error, Result};
pub use crate::llm::{
    ChatModel, CompletionRequest, CompletionResponse, Message, MockModel, Pricing, Role, Usage,
};
pub use crate::memory::{MemorySnapshot, MemoryStore, TaskRecord};
pub use crate::metrics::{MetricsCollector, MetricsSummary};
pub use crate::orchestrator::{
    AgentRunSummary, CoordinationReport, CoordinationStrategy, Orchestrator,
};
pub use crate::plan::{
    ActionType, ExecutionResult, Plan, PlanStatus, PlanStep, PlanStrategy, StepStatus,
};
pub use crate::planner::{Planner, PlanningOutcome, ReplanDecision};
pub use crate::tool::{
    ParameterKind, ParameterSchema, Tool, ToolCapability, ToolCategory, ToolContext, ToolMetadata,
    ToolRegistry, ToolResult, ValidationReport,
};
