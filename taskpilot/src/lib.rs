//! Taskpilot is an autonomous agent runtime: it drives a language-model
//! backed control loop that decomposes a goal into a plan, executes the
//! plan step by step through a registry of sandboxed tools, observes
//! outcomes, adapts the plan, and terminates on success, failure, or
//! resource exhaustion.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskpilot::prelude::*;
//!
//! let mut registry = ToolRegistry::new();
//! for tool in taskpilot::tool::builtin::base_tools() {
//!     registry.register(tool);
//! }
//!
//! let mut engine = AgentEngine::builder()
//!     .model(model)
//!     .registry(Arc::new(registry))
//!     .context(TaskContext::new("task-1", "./workspace"))
//!     .build()?;
//!
//! let mut updates = engine.take_updates().expect("updates");
//! let report = engine.run("write hello.txt with body 'hi'").await?;
//! ```

// Core building blocks
pub mod budget;
pub mod cache;
pub mod config;
pub mod error;

// Model and tool capabilities
pub mod llm;
pub mod tool;

// Planning and memory
pub mod memory;
pub mod plan;
pub mod planner;

// The engine and coordination
pub mod agent;
pub mod metrics;
pub mod orchestrator;

pub mod prelude;

mod util;

pub use agent::{AgentEngine, AgentMode, AgentPhase, RunReport};
pub use error::{Error, Result};
