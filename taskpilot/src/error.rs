//! Error types for the taskpilot runtime.
//!
//! Failures that occur *inside* the agent loop — a tool returning an error,
//! an LLM producing garbage — are surfaced as data ([`ExecutionResult`] /
//! [`ToolResult`]) and fed back into reflection. Only terminal conditions
//! (budget exhaustion, engine panics, configuration mistakes) travel as
//! [`Error`] values and unwind a run.
//!
//! [`ExecutionResult`]: crate::plan::ExecutionResult
//! [`ToolResult`]: crate::tool::ToolResult

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for runtime operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Pre-dispatch validation of tool arguments failed.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the violated constraint.
        message: String,
    },

    /// A tool failed or timed out during execution.
    #[error("Tool execution error in '{tool_name}': {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// Transport or schema failure from the language model.
    #[error("Model error: {message}")]
    Llm {
        /// The underlying error message.
        message: String,
    },

    /// Model output could not be parsed into the expected shape.
    #[error("Parsing error: {message}. Output: {output}")]
    Parsing {
        /// The output that failed to parse (truncated by callers).
        output: String,
        /// The parsing error message.
        message: String,
    },

    /// An enforced resource limit was met or exceeded.
    #[error("Budget exceeded: {reason}")]
    BudgetExceeded {
        /// Which limit tripped and at what value.
        reason: String,
    },

    /// An uncaught failure in the agent loop.
    #[error("Engine failure: {message}")]
    Engine {
        /// The underlying error message.
        message: String,
    },

    /// Invalid runtime configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration issue.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error (checkpoints, metrics export, workspace setup).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new tool execution error.
    #[must_use]
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new model error.
    #[must_use]
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Create a new parsing error.
    #[must_use]
    pub fn parsing(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parsing {
            output: output.into(),
            message: message.into(),
        }
    }

    /// Create a new budget error.
    #[must_use]
    pub fn budget(reason: impl Into<String>) -> Self {
        Self::BudgetExceeded {
            reason: reason.into(),
        }
    }

    /// Create a new engine failure.
    #[must_use]
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
