//! Language-model capability interface.
//!
//! The runtime treats the LLM as an opaque capability: it hands over a
//! message sequence and receives text (or tool call requests) plus a token
//! usage record. Concrete HTTP clients live outside this crate; the
//! [`ChatModel`] trait is the seam, and [`MockModel`] provides a scripted
//! implementation for tests.

mod mock;

pub use mock::MockModel;

use std::ops::{Add, AddAssign};
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// A tool result fed back to the model.
    Tool,
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// For `Tool` messages, the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    /// Create a tool result message answering `tool_call_id`.
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Requested output shape for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text.
    Text,
    /// The model must emit a single JSON object.
    JsonObject,
}

/// A completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Conversation messages, oldest first.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Requested output shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Tool schemas (function-calling JSON) offered to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

impl CompletionRequest {
    /// Create a request from messages at the given temperature.
    #[must_use]
    pub fn new(messages: Vec<Message>, temperature: f32) -> Self {
        Self {
            messages,
            temperature,
            max_tokens: None,
            response_format: None,
            tools: Vec::new(),
        }
    }

    /// Set the max token budget.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Request a JSON object response.
    #[must_use]
    pub const fn json_object(mut self) -> Self {
        self.response_format = Some(ResponseFormat::JsonObject);
        self
    }

    /// Offer tool schemas to the model.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id.
    pub id: String,
    /// Name of the requested tool.
    pub name: String,
    /// Arguments as a JSON object.
    pub arguments: Value,
}

/// Token usage reported by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    #[serde(default)]
    pub completion_tokens: u32,
}

impl Usage {
    /// Create a usage record.
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// An empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    /// Total tokens consumed.
    #[must_use]
    pub const fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// A completion response: text, optional tool calls, and usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text, if any.
    pub content: String,
    /// Tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token usage for the call.
    #[serde(default)]
    pub usage: Usage,
}

impl CompletionResponse {
    /// Create a text-only response.
    #[must_use]
    pub fn text(content: impl Into<String>, usage: Usage) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage,
        }
    }
}

/// A chunk of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionChunk {
    /// Incremental text.
    Text(String),
    /// Terminal usage record, emitted once after the last text chunk.
    Usage(Usage),
}

/// Boxed stream of completion chunks.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk>> + Send>>;

/// Per-token pricing used to derive run cost from reported usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// USD per 1000 prompt tokens.
    pub prompt_per_1k: f64,
    /// USD per 1000 completion tokens.
    pub completion_per_1k: f64,
}

impl Pricing {
    /// Create a pricing table.
    #[must_use]
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    /// Cost in USD for a usage record.
    #[must_use]
    pub fn cost(&self, usage: Usage) -> f64 {
        f64::from(usage.prompt_tokens) / 1000.0 * self.prompt_per_1k
            + f64::from(usage.completion_tokens) / 1000.0 * self.completion_per_1k
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self::new(0.000_14, 0.000_28)
    }
}

/// An opaque chat-completion capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier of the underlying model.
    fn model_id(&self) -> &str;

    /// Generate a completion for the request.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Generate a streamed completion: text chunks followed by a terminal
    /// usage record.
    ///
    /// The default adapter performs a blocking [`complete`](Self::complete)
    /// and replays it as one chunk plus the usage record.
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let response = self.complete(request).await?;
        let stream = async_stream::try_stream! {
            if !response.content.is_empty() {
                yield CompletionChunk::Text(response.content.clone());
            }
            yield CompletionChunk::Usage(response.usage);
        };
        Ok(Box::pin(stream))
    }
}
