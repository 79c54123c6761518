//! Scripted model implementation for testing.
//!
//! Returns predefined responses in sequence, cycling when exhausted. Useful
//! for driving deterministic engine runs without a real provider.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::{ChatModel, CompletionRequest, CompletionResponse, Usage};

/// A scripted chat model for tests.
///
/// # Example
///
/// ```rust,ignore
/// let model = MockModel::new(vec!["first".into(), "second".into()]);
/// // First call returns "first", second "second", third "first" again...
/// ```
#[derive(Debug)]
pub struct MockModel {
    model_id: String,
    responses: Vec<CompletionResponse>,
    next: AtomicUsize,
}

impl MockModel {
    /// Token usage attached to every scripted response by default.
    pub const DEFAULT_USAGE: Usage = Usage::new(200, 100);

    /// Create a mock returning the given texts in order.
    #[must_use]
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            model_id: "mock-model".to_owned(),
            responses: responses
                .into_iter()
                .map(|text| CompletionResponse::text(text, Self::DEFAULT_USAGE))
                .collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Create a mock from fully specified responses (tool calls, usage).
    #[must_use]
    pub fn from_responses(responses: Vec<CompletionResponse>) -> Self {
        Self {
            model_id: "mock-model".to_owned(),
            responses,
            next: AtomicUsize::new(0),
        }
    }

    /// Override the model id.
    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Override the usage reported by every scripted response.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        for response in &mut self.responses {
            response.usage = usage;
        }
        self
    }

    /// How many completions have been served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for MockModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .get(index % self.responses.len().max(1))
            .cloned()
            .unwrap_or_else(|| CompletionResponse::text("No response", Usage::zero()));
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[tokio::test]
    async fn cycles_responses() {
        let model = MockModel::new(vec!["first".into(), "second".into()]);
        let request = CompletionRequest::new(vec![Message::user("hi")], 0.0);

        let r1 = model.complete(&request).await.expect("complete");
        let r2 = model.complete(&request).await.expect("complete");
        let r3 = model.complete(&request).await.expect("complete");

        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
        assert_eq!(r3.content, "first");
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn usage_override() {
        let model = MockModel::new(vec!["x".into()]).with_usage(Usage::new(10, 20));
        let request = CompletionRequest::new(vec![Message::user("hi")], 0.0);
        let response = model.complete(&request).await.expect("complete");
        assert_eq!(response.usage, Usage::new(10, 20));
    }
}
