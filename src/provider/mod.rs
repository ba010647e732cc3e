//! Backend capability and per-turn provider resolution.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::types::message::{ContentBlock, Message, Origin, ToolCall};
use crate::types::{GenerationSettings, StopReason, TextStreamDelta, Usage};

pub use crate::tools::types::ToolDefinition;

/// A request sent to a backend.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    /// `None` when no tools are registered.
    pub tools: Option<Vec<ToolDefinition>>,
    pub settings: GenerationSettings,
}

/// Response from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl BackendResponse {
    /// A plain text answer.
    pub fn text(text: impl Into<String>, usage: Usage) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            stop_reason: StopReason::EndTurn,
            usage,
        }
    }

    /// A response that requests tool invocations.
    pub fn tool_calls(calls: impl IntoIterator<Item = ToolCall>, usage: Usage) -> Self {
        Self {
            content: calls.into_iter().map(ContentBlock::ToolCall).collect(),
            stop_reason: StopReason::ToolUse,
            usage,
        }
    }

    /// Build the assistant message stored in history.
    pub fn into_message(self, origin: Origin) -> Message {
        Message::assistant(self.content, origin)
            .with_stop_reason(self.stop_reason)
            .with_usage(self.usage)
    }
}

/// A language-model backend.
///
/// Errors returned by [`complete`](Backend::complete) are classified with
/// [`EngineError::is_retryable`](crate::error::EngineError::is_retryable); the
/// engine reports the classification and never retries on its own.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Provider name (e.g. "anthropic").
    fn provider_name(&self) -> &str;

    /// Model this backend instance serves.
    fn model_id(&self) -> &str;

    async fn complete(&self, request: &BackendRequest) -> Result<BackendResponse>;

    /// Streaming variant. The default replays [`complete`](Backend::complete)
    /// as one delta per content block followed by a `Done` delta.
    async fn stream(
        &self,
        request: &BackendRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta>>> {
        let response = self.complete(request).await?;
        let mut deltas: Vec<Result<TextStreamDelta>> = response
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(Ok(TextStreamDelta::text(text))),
                ContentBlock::ToolCall(call) => Some(Ok(TextStreamDelta::tool_call(call))),
                ContentBlock::ToolResult(_) => None,
            })
            .collect();
        deltas.push(Ok(TextStreamDelta::done(response.stop_reason, response.usage)));
        Ok(stream::iter(deltas).boxed())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn origin(&self) -> Origin {
        Origin::new(self.model_id(), self.provider_name())
    }
}

/// Zero-argument async callback returning the backend for the next turn.
///
/// Invoked once per turn and never cached, so callers can switch models or
/// providers between turns (e.g. on a subscription change).
pub type ProviderResolver =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Backend>>> + Send + Sync>;

/// Resolver that always returns `backend`.
pub fn static_resolver(backend: Arc<dyn Backend>) -> ProviderResolver {
    Arc::new(move || {
        let backend = Arc::clone(&backend);
        Box::pin(async move { Ok(backend) })
    })
}
