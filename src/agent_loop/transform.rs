//! Context transforms applied to the backend-facing history before each call.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::types::message::{ContentBlock, Message, Role};

/// Rewrites the projected history before it is sent to the backend.
///
/// Implementations may drop, summarize or reorder messages but must keep
/// every tool invocation together with its result. The loop checks this with
/// [`check_tool_pairing`] and fails the turn when it does not hold.
#[async_trait]
pub trait ContextTransform: Send + Sync {
    async fn transform(&self, messages: Vec<Message>) -> Result<Vec<Message>>;
}

/// Closure form of [`ContextTransform`].
pub type TransformContextFn = Arc<
    dyn Fn(Vec<Message>) -> Pin<Box<dyn Future<Output = Result<Vec<Message>>> + Send>>
        + Send
        + Sync,
>;

#[async_trait]
impl ContextTransform for TransformContextFn {
    async fn transform(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        (self)(messages).await
    }
}

/// Verify that every tool invocation has a later result and every result
/// answers an earlier invocation.
pub fn check_tool_pairing(messages: &[Message]) -> Result<()> {
    let mut open: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for message in messages {
        for block in &message.content {
            match block {
                ContentBlock::ToolCall(call) => {
                    seen.insert(call.id.as_str());
                    open.push(call.id.as_str());
                }
                ContentBlock::ToolResult(result) => {
                    let id = result.tool_call_id.as_str();
                    if !seen.contains(id) {
                        return Err(EngineError::ContextTransform(format!(
                            "tool result '{id}' has no preceding invocation"
                        )));
                    }
                    open.retain(|pending| *pending != id);
                }
                ContentBlock::Text { .. } => {}
            }
        }
    }
    match open.first() {
        Some(id) => Err(EngineError::ContextTransform(format!(
            "tool invocation '{id}' has no result"
        ))),
        None => Ok(()),
    }
}

pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    let mut tokens = 4usize;
    for block in &message.content {
        tokens += match block {
            ContentBlock::Text { text } => estimate_text_tokens(text),
            ContentBlock::ToolCall(call) => {
                let args = serde_json::to_string(&call.arguments).unwrap_or_default();
                estimate_text_tokens(&call.name) + estimate_text_tokens(&args) + 8
            }
            ContentBlock::ToolResult(result) => {
                let payload = serde_json::to_string(&result.result).unwrap_or_default();
                estimate_text_tokens(&result.tool_call_id) + estimate_text_tokens(&payload) + 8
            }
        };
    }
    tokens
}

fn is_tool_result_message(message: &Message) -> bool {
    message
        .content
        .iter()
        .any(|block| matches!(block, ContentBlock::ToolResult(_)))
}

/// Index of the first message to keep so that the kept suffix fits in
/// `keep_recent_tokens`. Never points at a tool-result message.
pub fn find_cut_index(messages: &[Message], keep_recent_tokens: usize) -> usize {
    if messages.is_empty() {
        return 0;
    }
    if keep_recent_tokens == 0 {
        return messages.len();
    }

    let mut kept_tokens = 0usize;
    let mut cut_index = 0;
    for idx in (0..messages.len()).rev() {
        kept_tokens += estimate_message_tokens(&messages[idx]);
        if kept_tokens > keep_recent_tokens {
            cut_index = idx + 1;
            break;
        }
    }

    while cut_index < messages.len() && is_tool_result_message(&messages[cut_index]) {
        cut_index += 1;
    }
    cut_index
}

/// Keeps the newest messages within an estimated token budget, plus the
/// conversation's first user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentWindowTransform {
    pub keep_recent_tokens: usize,
}

impl RecentWindowTransform {
    pub fn new(keep_recent_tokens: usize) -> Self {
        Self { keep_recent_tokens }
    }

    pub fn apply(&self, messages: Vec<Message>) -> Vec<Message> {
        let cut_index = find_cut_index(&messages, self.keep_recent_tokens);
        if cut_index == 0 {
            return messages;
        }
        let first_user = messages[..cut_index]
            .iter()
            .position(|m| m.role == Role::User && !is_tool_result_message(m));
        let mut kept = Vec::with_capacity(messages.len() - cut_index + 1);
        let mut rest = messages.into_iter();
        if let Some(idx) = first_user {
            kept.extend(rest.by_ref().nth(idx));
            rest.by_ref().take(cut_index - idx - 1).for_each(drop);
        } else {
            rest.by_ref().take(cut_index).for_each(drop);
        }
        kept.extend(rest);
        kept
    }
}

#[async_trait]
impl ContextTransform for RecentWindowTransform {
    async fn transform(&self, messages: Vec<Message>) -> Result<Vec<Message>> {
        Ok(self.apply(messages))
    }
}
