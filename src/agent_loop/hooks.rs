//! Optional per-turn callbacks.
//!
//! Each hook is independent; an unset hook is a no-op. Only `on_turn_end`
//! can influence control flow.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::message::AgentMessage;
use crate::error::Result;
use crate::types::Usage;

/// What `on_turn_end` learns about the turn that just finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEndInfo {
    pub turn: usize,
    /// Usage of this turn's backend call only.
    pub usage: Usage,
    pub model: String,
    pub provider: String,
}

/// Called after the assistant message is stored and before any tool runs.
/// `Ok(false)` stops the loop normally; `Err` fails the run.
pub type TurnEndHook = Arc<
    dyn Fn(TurnEndInfo) -> Pin<Box<dyn Future<Output = Result<bool>> + Send>> + Send + Sync,
>;

/// Called after each assistant or tool-result append. Errors are logged and ignored.
pub type MessageHook = Arc<dyn Fn(&AgentMessage) -> Result<()> + Send + Sync>;

/// Called with the error text and its retry classification when the backend
/// or provider resolution fails. Errors are logged and ignored.
pub type ErrorHook = Arc<dyn Fn(&str, bool) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TurnHooks {
    pub on_turn_end: Option<TurnEndHook>,
    pub on_message: Option<MessageHook>,
    pub on_error: Option<ErrorHook>,
}

impl TurnHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_turn_end<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(TurnEndInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        self.on_turn_end = Some(Arc::new(move |info| Box::pin(hook(info))));
        self
    }

    pub fn on_message(mut self, hook: impl Fn(&AgentMessage) -> Result<()> + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&str, bool) -> Result<()> + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Run `on_turn_end`; an unset hook continues.
    pub(crate) async fn turn_end(&self, info: TurnEndInfo) -> Result<bool> {
        match &self.on_turn_end {
            Some(hook) => hook(info).await,
            None => Ok(true),
        }
    }

    pub(crate) fn message(&self, message: &AgentMessage) {
        let Some(hook) = &self.on_message else {
            return;
        };
        if let Err(err) = hook(message) {
            tracing::warn!(error = %err, kind = %message.kind(), "on_message hook failed");
        }
    }

    pub(crate) fn error(&self, message: &str, is_retryable: bool) {
        let Some(hook) = &self.on_error else {
            return;
        };
        if let Err(err) = hook(message, is_retryable) {
            tracing::warn!(error = %err, "on_error hook failed");
        }
    }
}

impl std::fmt::Debug for TurnHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnHooks")
            .field("on_turn_end", &self.on_turn_end.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
