//! Core run types for the turn loop.

use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::types::message::ToolCall;
use crate::types::Usage;

use super::events::{DoneReason, LoopEvent, LoopEventPayload};

/// Unique identifier of one `TurnLoop::run` invocation.
pub type RunId = Uuid;

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoopStatus {
    Done,
    /// Halted on a remote tool; resume after submitting its result.
    AwaitingRemoteTool,
    Failed,
    Canceled,
}

/// Loop phase, traced at debug level on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoopState {
    ResolvingProvider,
    BuildingContext,
    CallingBackend,
    StoringResponse,
    EvaluatingContinuation,
    DrainingSteering,
    DispatchingTools,
    CheckingFollowUp,
    AwaitingRemoteTool,
    Done,
    Error,
}

/// Outcome of one run. The mutated history lives in the `ConversationState`
/// the caller passed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopResult {
    pub run_id: RunId,
    pub status: LoopStatus,
    /// Every event emitted by the run, in `seq` order.
    pub events: Vec<LoopEvent>,
    /// Remote invocations the caller must execute; empty unless
    /// `status == AwaitingRemoteTool`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_remote_calls: Vec<ToolCall>,
    pub final_text: String,
    /// Cumulative usage of the conversation at the end of the run.
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoopResult {
    /// Reason of the terminal `Done` event, if the run finished normally.
    pub fn done_reason(&self) -> Option<DoneReason> {
        self.events.iter().rev().find_map(|event| match event.payload {
            LoopEventPayload::Done { reason, .. } => Some(reason),
            _ => None,
        })
    }

    pub fn payloads(&self) -> impl Iterator<Item = &LoopEventPayload> {
        self.events.iter().map(|event| &event.payload)
    }
}
