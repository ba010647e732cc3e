//! Loop event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::ErrorCategory;
use crate::types::message::ToolCall;
use crate::types::{StopReason, Usage};

use super::types::RunId;

/// Why a run finished normally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DoneReason {
    /// The backend answered without tool calls and no follow-up was queued.
    Completed,
    /// `on_turn_end` returned `false`.
    StoppedByHook,
    /// The turn ceiling was reached.
    MaxTurns,
}

/// Concrete event payloads emitted by the turn loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEventPayload {
    TurnStart {
        turn: usize,
    },
    TurnEnd {
        turn: usize,
        stop_reason: StopReason,
        usage: Usage,
        model: String,
        provider: String,
    },
    ToolExecuted {
        turn: usize,
        tool_call_id: String,
        tool_name: String,
        is_error: bool,
        duration_ms: u64,
    },
    /// The loop halted; the caller must execute these and resume.
    RemoteToolRequested {
        turn: usize,
        calls: Vec<ToolCall>,
    },
    SteeringInterrupt {
        turn: usize,
        /// Names of the invocations that were not executed, in backend order.
        skipped_tools: Vec<String>,
        skipped_call_ids: Vec<String>,
        /// Number of steering messages appended.
        injected: usize,
    },
    ProviderSwitch {
        turn: usize,
        from_model: String,
        from_provider: String,
        to_model: String,
        to_provider: String,
    },
    Done {
        reason: DoneReason,
        final_text: String,
        usage: Usage,
    },
    Error {
        message: String,
        is_retryable: bool,
        category: ErrorCategory,
    },
}

impl LoopEventPayload {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopEventPayload::Done { .. }
                | LoopEventPayload::Error { .. }
                | LoopEventPayload::RemoteToolRequested { .. }
        )
    }
}

/// Envelope for loop events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopEvent {
    pub run_id: RunId,
    /// Strictly increasing within one run, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: LoopEventPayload,
}
