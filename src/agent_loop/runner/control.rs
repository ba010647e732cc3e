use crate::agent::state::ConversationState;
use crate::error::EngineError;
use crate::types::message::ToolCall;

use super::super::events::{DoneReason, LoopEvent, LoopEventPayload};
use super::super::types::{LoopResult, LoopState, LoopStatus, RunId};
use super::EventSink;

/// Stamps, records and forwards the events of one run.
pub(super) struct LoopEventEmitter {
    run_id: RunId,
    seq: u64,
    sink: Option<EventSink>,
    events: Vec<LoopEvent>,
}

impl LoopEventEmitter {
    pub(super) fn new(run_id: RunId, sink: Option<EventSink>) -> Self {
        Self {
            run_id,
            seq: 0,
            sink,
            events: Vec::new(),
        }
    }

    pub(super) fn run_id(&self) -> RunId {
        self.run_id
    }

    pub(super) fn emit(&mut self, payload: LoopEventPayload) {
        self.seq += 1;
        let event = LoopEvent {
            run_id: self.run_id,
            seq: self.seq,
            timestamp: chrono::Utc::now(),
            payload,
        };
        if let Some(sink) = &self.sink {
            (sink)(event.clone());
        }
        self.events.push(event);
    }

    fn into_events(self) -> Vec<LoopEvent> {
        self.events
    }
}

pub(super) fn trace_state(run_id: RunId, state: LoopState) {
    if debug_enabled() {
        tracing::debug!(run_id = %run_id, state = %state, "turn loop transition");
    }
}

pub(super) fn done_result(
    mut emitter: LoopEventEmitter,
    state: &ConversationState,
    reason: DoneReason,
) -> LoopResult {
    trace_state(emitter.run_id(), LoopState::Done);
    let final_text = state.last_assistant_text();
    emitter.emit(LoopEventPayload::Done {
        reason,
        final_text: final_text.clone(),
        usage: state.usage(),
    });
    finish(emitter, state, LoopStatus::Done, final_text, Vec::new(), None)
}

pub(super) fn failed_result(
    mut emitter: LoopEventEmitter,
    state: &ConversationState,
    error: EngineError,
) -> LoopResult {
    trace_state(emitter.run_id(), LoopState::Error);
    let message = error.to_string();
    if debug_enabled() {
        tracing::debug!(run_id = %emitter.run_id(), error = %message, "turn loop failed");
    }
    emitter.emit(LoopEventPayload::Error {
        message: message.clone(),
        is_retryable: error.is_retryable(),
        category: error.category(),
    });
    let status = if matches!(error, EngineError::Cancelled) {
        LoopStatus::Canceled
    } else {
        LoopStatus::Failed
    };
    finish(emitter, state, status, state.last_assistant_text(), Vec::new(), Some(message))
}

pub(super) fn awaiting_remote_result(
    mut emitter: LoopEventEmitter,
    state: &ConversationState,
    turn: usize,
    calls: Vec<ToolCall>,
) -> LoopResult {
    trace_state(emitter.run_id(), LoopState::AwaitingRemoteTool);
    emitter.emit(LoopEventPayload::RemoteToolRequested {
        turn,
        calls: calls.clone(),
    });
    finish(
        emitter,
        state,
        LoopStatus::AwaitingRemoteTool,
        state.last_assistant_text(),
        calls,
        None,
    )
}

fn finish(
    emitter: LoopEventEmitter,
    state: &ConversationState,
    status: LoopStatus,
    final_text: String,
    pending_remote_calls: Vec<ToolCall>,
    error: Option<String>,
) -> LoopResult {
    LoopResult {
        run_id: emitter.run_id(),
        status,
        events: emitter.into_events(),
        pending_remote_calls,
        final_text,
        usage: state.usage(),
        error,
    }
}

pub(super) fn debug_enabled() -> bool {
    matches!(std::env::var("TURN_ENGINE_DEBUG").as_deref(), Ok("1"))
}
