//! The turn-execution loop.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::message::AgentMessage;
use crate::agent::state::ConversationState;
use crate::error::{EngineError, Result};
use crate::provider::{BackendRequest, ProviderResolver};
use crate::tools::{ToolClass, ToolRegistry};
use crate::types::message::{Origin, ToolCall};

use super::events::{DoneReason, LoopEvent, LoopEventPayload};
use super::hooks::{TurnEndInfo, TurnHooks};
use super::transform::{check_tool_pairing, ContextTransform, TransformContextFn};
use super::types::{LoopResult, LoopState};

/// Callback receiving each event as it is emitted.
pub type EventSink = Arc<dyn Fn(LoopEvent) + Send + Sync>;

mod control;
mod tooling;

use control::{
    awaiting_remote_result, debug_enabled, done_result, failed_result, trace_state,
    LoopEventEmitter,
};
use tooling::{append_skipped_tool_call, append_tool_result, error_value, remote_group};

/// How a tool batch ended.
enum BatchOutcome {
    /// Every invocation ran.
    Completed,
    /// Steering preempted the rest of the batch; its messages are appended.
    Steered,
    /// A remote invocation must be executed by the caller.
    AwaitingRemote(Vec<ToolCall>),
}

/// Drives backend turns and tool dispatch for one conversation request.
///
/// The loop is stateless between runs: everything it reads or writes lives in
/// the [`ConversationState`] passed to [`run`](TurnLoop::run).
pub struct TurnLoop {
    registry: Arc<ToolRegistry>,
    resolver: ProviderResolver,
    transform: Option<Arc<dyn ContextTransform>>,
    hooks: TurnHooks,
    event_sink: Option<EventSink>,
}

impl TurnLoop {
    pub fn new(registry: Arc<ToolRegistry>, resolver: ProviderResolver) -> Self {
        Self {
            registry,
            resolver,
            transform: None,
            hooks: TurnHooks::default(),
            event_sink: None,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn ContextTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_transform_fn(self, transform: TransformContextFn) -> Self {
        self.with_transform(Arc::new(transform))
    }

    pub fn with_hooks(mut self, hooks: TurnHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run turns until a terminal condition.
    ///
    /// Backend, transform and hook failures are reported through the returned
    /// [`LoopResult`] (an `Error` event plus `LoopStatus::Failed`), never as a
    /// panic or early return. Messages appended before the failure stay in
    /// `state`.
    ///
    /// `cancel` is observed before a pending batch is resumed, at the start of
    /// every turn and while a backend request is in flight; an interrupted
    /// request leaves no assistant message.
    pub async fn run(&self, state: &mut ConversationState, cancel: &CancellationToken) -> LoopResult {
        let run_id = Uuid::new_v4();
        let mut emitter = LoopEventEmitter::new(run_id, self.event_sink.clone());
        if debug_enabled() {
            tracing::debug!(
                run_id = %run_id,
                turn = state.current_turn(),
                max_turns = state.max_turns(),
                messages = state.messages().len(),
                tools = self.registry.len(),
                "turn loop start"
            );
        }

        let mut previous_origin = state.last_assistant().and_then(|m| m.origin.clone());

        let pending = state.pending_tool_calls();
        if !pending.is_empty() {
            if cancel.is_cancelled() {
                return failed_result(emitter, state, EngineError::Cancelled);
            }
            let turn = state.current_turn();
            if debug_enabled() {
                tracing::debug!(run_id = %run_id, pending = pending.len(), "resuming tool batch");
            }
            match self.run_tool_batch(state, &mut emitter, &pending, turn).await {
                Ok(BatchOutcome::Completed | BatchOutcome::Steered) => {}
                Ok(BatchOutcome::AwaitingRemote(calls)) => {
                    return awaiting_remote_result(emitter, state, turn, calls);
                }
                Err(err) => return failed_result(emitter, state, err),
            }
        }

        loop {
            if cancel.is_cancelled() {
                return failed_result(emitter, state, EngineError::Cancelled);
            }
            // Steering queued since the last drain joins history before the
            // next backend call, or before the run ends on the turn ceiling.
            if let Err(err) = self.inject_steering(run_id, state) {
                return failed_result(emitter, state, err);
            }
            if state.current_turn() >= state.max_turns() {
                return done_result(emitter, state, DoneReason::MaxTurns);
            }

            let turn = state.current_turn() + 1;
            emitter.emit(LoopEventPayload::TurnStart { turn });

            trace_state(run_id, LoopState::ResolvingProvider);
            let backend = match (self.resolver)().await {
                Ok(backend) => backend,
                Err(err) => {
                    self.hooks.error(&err.to_string(), err.is_retryable());
                    return failed_result(emitter, state, err);
                }
            };
            let origin = backend.origin();
            if let Some(previous) = previous_origin.as_ref().filter(|prev| **prev != origin) {
                emitter.emit(provider_switch(turn, previous, &origin));
            }
            previous_origin = Some(origin.clone());

            trace_state(run_id, LoopState::BuildingContext);
            let messages = match self.build_context(state).await {
                Ok(messages) => messages,
                Err(err) => return failed_result(emitter, state, err),
            };

            trace_state(run_id, LoopState::CallingBackend);
            let request = BackendRequest {
                messages,
                system_prompt: state.system_prompt().map(str::to_string),
                tools: self
                    .registry
                    .has_any()
                    .then(|| self.registry.all_definitions()),
                settings: state.generation_settings(),
            };
            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
                response = backend.complete(&request) => response,
            };
            let response = match completion {
                Ok(response) => response,
                Err(EngineError::Cancelled) => {
                    return failed_result(emitter, state, EngineError::Cancelled);
                }
                Err(err) => {
                    self.hooks.error(&err.to_string(), err.is_retryable());
                    return failed_result(emitter, state, err);
                }
            };

            trace_state(run_id, LoopState::StoringResponse);
            let stop_reason = response.stop_reason;
            let turn_usage = response.usage;
            let assistant = AgentMessage::Llm(response.into_message(origin.clone()));
            let calls: Vec<ToolCall> = assistant
                .as_llm()
                .map(|msg| msg.tool_calls().into_iter().cloned().collect())
                .unwrap_or_default();
            if let Err(err) = state.append(assistant.clone()) {
                return failed_result(emitter, state, err);
            }
            state.advance_turn();
            state.add_usage(&turn_usage);
            self.hooks.message(&assistant);
            emitter.emit(LoopEventPayload::TurnEnd {
                turn,
                stop_reason,
                usage: turn_usage,
                model: origin.model.clone(),
                provider: origin.provider.clone(),
            });

            trace_state(run_id, LoopState::EvaluatingContinuation);
            let info = TurnEndInfo {
                turn,
                usage: turn_usage,
                model: origin.model,
                provider: origin.provider,
            };
            match self.hooks.turn_end(info).await {
                Ok(true) => {}
                Ok(false) => return done_result(emitter, state, DoneReason::StoppedByHook),
                Err(err) => {
                    let err = match err {
                        EngineError::HookFailure { .. } => err,
                        other => EngineError::hook("on_turn_end", other.to_string()),
                    };
                    return failed_result(emitter, state, err);
                }
            }

            if calls.is_empty() {
                trace_state(run_id, LoopState::CheckingFollowUp);
                match self.inject_steering(run_id, state) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => return failed_result(emitter, state, err),
                }
                let follow_ups = state.drain_follow_up();
                if follow_ups.is_empty() {
                    return done_result(emitter, state, DoneReason::Completed);
                }
                if debug_enabled() {
                    tracing::debug!(run_id = %run_id, count = follow_ups.len(), "follow-up injected");
                }
                if let Err(err) = append_all(state, follow_ups) {
                    return failed_result(emitter, state, err);
                }
                continue;
            }

            match self.run_tool_batch(state, &mut emitter, &calls, turn).await {
                Ok(BatchOutcome::Completed | BatchOutcome::Steered) => {}
                Ok(BatchOutcome::AwaitingRemote(calls)) => {
                    return awaiting_remote_result(emitter, state, turn, calls);
                }
                Err(err) => return failed_result(emitter, state, err),
            }
        }
    }

    async fn build_context(&self, state: &ConversationState) -> Result<Vec<crate::types::Message>> {
        let messages = state.llm_messages();
        let Some(transform) = &self.transform else {
            return Ok(messages);
        };
        let transformed = transform.transform(messages).await.map_err(|err| match err {
            EngineError::ContextTransform(_) => err,
            other => EngineError::ContextTransform(other.to_string()),
        })?;
        check_tool_pairing(&transformed)?;
        Ok(transformed)
    }

    /// Execute `calls` in order, checking steering between invocations.
    async fn run_tool_batch(
        &self,
        state: &mut ConversationState,
        emitter: &mut LoopEventEmitter,
        calls: &[ToolCall],
        turn: usize,
    ) -> Result<BatchOutcome> {
        trace_state(emitter.run_id(), LoopState::DispatchingTools);
        for (idx, call) in calls.iter().enumerate() {
            if idx > 0 {
                trace_state(emitter.run_id(), LoopState::DrainingSteering);
                let steering = state.drain_steering();
                if !steering.is_empty() {
                    let skipped = &calls[idx..];
                    for call in skipped {
                        append_skipped_tool_call(state, &self.hooks, call)?;
                    }
                    emitter.emit(LoopEventPayload::SteeringInterrupt {
                        turn,
                        skipped_tools: skipped.iter().map(|c| c.name.clone()).collect(),
                        skipped_call_ids: skipped.iter().map(|c| c.id.clone()).collect(),
                        injected: steering.len(),
                    });
                    append_all(state, steering)?;
                    return Ok(BatchOutcome::Steered);
                }
            }

            if self.registry.classify(&call.name) == ToolClass::Remote {
                return Ok(BatchOutcome::AwaitingRemote(remote_group(
                    &self.registry,
                    calls,
                    idx,
                )));
            }

            let started = Instant::now();
            let (result, is_error) = match self.registry.dispatch_call(call, turn).await {
                Ok(value) => (value, false),
                Err(err) => {
                    if debug_enabled() {
                        tracing::debug!(tool = %call.name, error = %err, "tool call failed");
                    }
                    (error_value(&err), true)
                }
            };
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            append_tool_result(state, &self.hooks, call, result, is_error)?;
            emitter.emit(LoopEventPayload::ToolExecuted {
                turn,
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                is_error,
                duration_ms,
            });
        }
        Ok(BatchOutcome::Completed)
    }

    /// Steering that arrived during the last invocation of a batch skips
    /// nothing; it simply joins the next request.
    /// Append queued steering without an interrupt. Returns whether anything
    /// was appended.
    fn inject_steering(&self, run_id: Uuid, state: &mut ConversationState) -> Result<bool> {
        let steering = state.drain_steering();
        if steering.is_empty() {
            return Ok(false);
        }
        if debug_enabled() {
            tracing::debug!(run_id = %run_id, count = steering.len(), "steering injected");
        }
        append_all(state, steering)?;
        Ok(true)
    }
}

impl std::fmt::Debug for TurnLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnLoop")
            .field("registry", &self.registry)
            .field("has_transform", &self.transform.is_some())
            .field("hooks", &self.hooks)
            .field("has_event_sink", &self.event_sink.is_some())
            .finish()
    }
}

fn append_all(state: &mut ConversationState, messages: Vec<AgentMessage>) -> Result<()> {
    for message in messages {
        state.append(message)?;
    }
    Ok(())
}

fn provider_switch(turn: usize, from: &Origin, to: &Origin) -> LoopEventPayload {
    LoopEventPayload::ProviderSwitch {
        turn,
        from_model: from.model.clone(),
        from_provider: from.provider.clone(),
        to_model: to.model.clone(),
        to_provider: to.provider.clone(),
    }
}

#[cfg(test)]
#[path = "runner/tests/mod.rs"]
mod tests;
