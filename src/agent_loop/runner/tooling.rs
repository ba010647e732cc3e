use crate::agent::message::AgentMessage;
use crate::agent::state::ConversationState;
use crate::error::{EngineError, Result};
use crate::tools::{ToolClass, ToolRegistry};
use crate::types::message::{Message, ToolCall};

use super::super::hooks::TurnHooks;

pub(super) const SKIPPED_BY_STEERING: &str = "Skipped due to steering message";

pub(super) fn error_value(error: &EngineError) -> serde_json::Value {
    serde_json::json!({ "error": error.to_string() })
}

/// Append one tool result and notify `on_message`.
pub(super) fn append_tool_result(
    state: &mut ConversationState,
    hooks: &TurnHooks,
    call: &ToolCall,
    result: serde_json::Value,
    is_error: bool,
) -> Result<()> {
    let message = AgentMessage::Llm(Message::tool_result(call.id.clone(), result, is_error));
    state.append(message.clone())?;
    hooks.message(&message);
    Ok(())
}

/// Close out an invocation that steering preempted.
pub(super) fn append_skipped_tool_call(
    state: &mut ConversationState,
    hooks: &TurnHooks,
    call: &ToolCall,
) -> Result<()> {
    append_tool_result(
        state,
        hooks,
        call,
        serde_json::json!({ "error": SKIPPED_BY_STEERING }),
        true,
    )
}

/// The remote invocation at `start` plus the remote ones directly after it.
pub(super) fn remote_group(registry: &ToolRegistry, calls: &[ToolCall], start: usize) -> Vec<ToolCall> {
    calls[start..]
        .iter()
        .take_while(|call| registry.classify(&call.name) == ToolClass::Remote)
        .cloned()
        .collect()
}
