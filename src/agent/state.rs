//! Request-scoped conversation state.
//!
//! A [`ConversationState`] is built from persisted history at the start of a
//! request, mutated by the turn loop, and handed back to the caller to
//! persist. It owns no I/O.
//!
//! Only the two injection queues are safe to touch from outside the loop:
//! clone a [`MessageQueue`] handle with [`ConversationState::steering_handle`]
//! or [`ConversationState::follow_up_handle`] and enqueue from any task or
//! thread while the loop runs.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::message::{Message, Role, ToolCall};
use crate::types::{GenerationSettings, Usage};

use super::message::{convert_to_llm, AgentMessage, MessageRecord};

/// Queue drain behavior for steering/follow-up messages.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueDrainMode {
    /// Drain everything queued.
    #[default]
    All,
    /// Drain only the oldest queued message.
    OneAtATime,
}

/// FIFO of pending messages shared between the loop and outside callers.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    inner: Arc<Mutex<VecDeque<AgentMessage>>>,
    mode: QueueDrainMode,
}

impl MessageQueue {
    pub fn new(mode: QueueDrainMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            mode,
        }
    }

    pub fn mode(&self) -> QueueDrainMode {
        self.mode
    }

    pub fn push(&self, message: AgentMessage) {
        self.lock().push_back(message);
    }

    /// Atomically take queued messages in enqueue order.
    pub fn drain(&self) -> Vec<AgentMessage> {
        let mut queue = self.lock();
        match self.mode {
            QueueDrainMode::All => queue.drain(..).collect(),
            QueueDrainMode::OneAtATime => queue.pop_front().into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // Poisoning leaves the VecDeque consistent; keep serving it.
    fn lock(&self) -> MutexGuard<'_, VecDeque<AgentMessage>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Turn-scoped history, counters, usage and injection queues.
#[derive(Debug, Clone)]
pub struct ConversationState {
    system_prompt: Option<String>,
    messages: Vec<AgentMessage>,
    current_turn: usize,
    usage: Usage,
    max_turns: usize,
    max_tokens: u32,
    temperature: Option<f64>,
    steering: MessageQueue,
    follow_up: MessageQueue,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl ConversationState {
    /// Empty state with limits taken from `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            system_prompt: None,
            messages: Vec::new(),
            current_turn: 0,
            usage: Usage::default(),
            max_turns: config.max_turns,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            steering: MessageQueue::new(config.steering_mode),
            follow_up: MessageQueue::new(config.follow_up_mode),
        }
    }

    /// Rebuild state from persisted history.
    ///
    /// History goes through the same validation as [`append`](Self::append),
    /// and prior assistant usage is folded into the cumulative total.
    pub fn from_history(
        config: &EngineConfig,
        system_prompt: Option<String>,
        history: impl IntoIterator<Item = AgentMessage>,
    ) -> Result<Self> {
        let mut state = Self::new(config);
        state.system_prompt = system_prompt;
        for message in history {
            if let Some(usage) = message.as_llm().and_then(|m| m.usage) {
                state.usage.merge(&usage);
            }
            state.append(message)?;
        }
        Ok(state)
    }

    /// Rebuild state from persistence records.
    pub fn from_records(
        config: &EngineConfig,
        system_prompt: Option<String>,
        records: &[MessageRecord],
    ) -> Result<Self> {
        let history = records
            .iter()
            .map(AgentMessage::from_record)
            .collect::<Result<Vec<_>>>()?;
        Self::from_history(config, system_prompt, history)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Restore the turn counter of a conversation resumed from storage.
    pub fn with_current_turn(mut self, turn: usize) -> Self {
        self.current_turn = self.current_turn.max(turn);
        self
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Append a message to history.
    ///
    /// Rejects assistant messages without an origin, tool results whose id
    /// does not match an earlier tool invocation, and a second result for the
    /// same invocation.
    pub fn append(&mut self, message: AgentMessage) -> Result<()> {
        if let AgentMessage::Llm(msg) = &message {
            if msg.role == Role::Assistant && msg.origin.is_none() {
                return Err(EngineError::InvalidState(
                    "assistant message appended without (model, provider) origin".into(),
                ));
            }
            let results = msg.tool_results();
            if !results.is_empty() {
                let known = self.invocation_ids();
                if let Some(orphan) = results.iter().find(|r| !known.contains(r.tool_call_id.as_str())) {
                    return Err(EngineError::OrphanToolResult {
                        tool_call_id: orphan.tool_call_id.clone(),
                    });
                }
                let mut answered = self.result_ids();
                if let Some(dup) = results.iter().find(|r| !answered.insert(r.tool_call_id.as_str())) {
                    return Err(EngineError::DuplicateToolResult {
                        tool_call_id: dup.tool_call_id.clone(),
                    });
                }
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Record the result of a tool invocation the caller executed.
    pub fn submit_tool_result(
        &mut self,
        tool_call_id: impl Into<String>,
        result: serde_json::Value,
        is_error: bool,
    ) -> Result<()> {
        self.append(AgentMessage::Llm(Message::tool_result(
            tool_call_id,
            result,
            is_error,
        )))
    }

    pub fn add_usage(&mut self, delta: &Usage) {
        self.usage.merge(delta);
    }

    /// Count one completed backend round.
    pub(crate) fn advance_turn(&mut self) -> usize {
        self.current_turn += 1;
        self.current_turn
    }

    pub fn enqueue_steering(&self, message: AgentMessage) {
        self.steering.push(message);
    }

    pub fn enqueue_follow_up(&self, message: AgentMessage) {
        self.follow_up.push(message);
    }

    pub fn drain_steering(&self) -> Vec<AgentMessage> {
        self.steering.drain()
    }

    pub fn drain_follow_up(&self) -> Vec<AgentMessage> {
        self.follow_up.drain()
    }

    pub fn steering_handle(&self) -> MessageQueue {
        self.steering.clone()
    }

    pub fn follow_up_handle(&self) -> MessageQueue {
        self.follow_up.clone()
    }

    /// Backend-facing projection of the whole history.
    pub fn llm_messages(&self) -> Vec<Message> {
        convert_to_llm(&self.messages)
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .filter_map(AgentMessage::as_llm)
            .find(|m| m.role == Role::Assistant)
    }

    pub fn last_assistant_text(&self) -> String {
        self.last_assistant().map(Message::text).unwrap_or_default()
    }

    /// Invocations of the latest assistant message that have no result yet.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let Some(last_assistant_idx) = self.messages.iter().rposition(|m| {
            m.as_llm().is_some_and(|msg| msg.role == Role::Assistant)
        }) else {
            return Vec::new();
        };
        let resolved: HashSet<&str> = self.messages[last_assistant_idx + 1..]
            .iter()
            .filter_map(AgentMessage::as_llm)
            .flat_map(|msg| msg.tool_results())
            .map(|r| r.tool_call_id.as_str())
            .collect();
        self.messages[last_assistant_idx]
            .as_llm()
            .map(|msg| {
                msg.tool_calls()
                    .into_iter()
                    .filter(|call| !resolved.contains(call.id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn result_ids(&self) -> HashSet<&str> {
        self.messages
            .iter()
            .filter_map(AgentMessage::as_llm)
            .flat_map(|msg| msg.tool_results())
            .map(|r| r.tool_call_id.as_str())
            .collect()
    }

    fn invocation_ids(&self) -> HashSet<&str> {
        self.messages
            .iter()
            .filter_map(AgentMessage::as_llm)
            .flat_map(|msg| msg.tool_calls())
            .map(|call| call.id.as_str())
            .collect()
    }
}
