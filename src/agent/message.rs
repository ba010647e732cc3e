//! Engine-facing message model and its projections.
//!
//! The loop stores [`AgentMessage`] values. Only the `Llm` and `Summary`
//! variants reach the backend; the rest are application records that ride
//! along in history for the caller's benefit. Conversions never mutate the
//! source message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{EngineError, Result};
use crate::types::message::{ContentBlock, Message, Origin, Role};

const SUMMARY_PREFIX: &str = "<summary>";
const SUMMARY_SUFFIX: &str = "</summary>";

// ---------------------------------------------------------------------------
// Message superset
// ---------------------------------------------------------------------------

/// Default message type for the loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Standard backend message (user, assistant, tool result).
    Llm(Message),
    /// Injected guidance, e.g. "switched to standard queue".
    ContextNote {
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// User-visible, non-conversational notice such as a rate-limit warning.
    SystemEvent {
        text: String,
        #[serde(default)]
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    /// Internal execution record.
    ToolLog {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    /// Compressed-history stand-in; sent to the backend as a user message.
    Summary {
        text: String,
        timestamp: DateTime<Utc>,
    },
}

/// Kind tag used for routing and persistence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    Llm,
    ContextNote,
    SystemEvent,
    ToolLog,
    Summary,
}

impl AgentMessage {
    /// Shorthand: a user text message.
    pub fn user(text: impl Into<String>) -> Self {
        AgentMessage::Llm(Message::user(text))
    }

    pub fn context_note(text: impl Into<String>) -> Self {
        AgentMessage::ContextNote {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system_event(text: impl Into<String>, data: serde_json::Value) -> Self {
        AgentMessage::SystemEvent {
            text: text.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_log(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        AgentMessage::ToolLog {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn summary(text: impl Into<String>) -> Self {
        AgentMessage::Summary {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            AgentMessage::Llm(_) => MessageKind::Llm,
            AgentMessage::ContextNote { .. } => MessageKind::ContextNote,
            AgentMessage::SystemEvent { .. } => MessageKind::SystemEvent,
            AgentMessage::ToolLog { .. } => MessageKind::ToolLog,
            AgentMessage::Summary { .. } => MessageKind::Summary,
        }
    }

    /// The wrapped backend message, if this is one.
    pub fn as_llm(&self) -> Option<&Message> {
        match self {
            AgentMessage::Llm(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            AgentMessage::Llm(msg) => msg.timestamp,
            AgentMessage::ContextNote { timestamp, .. }
            | AgentMessage::SystemEvent { timestamp, .. }
            | AgentMessage::ToolLog { timestamp, .. }
            | AgentMessage::Summary { timestamp, .. } => Some(*timestamp),
        }
    }

    /// Project into the backend subset.
    ///
    /// Context notes, system events and tool logs yield `None`; a summary is
    /// rendered as a user message.
    pub fn to_llm(&self) -> Option<Message> {
        match self {
            AgentMessage::Llm(msg) => Some(msg.clone()),
            AgentMessage::Summary { text, timestamp } => {
                let mut msg = Message::user(format!("{SUMMARY_PREFIX}\n{text}\n{SUMMARY_SUFFIX}"));
                msg.timestamp = Some(*timestamp);
                Some(msg)
            }
            _ => None,
        }
    }

    /// Project into the persistence schema.
    pub fn to_record(&self) -> Result<MessageRecord> {
        let (role, origin) = match self {
            AgentMessage::Llm(msg) => (Some(msg.role), msg.origin.clone()),
            _ => (None, None),
        };
        Ok(MessageRecord {
            kind: self.kind(),
            role,
            model: origin.as_ref().map(|o| o.model.clone()),
            provider: origin.map(|o| o.provider),
            body: serde_json::to_value(self)?,
            created_at: self.timestamp().unwrap_or_else(Utc::now),
        })
    }

    /// Rebuild a message from a persisted record.
    pub fn from_record(record: &MessageRecord) -> Result<Self> {
        let message: AgentMessage = serde_json::from_value(record.body.clone())?;
        if message.kind() != record.kind {
            return Err(EngineError::InvalidState(format!(
                "record kind '{}' does not match body kind '{}'",
                record.kind,
                message.kind()
            )));
        }
        Ok(message)
    }
}

impl From<Message> for AgentMessage {
    fn from(msg: Message) -> Self {
        AgentMessage::Llm(msg)
    }
}

// ---------------------------------------------------------------------------
// Persistence schema
// ---------------------------------------------------------------------------

/// Flat, store-friendly projection of an [`AgentMessage`].
///
/// `role`, `model` and `provider` are denormalized for querying; `body` holds
/// the full message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn origin(&self) -> Option<Origin> {
        match (&self.model, &self.provider) {
            (Some(model), Some(provider)) => Some(Origin::new(model, provider)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion helper
// ---------------------------------------------------------------------------

/// Project a history slice down to the messages the backend should see.
pub fn convert_to_llm(messages: &[AgentMessage]) -> Vec<Message> {
    messages.iter().filter_map(AgentMessage::to_llm).collect()
}

/// Text of a summary message rendered by [`AgentMessage::to_llm`], if `message` is one.
pub fn rendered_summary_text(message: &Message) -> Option<&str> {
    if message.role != Role::User {
        return None;
    }
    let [ContentBlock::Text { text }] = message.content.as_slice() else {
        return None;
    };
    text.strip_prefix(SUMMARY_PREFIX)?
        .strip_suffix(SUMMARY_SUFFIX)
        .map(str::trim)
}
