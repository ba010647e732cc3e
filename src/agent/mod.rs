//! Conversation model: the message superset and the request-scoped state.

pub mod message;
pub mod state;

pub use message::{convert_to_llm, AgentMessage, MessageKind, MessageRecord};
pub use state::{ConversationState, MessageQueue, QueueDrainMode};
