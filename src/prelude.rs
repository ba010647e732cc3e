//! Convenience re-exports for common use.

pub use crate::agent::{AgentMessage, ConversationState, MessageQueue, QueueDrainMode};
pub use crate::agent_loop::{
    ContextTransform, DoneReason, EventSink, LoopEvent, LoopEventPayload, LoopResult, LoopStatus,
    RecentWindowTransform, TurnEndInfo, TurnHooks, TurnLoop,
};
pub use crate::config::EngineConfig;
pub use crate::error::{EngineError, Result};
pub use crate::provider::{static_resolver, Backend, BackendRequest, BackendResponse, ProviderResolver};
pub use crate::tools::{AgentTool, Tool, ToolArguments, ToolDefinition, ToolParameters, ToolRegistry};
pub use crate::types::{ContentBlock, Message, Origin, Role, StopReason, ToolCall, Usage};
pub use tokio_util::sync::CancellationToken;
