//! Generation settings and stop reasons.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Per-call sampling settings forwarded to the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

/// Why the backend stopped producing output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
    ContentFilter,
    Error,
}
