//! Error classification and recovery hints.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Network,
    Timeout,
    Server,
    Backend,
    ContextTransform,
    Hook,
    Tool,
    Configuration,
    Serialization,
    Cancelled,
    Programming,
    Unknown,
}

/// Suggested recovery action for the caller.
///
/// The engine never retries on its own; this is advice attached to the
/// terminal error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    CheckCredentials,
    CheckConfiguration,
    IncreaseTimeout,
    ReduceInputSize,
    CheckToolImplementation,
    FixCaller,
    None,
}
