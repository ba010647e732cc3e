//! Error types for the turn engine.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Backend error ({provider}, status {status:?}): {message}")]
    Backend {
        provider: String,
        status: Option<u16>,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Context transform failed: {0}")]
    ContextTransform(String),

    #[error("Hook '{hook}' failed: {message}")]
    HookFailure { hook: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool '{0}' is executed remotely and has no local handler")]
    NotLocal(String),

    #[error("Tool {tool_name} failed: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tool result '{tool_call_id}' has no matching tool invocation")]
    OrphanToolResult { tool_call_id: String },

    #[error("Tool invocation '{tool_call_id}' already has a result")]
    DuplicateToolResult { tool_call_id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,
}

impl EngineError {
    /// Create a backend error with an explicit retry classification.
    pub fn backend(provider: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Backend {
            provider: provider.into(),
            status: None,
            message: message.into(),
            retryable,
        }
    }

    /// Create a backend error from an HTTP-style status code.
    ///
    /// 429 and 5xx are classified retryable; everything else is not.
    pub fn backend_status(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            provider: provider.into(),
            status: Some(status),
            message: message.into(),
            retryable: matches!(status, 429 | 500..=599),
        }
    }

    /// Create a hook failure.
    pub fn hook(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HookFailure {
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Backend {
                status, retryable, ..
            } => match status {
                Some(401 | 403) => ErrorCategory::Authentication,
                Some(429) => ErrorCategory::RateLimit,
                Some(500..=599) => ErrorCategory::Server,
                _ if *retryable => ErrorCategory::Server,
                _ => ErrorCategory::Backend,
            },
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Network(_) => ErrorCategory::Network,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::ContextTransform(_) => ErrorCategory::ContextTransform,
            Self::HookFailure { .. } => ErrorCategory::Hook,
            Self::UnknownTool(_)
            | Self::NotLocal(_)
            | Self::ToolExecution { .. }
            | Self::InvalidArgument(_) => ErrorCategory::Tool,
            Self::OrphanToolResult { .. }
            | Self::DuplicateToolResult { .. }
            | Self::InvalidState(_) => ErrorCategory::Programming,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether the caller may retry the same request.
    ///
    /// Backend errors carry the backend's own classification; `status` only
    /// feeds [`category`](Self::category).
    pub fn is_retryable(&self) -> bool {
        if let Self::Backend { retryable, .. } = self {
            return *retryable;
        }
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit | ErrorCategory::Network | ErrorCategory::Server => {
                RecoverySuggestion::RetryWithBackoff
            }
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::ContextTransform => RecoverySuggestion::ReduceInputSize,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Tool => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::Programming | ErrorCategory::Hook => RecoverySuggestion::FixCaller,
            _ => RecoverySuggestion::None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EngineError>;
