//! Error types for hedera-mcp.

use std::time::Duration;

/// Prefix carried by every failure rendered back to an MCP client.
///
/// Operators grep for it; clients must not branch on it.
pub const TOOL_ERROR_PREFIX: &str = "An error occurred while interacting with Hedera: ";

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// HTTP / stdio server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("No open channel for session {session_id}")]
    NotFound { session_id: String },

    #[error("Outbound stream for session {session_id} is closed")]
    OutboundClosed { session_id: String },
}

/// Failures of a single `interact-with-hedera` invocation.
///
/// Every variant is terminal: nothing here is retried, because the agent
/// call behind the relay may already have had on-chain side effects.
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session is missing accountId.")]
    MissingIdentity,

    #[error("{0}")]
    Relay(#[from] RelayError),
}

impl ToolCallError {
    /// Stable label for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::MissingIdentity => "missing_identity",
            Self::Relay(err) => err.code(),
        }
    }

    /// Render into the single text channel a tool result can carry.
    pub fn render(&self) -> String {
        match self {
            // The configuration message is surfaced verbatim.
            Self::Relay(RelayError::NotConfigured) => RelayError::NotConfigured.to_string(),
            other => format!("{TOOL_ERROR_PREFIX}{other}"),
        }
    }
}

/// Outcomes of the outbound call to the agent backend that are not a result.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("API_URL environment variable is not set.")]
    NotConfigured,

    #[error("API request failed with status {status}: {body}")]
    BackendStatus { status: u16, body: String },

    #[error("{0}")]
    BackendRejected(String),

    #[error("{0}")]
    Transport(String),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::BackendStatus { .. } | Self::BackendRejected(_) => "backend_failure",
            Self::Transport(_) => "transport_failure",
        }
    }
}

/// Agent invocation engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No tool response found")]
    NoToolResult,

    #[error("Agent turn exceeded {max} iterations without finishing")]
    IterationLimit { max: usize },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Chain tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}
