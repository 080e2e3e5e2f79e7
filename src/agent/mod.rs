//! Agent invocation: one prompt in, the first tool result of that turn out.
//!
//! Conversation memory is keyed by [`ThreadId`]. Each MCP session gets its
//! own thread, so no prompt or result is ever visible to another session.

pub mod engine;
pub mod proxy;
pub mod thread;

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;

pub use self::engine::ConversationEngine;
pub use self::thread::ThreadStore;

const SESSION_THREAD_PREFIX: &str = "mcp-session:";
const EPHEMERAL_THREAD_PREFIX: &str = "ephemeral:";

/// Conversation memory key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(String);

impl ThreadId {
    /// Deterministic thread for an MCP session: same session, same memory.
    pub fn for_session(session_id: &str) -> Self {
        Self(format!("{SESSION_THREAD_PREFIX}{session_id}"))
    }

    /// Fresh single-use thread for calls that carry no session.
    pub fn ephemeral() -> Self {
        Self(format!("{EPHEMERAL_THREAD_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_ephemeral(&self) -> bool {
        self.0.starts_with(EPHEMERAL_THREAD_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a call acts for. Passed down to every tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationContext {
    pub session_id: Option<String>,
    pub account_id: Option<String>,
    pub custodial_mode: bool,
}

/// Text of the tool-result message an invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResultPayload {
    pub tool_name: Option<String>,
    pub content: String,
}

#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Run one turn on `thread` and return its first tool result.
    ///
    /// Fails with [`EngineError::NoToolResult`] when the turn called no tool.
    async fn invoke(
        &self,
        prompt: &str,
        thread: &ThreadId,
        ctx: &InvocationContext,
    ) -> Result<ToolResultPayload, EngineError>;
}
