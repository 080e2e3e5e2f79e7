//! Per-session state and the worker that serializes a session's requests.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SessionError;

/// Server-assigned session identifier (UUID v4, 128 random bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Caller identity captured when the channel was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub account_id: Option<String>,
    pub custodial_override: Option<bool>,
}

/// Immutable facts about an open session, shared with its worker.
#[derive(Debug)]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub context: SessionContext,
}

/// Per-message caller context that overlays the session's own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOverrides {
    pub account_id: Option<String>,
    pub custodial_override: Option<bool>,
}

/// One client-to-server message routed to a session.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub body: String,
    pub overrides: MessageOverrides,
}

impl InboundMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            overrides: MessageOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: MessageOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Produces the reply for one inbound message.
///
/// `None` means the message needs no reply (JSON-RPC notifications).
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn handle(&self, session: &SessionInfo, message: InboundMessage) -> Option<String>;

    /// Whether `message` must wait for the messages queued before it.
    ///
    /// Unordered messages are answered on their own task, so they never sit
    /// behind a slow ordered one.
    fn is_ordered(&self, _message: &InboundMessage) -> bool {
        true
    }
}

/// Callback for failures writing to a session's outbound stream.
pub type ErrorHook = Arc<dyn Fn(&SessionId, &SessionError) + Send + Sync>;

pub(crate) fn default_error_hook() -> ErrorHook {
    Arc::new(|session_id, error| {
        tracing::debug!(session_id = %session_id, error = %error, "Session transport error");
    })
}

/// Drain `inbound` until the channel closes.
///
/// Ordered messages are handled one at a time, which is what guarantees that
/// a client's tool calls reach the agent in submission order. Unordered ones
/// are spawned and may overtake them.
pub(crate) async fn run_worker(
    info: Arc<SessionInfo>,
    mut inbound: mpsc::Receiver<InboundMessage>,
    outbound: mpsc::Sender<String>,
    handler: Arc<dyn SessionHandler>,
    error_hook: ErrorHook,
) {
    tracing::debug!(session_id = %info.id, "Session worker started");

    while let Some(message) = inbound.recv().await {
        if !handler.is_ordered(&message) {
            let info = Arc::clone(&info);
            let handler = Arc::clone(&handler);
            let outbound = outbound.clone();
            let error_hook = Arc::clone(&error_hook);
            tokio::spawn(async move {
                if let Some(reply) = handler.handle(&info, message).await {
                    deliver(&info, &outbound, reply, &error_hook).await;
                }
            });
            continue;
        }

        let Some(reply) = handler.handle(&info, message).await else {
            continue;
        };
        if !deliver(&info, &outbound, reply, &error_hook).await {
            break;
        }
    }

    tracing::debug!(session_id = %info.id, "Session worker stopped");
}

/// Write one reply; `false` once the peer is gone.
async fn deliver(
    info: &SessionInfo,
    outbound: &mpsc::Sender<String>,
    reply: String,
    error_hook: &ErrorHook,
) -> bool {
    if outbound.send(reply).await.is_ok() {
        return true;
    }
    // Peer went away while the call was in flight; the result is dropped.
    error_hook(
        &info.id,
        &SessionError::OutboundClosed {
            session_id: info.id.to_string(),
        },
    );
    false
}
