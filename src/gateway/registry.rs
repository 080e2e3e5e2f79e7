//! In-memory registry of open duplex channels, keyed by session id.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::gateway::session::{
    ErrorHook, InboundMessage, SessionContext, SessionHandler, SessionId, SessionInfo,
    default_error_hook, run_worker,
};

const INBOUND_CAPACITY: usize = 32;

/// Acknowledgement that a payload was queued on a session's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

/// Registry-side handle of one open channel.
pub struct SessionHandle {
    info: Arc<SessionInfo>,
    inbound: mpsc::Sender<InboundMessage>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.info.id
    }

    pub fn context(&self) -> &SessionContext {
        &self.info.context
    }
}

/// Thread-safe registry of open sessions.
///
/// Its size always equals the number of open duplex channels: entries are
/// inserted by [`open`](Self::open) and removed by [`close`](Self::close),
/// which transports call when the underlying stream goes away.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle>>>,
    error_hook: ErrorHook,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            error_hook: default_error_hook(),
        }
    }

    /// Replace the callback invoked on outbound transport failures.
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = hook;
        self
    }

    /// Register a new channel and start its worker.
    ///
    /// Replies produced by `handler` are written to `outbound`, which is the
    /// transport side of the channel (an SSE stream or a stdio writer).
    pub fn open(
        &self,
        context: SessionContext,
        outbound: mpsc::Sender<String>,
        handler: Arc<dyn SessionHandler>,
    ) -> SessionId {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let info = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let mut id = SessionId::generate();
            while sessions.contains_key(&id) {
                id = SessionId::generate();
            }
            let info = Arc::new(SessionInfo {
                id: id.clone(),
                created_at: Utc::now(),
                context,
            });
            sessions.insert(
                id,
                Arc::new(SessionHandle {
                    info: Arc::clone(&info),
                    inbound: inbound_tx,
                }),
            );
            info
        };

        info!(
            session_id = %info.id,
            account_id = info.context.account_id.as_deref().unwrap_or("-"),
            "Session opened"
        );

        let id = info.id.clone();
        tokio::spawn(run_worker(
            info,
            inbound_rx,
            outbound,
            handler,
            Arc::clone(&self.error_hook),
        ));
        id
    }

    /// Queue `message` on the session's channel.
    ///
    /// The registry lock is released before the write, so a slow session
    /// never stalls lookups or inserts for the others.
    pub async fn dispatch(
        &self,
        session_id: &str,
        message: InboundMessage,
    ) -> Result<Ack, SessionError> {
        let sender = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            sessions.get(session_id).map(|handle| handle.inbound.clone())
        };

        let not_found = || SessionError::NotFound {
            session_id: session_id.to_string(),
        };

        let sender = sender.ok_or_else(not_found)?;
        sender.send(message).await.map_err(|_| not_found())?;
        Ok(Ack)
    }

    /// Remove the session. Closing an unknown id is a no-op.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);

        match removed {
            Some(handle) => {
                let open_for = Utc::now() - handle.info.created_at;
                info!(
                    session_id = %session_id,
                    open_secs = open_for.num_seconds(),
                    "Session closed"
                );
                true
            }
            None => {
                debug!(session_id = %session_id, "Close for unknown session ignored");
                false
            }
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Closes a session when dropped.
///
/// Transports embed one in the outbound stream so that a peer disconnect,
/// an error, or shutdown all end in exactly one registry removal.
pub struct CloseGuard {
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
}

impl CloseGuard {
    pub fn new(registry: Arc<SessionRegistry>, session_id: SessionId) -> Self {
        Self {
            registry,
            session_id,
        }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.registry.close(self.session_id.as_str());
    }
}
