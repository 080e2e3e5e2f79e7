//! Axum HTTP server for the MCP SSE gateway.
//!
//! `GET /sse` opens a session channel, `POST /messages?sessionId=` feeds it,
//! and `GET /health` reports how many channels are open.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ServerError, SessionError};
use crate::gateway::auth::{AuthState, require_token};
use crate::gateway::registry::{CloseGuard, SessionRegistry};
use crate::gateway::session::{InboundMessage, MessageOverrides, SessionContext, SessionHandler};

/// Caller account id, captured on channel open and optionally per message.
pub const ACCOUNT_ID_HEADER: &str = "x-hedera-account-id";
/// Per-request custodial mode (`true`/`false`).
pub const CUSTODIAL_MODE_HEADER: &str = "x-custodial-mode";

const OUTBOUND_CAPACITY: usize = 64;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared state for all gateway handlers.
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    /// Produces replies for every session opened through this gateway.
    pub handler: Arc<dyn SessionHandler>,
    pub auth: AuthState,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

impl GatewayState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        handler: Arc<dyn SessionHandler>,
        auth: AuthState,
    ) -> Self {
        Self {
            registry,
            handler,
            auth,
            shutdown_tx: tokio::sync::RwLock::new(None),
        }
    }

    /// Stop accepting connections; open streams end as the server drains.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
) -> Result<SocketAddr, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::StartupFailed {
            name: "gateway".to_string(),
            reason: format!("Failed to bind to {}: {}", addr, e),
        })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ServerError::StartupFailed {
            name: "gateway".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = router(Arc::clone(&state));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("MCP gateway shutting down");
            })
            .await
        {
            tracing::error!("MCP gateway server error: {}", e);
        }
    });

    tracing::info!(addr = %bound_addr, "MCP gateway listening (SSE at /sse)");
    Ok(bound_addr)
}

fn router(state: Arc<GatewayState>) -> Router {
    // The token gate only guards channel open; side-channel posts are bound
    // to an unguessable session id instead.
    let channel_open = Router::new()
        .route("/sse", get(sse_handler))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            require_token,
        ));

    let public = Router::new()
        .route("/messages", post(messages_handler))
        .route("/health", get(health_handler));

    // MCP clients are not browsers, so there is no origin to pin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .merge(channel_open)
        .merge(public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

// --- Channel open ---

async fn sse_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let context = SessionContext {
        account_id: header_string(&headers, ACCOUNT_ID_HEADER),
        custodial_override: header_bool(&headers, CUSTODIAL_MODE_HEADER),
    };

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let session_id = state
        .registry
        .open(context, outbound_tx, Arc::clone(&state.handler));

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={session_id}"));

    // Dropping the stream (disconnect, error, shutdown) closes the session.
    let guard = CloseGuard::new(Arc::clone(&state.registry), session_id);
    let messages = ReceiverStream::new(outbound_rx).map(move |payload| {
        let _guard = &guard;
        Ok::<_, Infallible>(Event::default().event("message").data(payload))
    });

    let stream = tokio_stream::once(Ok(endpoint)).chain(messages);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

// --- Side channel ---

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn messages_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<MessagesQuery>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(session_id) = query.session_id.filter(|id| !id.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing sessionId query parameter").into_response();
    };

    let message = InboundMessage::new(body).with_overrides(MessageOverrides {
        account_id: header_string(&headers, ACCOUNT_ID_HEADER),
        custodial_override: header_bool(&headers, CUSTODIAL_MODE_HEADER),
    });

    match state.registry.dispatch(&session_id, message).await {
        Ok(_) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(SessionError::NotFound { .. }) => {
            tracing::debug!(session_id = %session_id, "Message for unknown session");
            (StatusCode::NOT_FOUND, "Session not found").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// --- Health ---

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        sessions: state.registry.len(),
    })
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn header_bool(headers: &HeaderMap, name: &str) -> Option<bool> {
    header_string(headers, name).map(|v| v.eq_ignore_ascii_case("true"))
}
