//! Agent backend HTTP server: the endpoint the relay posts to.
//!
//! `POST /interact-with-hedera` runs one agent turn and answers with a
//! [`ResponseEnvelope`]. Only the token check answers with a non-200 status.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::agent::{AgentEngine, InvocationContext, ThreadId};
use crate::error::ServerError;
use crate::gateway::auth::{TokenAllowList, authorize};
use crate::relay::{CUSTODIAL_MODE_HEADER, PROXY_TOKEN_HEADER, ResponseEnvelope};

const UNAUTHORIZED_MESSAGE: &str =
    "Unauthorized: Invalid or missing X-LANGCHAIN-PROXY-TOKEN header";

/// Shared state for the agent backend handlers.
pub struct AgentProxyState {
    pub engine: Arc<dyn AgentEngine>,
    /// Accepted proxy tokens; empty rejects every request.
    pub tokens: TokenAllowList,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

impl AgentProxyState {
    pub fn new(engine: Arc<dyn AgentEngine>, tokens: TokenAllowList) -> Self {
        Self {
            engine,
            tokens,
            shutdown_tx: tokio::sync::RwLock::new(None),
        }
    }

    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InteractRequest {
    full_prompt: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
}

/// Start the agent backend HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_agent_proxy(
    addr: SocketAddr,
    state: Arc<AgentProxyState>,
) -> Result<SocketAddr, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::StartupFailed {
            name: "agent-proxy".to_string(),
            reason: format!("Failed to bind to {}: {}", addr, e),
        })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ServerError::StartupFailed {
            name: "agent-proxy".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let app = Router::new()
        .route("/interact-with-hedera", post(interact_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(Arc::clone(&state));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Agent backend shutting down");
            })
            .await
        {
            tracing::error!("Agent backend server error: {}", e);
        }
    });

    tracing::info!(addr = %bound_addr, "Agent backend listening");
    Ok(bound_addr)
}

async fn interact_handler(
    State(state): State<Arc<AgentProxyState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let presented = headers
        .get(PROXY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if !authorize(presented, &state.tokens, false).is_authorized() {
        tracing::warn!(
            token_present = presented.is_some(),
            "Rejected agent request with invalid or missing proxy token"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(ResponseEnvelope::failure(UNAUTHORIZED_MESSAGE)),
        )
            .into_response();
    }

    Json(run_interaction(&state, &headers, &body).await).into_response()
}

async fn run_interaction(
    state: &AgentProxyState,
    headers: &HeaderMap,
    body: &str,
) -> ResponseEnvelope {
    let request = match parse_request(body) {
        Ok(request) => request,
        Err(message) => return ResponseEnvelope::failure(message),
    };

    let custodial_mode = headers
        .get(CUSTODIAL_MODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "true");

    let thread = request
        .session_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map(ThreadId::for_session)
        .unwrap_or_else(ThreadId::ephemeral);

    let ctx = InvocationContext {
        session_id: request.session_id,
        account_id: request.account_id,
        custodial_mode,
    };

    tracing::info!(
        thread = %thread,
        custodial = custodial_mode,
        account_id = ctx.account_id.as_deref().unwrap_or("-"),
        "Agent request received"
    );

    match state.engine.invoke(&request.full_prompt, &thread, &ctx).await {
        Ok(payload) => ResponseEnvelope::success(
            serde_json::from_str(&payload.content).unwrap_or(Value::String(payload.content)),
        ),
        Err(e) => ResponseEnvelope::failure(e.to_string()),
    }
}

fn parse_request(body: &str) -> Result<InteractRequest, String> {
    let request: InteractRequest =
        serde_json::from_str(body).map_err(|e| format!("Invalid request body: {e}"))?;
    if request.full_prompt.trim().is_empty() {
        return Err("Invalid request body: fullPrompt must be a non-empty string".to_string());
    }
    Ok(request)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
