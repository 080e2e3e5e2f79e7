//! End-to-end integration tests for the MCP SSE gateway.
//!
//! These tests start a real gateway and a real agent backend on random ports,
//! wire them together through the HTTP relay, and verify:
//! - Channel open with the token gate and the `endpoint` event
//! - Side-channel posts (400 / 404 / 202)
//! - `tools/call` replies arriving on the caller's own stream
//! - Per-session conversation threads

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::time::timeout;
use url::Url;

use hedera_mcp::agent::proxy::{AgentProxyState, start_agent_proxy};
use hedera_mcp::agent::{AgentEngine, InvocationContext, ThreadId, ToolResultPayload};
use hedera_mcp::error::{EngineError, TOOL_ERROR_PREFIX};
use hedera_mcp::gateway::auth::{AuthState, MCP_AUTH_HEADER, TokenAllowList};
use hedera_mcp::gateway::{GatewayState, SessionRegistry, start_server};
use hedera_mcp::mcp::{McpHandler, ToolCallHandler};
use hedera_mcp::relay::{HttpAgentBackend, Relay};

const AUTH_TOKEN: &str = "test-mcp-token";
const PROXY_TOKEN: &str = "test-proxy-token";
const ACCOUNT_HEADER: &str = "x-hedera-account-id";
const TIMEOUT: Duration = Duration::from_secs(5);

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("failed to bind")
        || err.to_string().contains("Failed to bind")
}

/// Reports back which thread and identity each turn ran with.
struct EchoEngine;

#[async_trait]
impl AgentEngine for EchoEngine {
    async fn invoke(
        &self,
        prompt: &str,
        thread: &ThreadId,
        ctx: &InvocationContext,
    ) -> Result<ToolResultPayload, EngineError> {
        let content = json!({
            "thread": thread.as_str(),
            "prompt": prompt,
            "accountId": ctx.account_id,
            "custodial": ctx.custodial_mode,
        });
        Ok(ToolResultPayload {
            tool_name: Some("echo".to_string()),
            content: content.to_string(),
        })
    }
}

async fn start_backend() -> Option<SocketAddr> {
    let state = Arc::new(AgentProxyState::new(
        Arc::new(EchoEngine),
        TokenAllowList::parse(PROXY_TOKEN),
    ));
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    match start_agent_proxy(addr, state).await {
        Ok(bound) => Some(bound),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start agent backend: {e:?}"),
    }
}

async fn start_gateway(backend: Option<SocketAddr>) -> Option<(SocketAddr, Arc<GatewayState>)> {
    let endpoint = backend.map(|addr| {
        Url::parse(&format!("http://{addr}/interact-with-hedera")).expect("backend url")
    });
    let relay = Relay::new(
        endpoint,
        Some(SecretString::from(PROXY_TOKEN)),
        Arc::new(HttpAgentBackend::new(TIMEOUT).expect("http backend")),
    );
    let tool_calls = Arc::new(ToolCallHandler::new(Arc::new(relay), false, false));

    let state = Arc::new(GatewayState::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(McpHandler::new(tool_calls)),
        AuthState {
            header: MCP_AUTH_HEADER,
            allow_list: Arc::new(TokenAllowList::parse(AUTH_TOKEN)),
            bypass: false,
        },
    ));

    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    match start_server(addr, Arc::clone(&state)).await {
        Ok(bound) => Some((bound, state)),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start gateway: {e:?}"),
    }
}

async fn start_stack() -> Option<(SocketAddr, Arc<GatewayState>)> {
    let backend = start_backend().await?;
    start_gateway(Some(backend)).await
}

/// Minimal SSE reader over a streaming reqwest response.
struct SseStream {
    response: reqwest::Response,
    buffer: String,
}

#[derive(Debug)]
struct SseEvent {
    event: String,
    data: String,
}

impl SseStream {
    async fn open(addr: SocketAddr, account_id: Option<&str>) -> Self {
        let mut request = reqwest::Client::new()
            .get(format!("http://{addr}/sse"))
            .header(MCP_AUTH_HEADER, AUTH_TOKEN);
        if let Some(account_id) = account_id {
            request = request.header(ACCOUNT_HEADER, account_id);
        }
        let response = request.send().await.expect("open channel");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        Self {
            response,
            buffer: String::new(),
        }
    }

    async fn next_event(&mut self) -> SseEvent {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let mut event = String::from("message");
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(rest) = line.strip_prefix("event:") {
                        event = rest.trim().to_string();
                    } else if let Some(rest) = line.strip_prefix("data:") {
                        data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                    }
                }
                // Keep-alive comments carry no data.
                if data.is_empty() {
                    continue;
                }
                return SseEvent {
                    event,
                    data: data.join("\n"),
                };
            }

            let chunk = timeout(TIMEOUT, self.response.chunk())
                .await
                .expect("Timed out waiting for SSE event")
                .expect("SSE stream error")
                .expect("SSE stream ended");
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Read the `endpoint` event and return the side-channel path.
    async fn endpoint(&mut self) -> String {
        let event = self.next_event().await;
        assert_eq!(event.event, "endpoint");
        event.data
    }

    async fn next_message(&mut self) -> Value {
        let event = self.next_event().await;
        assert_eq!(event.event, "message");
        serde_json::from_str(&event.data).expect("JSON-RPC message")
    }
}

async fn post(addr: SocketAddr, path: &str, body: Value) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .json(&body)
        .send()
        .await
        .expect("post message")
        .status()
}

fn tool_call(id: u64, prompt: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {
            "name": "interact-with-hedera",
            "arguments": { "fullPrompt": prompt }
        }
    })
}

async fn session_count(addr: SocketAddr) -> u64 {
    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("health")
        .json()
        .await
        .expect("health json");
    health["sessions"].as_u64().expect("sessions")
}

fn session_id_of(endpoint: &str) -> &str {
    endpoint
        .strip_prefix("/messages?sessionId=")
        .expect("endpoint path")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn channel_open_emits_endpoint_event() {
    let Some((addr, state)) = start_stack().await else {
        return;
    };

    let mut sse = SseStream::open(addr, Some("0.0.1234")).await;
    let endpoint = sse.endpoint().await;

    let session_id = session_id_of(&endpoint);
    assert!(!session_id.is_empty());
    assert!(state.registry.contains(session_id));
    assert_eq!(session_count(addr).await, 1);
}

#[tokio::test]
async fn channel_open_without_token_is_rejected() {
    let Some((addr, state)) = start_stack().await else {
        return;
    };

    let response = reqwest::get(format!("http://{addr}/sse"))
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/sse"))
        .header(MCP_AUTH_HEADER, "wrong-token")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn side_channel_status_codes() {
    let Some((addr, _state)) = start_stack().await else {
        return;
    };
    let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});

    assert_eq!(
        post(addr, "/messages", ping.clone()).await,
        reqwest::StatusCode::BAD_REQUEST
    );
    assert_eq!(
        post(addr, "/messages?sessionId=unknown", ping.clone()).await,
        reqwest::StatusCode::NOT_FOUND
    );

    let mut sse = SseStream::open(addr, Some("0.0.1234")).await;
    let endpoint = sse.endpoint().await;
    assert_eq!(post(addr, &endpoint, ping).await, reqwest::StatusCode::ACCEPTED);

    let reply = sse.next_message().await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn tool_call_round_trip_through_relay() {
    let Some((addr, _state)) = start_stack().await else {
        return;
    };
    let mut sse = SseStream::open(addr, Some("0.0.1234")).await;
    let endpoint = sse.endpoint().await;
    let session_id = session_id_of(&endpoint).to_string();

    let init = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {"protocolVersion": "2024-11-05", "capabilities": {}}
    });
    assert_eq!(post(addr, &endpoint, init).await, reqwest::StatusCode::ACCEPTED);
    let reply = sse.next_message().await;
    assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");

    let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
    assert_eq!(post(addr, &endpoint, list).await, reqwest::StatusCode::ACCEPTED);
    let reply = sse.next_message().await;
    assert_eq!(reply["result"]["tools"][0]["name"], "interact-with-hedera");

    assert_eq!(
        post(addr, &endpoint, tool_call(3, "What is my balance?")).await,
        reqwest::StatusCode::ACCEPTED
    );
    let reply = sse.next_message().await;
    assert_eq!(reply["id"], 3);
    assert!(reply["result"].get("isError").is_none());

    let text = reply["result"]["content"][0]["text"]
        .as_str()
        .expect("text content");
    let echoed: Value = serde_json::from_str(text).expect("echoed JSON");
    assert_eq!(echoed["thread"], format!("mcp-session:{session_id}"));
    assert_eq!(echoed["prompt"], "What is my balance?");
    assert_eq!(echoed["accountId"], "0.0.1234");
    assert_eq!(echoed["custodial"], false);

    post(addr, &endpoint, tool_call(4, "And now?")).await;
    let reply = sse.next_message().await;
    let text = reply["result"]["content"][0]["text"]
        .as_str()
        .expect("text content");
    let second: Value = serde_json::from_str(text).expect("echoed JSON");
    assert_eq!(second["thread"], echoed["thread"]);
}

#[tokio::test]
async fn concurrent_sessions_get_their_own_threads() {
    let Some((addr, _state)) = start_stack().await else {
        return;
    };
    let mut alice = SseStream::open(addr, Some("0.0.1001")).await;
    let mut bob = SseStream::open(addr, Some("0.0.2002")).await;
    let alice_endpoint = alice.endpoint().await;
    let bob_endpoint = bob.endpoint().await;
    assert_ne!(alice_endpoint, bob_endpoint);

    post(addr, &alice_endpoint, tool_call(1, "alice prompt")).await;
    post(addr, &bob_endpoint, tool_call(1, "bob prompt")).await;

    for (sse, endpoint, account, prompt) in [
        (&mut alice, &alice_endpoint, "0.0.1001", "alice prompt"),
        (&mut bob, &bob_endpoint, "0.0.2002", "bob prompt"),
    ] {
        let reply = sse.next_message().await;
        let text = reply["result"]["content"][0]["text"]
            .as_str()
            .expect("text content");
        let echoed: Value = serde_json::from_str(text).expect("echoed JSON");
        assert_eq!(
            echoed["thread"],
            format!("mcp-session:{}", session_id_of(endpoint))
        );
        assert_eq!(echoed["accountId"], account);
        assert_eq!(echoed["prompt"], prompt);
    }
}

#[tokio::test]
async fn missing_account_is_reported_in_band() {
    let Some((addr, _state)) = start_stack().await else {
        return;
    };
    let mut sse = SseStream::open(addr, None).await;
    let endpoint = sse.endpoint().await;

    post(addr, &endpoint, tool_call(7, "send 1 hbar")).await;
    let reply = sse.next_message().await;

    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["isError"], true);
    let text = reply["result"]["content"][0]["text"]
        .as_str()
        .expect("text content");
    assert!(text.starts_with(TOOL_ERROR_PREFIX), "{text}");
}

#[tokio::test]
async fn unconfigured_relay_surfaces_configuration_message() {
    let Some((addr, _state)) = start_gateway(None).await else {
        return;
    };
    let mut sse = SseStream::open(addr, Some("0.0.1234")).await;
    let endpoint = sse.endpoint().await;

    post(addr, &endpoint, tool_call(1, "hello")).await;
    let reply = sse.next_message().await;

    assert_eq!(reply["result"]["isError"], true);
    assert_eq!(
        reply["result"]["content"][0]["text"],
        "API_URL environment variable is not set."
    );
}
