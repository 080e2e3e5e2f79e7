//! Integration tests for the agent backend HTTP server.
//!
//! A scripted engine stands in for the LLM; requests go over real HTTP.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use hedera_mcp::agent::proxy::{AgentProxyState, start_agent_proxy};
use hedera_mcp::agent::{AgentEngine, InvocationContext, ThreadId, ToolResultPayload};
use hedera_mcp::error::EngineError;
use hedera_mcp::gateway::auth::TokenAllowList;
use hedera_mcp::relay::{CUSTODIAL_MODE_HEADER, PROXY_TOKEN_HEADER};

const PROXY_TOKEN: &str = "proxy-secret";

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("failed to bind")
        || err.to_string().contains("Failed to bind")
}

/// Answers by prompt and records every call it saw.
#[derive(Default)]
struct ScriptedEngine {
    calls: Mutex<Vec<(String, ThreadId, InvocationContext)>>,
}

#[async_trait]
impl AgentEngine for ScriptedEngine {
    async fn invoke(
        &self,
        prompt: &str,
        thread: &ThreadId,
        ctx: &InvocationContext,
    ) -> Result<ToolResultPayload, EngineError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((prompt.to_string(), thread.clone(), ctx.clone()));
        let content = match prompt {
            "json" => json!({"status": "SUCCESS", "tokenId": "0.0.5005"}).to_string(),
            "plain" => "Transferred 1 HBAR".to_string(),
            _ => return Err(EngineError::NoToolResult),
        };
        Ok(ToolResultPayload {
            tool_name: Some("scripted".to_string()),
            content,
        })
    }
}

async fn start(engine: Arc<ScriptedEngine>) -> Option<SocketAddr> {
    let state = Arc::new(AgentProxyState::new(
        engine,
        TokenAllowList::parse(PROXY_TOKEN),
    ));
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    match start_agent_proxy(addr, state).await {
        Ok(bound) => Some(bound),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start agent backend: {e:?}"),
    }
}

async fn interact(
    addr: SocketAddr,
    token: Option<&str>,
    custodial: bool,
    body: &str,
) -> (reqwest::StatusCode, Value) {
    let mut request = reqwest::Client::new()
        .post(format!("http://{addr}/interact-with-hedera"))
        .header("content-type", "application/json")
        .header(CUSTODIAL_MODE_HEADER, if custodial { "true" } else { "false" })
        .body(body.to_string());
    if let Some(token) = token {
        request = request.header(PROXY_TOKEN_HEADER, token);
    }
    let response = request.send().await.expect("request");
    let status = response.status();
    let body = response.json().await.expect("envelope JSON");
    (status, body)
}

#[tokio::test]
async fn rejects_missing_or_wrong_token() {
    let engine = Arc::new(ScriptedEngine::default());
    let Some(addr) = start(Arc::clone(&engine)).await else {
        return;
    };

    for token in [None, Some("wrong")] {
        let (status, body) = interact(addr, token, false, r#"{"fullPrompt":"json"}"#).await;
        assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "Unauthorized: Invalid or missing X-LANGCHAIN-PROXY-TOKEN header"
        );
    }
    assert!(engine.calls.lock().expect("calls lock").is_empty());
}

#[tokio::test]
async fn json_tool_result_is_returned_as_data() {
    let engine = Arc::new(ScriptedEngine::default());
    let Some(addr) = start(Arc::clone(&engine)).await else {
        return;
    };

    let (status, body) = interact(
        addr,
        Some(PROXY_TOKEN),
        false,
        r#"{"fullPrompt":"json","sessionId":"abc","accountId":"0.0.42"}"#,
    )
    .await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": true, "data": {"status": "SUCCESS", "tokenId": "0.0.5005"}})
    );

    let calls = engine.calls.lock().expect("calls lock");
    let (_, thread, ctx) = &calls[0];
    assert_eq!(thread, &ThreadId::for_session("abc"));
    assert_eq!(ctx.account_id.as_deref(), Some("0.0.42"));
    assert!(!ctx.custodial_mode);
}

#[tokio::test]
async fn plain_text_result_falls_back_to_string() {
    let engine = Arc::new(ScriptedEngine::default());
    let Some(addr) = start(Arc::clone(&engine)).await else {
        return;
    };

    let (status, body) = interact(addr, Some(PROXY_TOKEN), true, r#"{"fullPrompt":"plain"}"#).await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body, json!({"success": true, "data": "Transferred 1 HBAR"}));

    let calls = engine.calls.lock().expect("calls lock");
    let (_, thread, ctx) = &calls[0];
    assert!(thread.is_ephemeral());
    assert!(ctx.custodial_mode);
}

#[tokio::test]
async fn failures_are_reported_in_the_envelope() {
    let engine = Arc::new(ScriptedEngine::default());
    let Some(addr) = start(Arc::clone(&engine)).await else {
        return;
    };

    let (status, body) = interact(addr, Some(PROXY_TOKEN), false, r#"{"prompt":"x"}"#).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().is_some_and(|e| e.starts_with("Invalid request body")));

    let (status, body) = interact(addr, Some(PROXY_TOKEN), false, r#"{"fullPrompt":"chat"}"#).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], EngineError::NoToolResult.to_string());
}
