//! `interact-with-hedera` tool invocation and the JSON-RPC method table around it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ToolCallError;
use crate::gateway::session::{InboundMessage, SessionHandler, SessionInfo};
use crate::mcp::types::{
    CallToolParams, CallToolResult, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    JSONRPC_VERSION, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION, ToolDescriptor,
};
use crate::relay::{Relay, RelayCall};

pub const TOOL_NAME: &str = "interact-with-hedera";
const TOOL_DESCRIPTION: &str = "Interact with Hedera. Send a natural-language instruction \
     (for example: create a fungible token, transfer HBAR, check a balance) and receive the \
     structured result of the single on-chain action it produced.";
const SERVER_NAME: &str = "Hedera MCP Server";

/// Trusted caller context, taken from the channel and never from the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub session_id: Option<String>,
    pub account_id: Option<String>,
    pub custodial_override: Option<bool>,
}

impl CallerContext {
    fn from_session(session: &SessionInfo, message: &InboundMessage) -> Self {
        Self {
            session_id: Some(session.id.to_string()),
            account_id: message
                .overrides
                .account_id
                .clone()
                .or_else(|| session.context.account_id.clone()),
            custodial_override: message
                .overrides
                .custodial_override
                .or(session.context.custodial_override),
        }
    }
}

/// Validated `tools/call` arguments.
///
/// `sessionId` and `accountId` are accepted on the wire so well-formed clients
/// are not rejected, but only [`CallerContext`] is trusted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub full_prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

impl ToolCallRequest {
    pub fn from_arguments(arguments: Option<Value>) -> Result<Self, ToolCallError> {
        let arguments = arguments.ok_or_else(|| {
            ToolCallError::InvalidRequest(
                "missing arguments; expected {\"fullPrompt\": string}".into(),
            )
        })?;
        let request: Self = serde_json::from_value(arguments)
            .map_err(|e| ToolCallError::InvalidRequest(format!("invalid arguments: {e}")))?;
        if request.full_prompt.trim().is_empty() {
            return Err(ToolCallError::InvalidRequest(
                "fullPrompt must be a non-empty string".into(),
            ));
        }
        Ok(request)
    }
}

/// Validates, enriches and relays one tool invocation.
pub struct ToolCallHandler {
    relay: Arc<Relay>,
    custodial_mode: bool,
    allow_custodial_override: bool,
}

impl ToolCallHandler {
    pub fn new(relay: Arc<Relay>, custodial_mode: bool, allow_custodial_override: bool) -> Self {
        Self {
            relay,
            custodial_mode,
            allow_custodial_override,
        }
    }

    fn resolve_mode(&self, caller: &CallerContext) -> bool {
        match caller.custodial_override {
            Some(mode) if self.allow_custodial_override => mode,
            _ => self.custodial_mode,
        }
    }

    pub async fn handle(
        &self,
        arguments: Option<Value>,
        caller: &CallerContext,
    ) -> Result<String, ToolCallError> {
        let request = ToolCallRequest::from_arguments(arguments)?;

        if request.session_id.is_some() || request.account_id.is_some() {
            tracing::debug!(
                session_id = caller.session_id.as_deref().unwrap_or("-"),
                "Ignoring identity fields supplied in tool arguments"
            );
        }

        let custodial_mode = self.resolve_mode(caller);
        if !custodial_mode && caller.account_id.is_none() {
            return Err(ToolCallError::MissingIdentity);
        }

        let call = RelayCall {
            full_prompt: request.full_prompt,
            session_id: caller.session_id.clone(),
            account_id: caller.account_id.clone(),
            custodial_mode,
        };
        Ok(self.relay.invoke(&call).await?)
    }
}

/// JSON-RPC front end of the MCP server.
pub struct McpHandler {
    tool_calls: Arc<ToolCallHandler>,
}

impl McpHandler {
    pub fn new(tool_calls: Arc<ToolCallHandler>) -> Self {
        Self { tool_calls }
    }

    /// Handle one raw message. `None` when no reply is owed.
    pub async fn handle_message(
        &self,
        body: &str,
        caller: &CallerContext,
    ) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {e}"),
                ));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    id,
                    INVALID_REQUEST,
                    format!("Invalid request: {e}"),
                ));
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                "Invalid request: jsonrpc must be \"2.0\"",
            ));
        }

        if request.is_notification() {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let response = match request.method.as_str() {
            "initialize" => {
                JsonRpcResponse::success(id, initialize_result(request.params.as_ref()))
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": [tool_descriptor()] })),
            "tools/call" => self.call_tool(id, request.params, caller).await,
            other => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        };
        Some(response)
    }

    async fn call_tool(
        &self,
        id: Value,
        params: Option<Value>,
        caller: &CallerContext,
    ) -> JsonRpcResponse {
        let params = params
            .map(serde_json::from_value::<CallToolParams>)
            .transpose();
        let params = match params {
            Ok(Some(params)) => params,
            Ok(None) => return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"),
            Err(e) => {
                return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {e}"));
            }
        };
        if params.name != TOOL_NAME {
            return JsonRpcResponse::error(
                id,
                INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        }

        tracing::info!(
            session_id = caller.session_id.as_deref().unwrap_or("-"),
            account_id = caller.account_id.as_deref().unwrap_or("-"),
            "Received tool call: {TOOL_NAME}"
        );

        let result = match self.tool_calls.handle(params.arguments, caller).await {
            Ok(text) => CallToolResult::text(text),
            Err(e) => {
                tracing::warn!(
                    session_id = caller.session_id.as_deref().unwrap_or("-"),
                    code = e.code(),
                    error = %e,
                    "Tool call failed"
                );
                CallToolResult::error(e.render())
            }
        };

        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Unencodable result: {e}"))
            }
        }
    }
}

#[async_trait]
impl SessionHandler for McpHandler {
    async fn handle(&self, session: &SessionInfo, message: InboundMessage) -> Option<String> {
        let caller = CallerContext::from_session(session, &message);
        let response = self.handle_message(&message.body, &caller).await?;
        match serde_json::to_string(&response) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "Failed to encode response");
                None
            }
        }
    }

    /// Only tool calls touch the agent thread; everything else answers at once.
    fn is_ordered(&self, message: &InboundMessage) -> bool {
        serde_json::from_str::<Value>(&message.body)
            .is_ok_and(|value| value.get("method").and_then(Value::as_str) == Some("tools/call"))
    }
}

fn initialize_result(params: Option<&Value>) -> Value {
    let protocol_version = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION);
    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

fn tool_descriptor() -> ToolDescriptor {
    ToolDescriptor {
        name: TOOL_NAME,
        description: TOOL_DESCRIPTION,
        input_schema: json!({
            "type": "object",
            "properties": {
                "fullPrompt": { "type": "string" }
            },
            "required": ["fullPrompt"]
        }),
    }
}
