//! OpenAI-compatible chat completions provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::{
    ChatMessage, Completion, CompletionRequest, LlmClient, Role, TokenUsage, ToolCall,
    ToolDefinition,
};

const PROVIDER: &str = "openai";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

// -- Wire types --

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON text, as the API encodes it.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    pub fn from_config(config: &LlmConfig, api_key: SecretString) -> Result<Self, LlmError> {
        Self::new(config.base_url.clone(), api_key, config.model.clone())
    }

    fn convert_messages(system: &str, messages: &[ChatMessage]) -> Vec<WireMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);

        if !system.is_empty() {
            result.push(WireMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for msg in messages {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
                msg.tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        kind: function_kind(),
                        function: WireFunctionCall {
                            name: call.name.clone(),
                            arguments: call.arguments.to_string(),
                        },
                    })
                    .collect()
            });
            result.push(WireMessage {
                role: role.to_string(),
                content: Some(msg.content.clone()),
                tool_calls,
                tool_call_id: msg.tool_call_id.clone(),
            });
        }

        result
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                kind: "function",
                function: WireFunctionDef {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn parse_response(resp: ChatResponse) -> Result<Completion, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "response has no choices".to_string(),
            })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                // Malformed argument text is passed through so the tool can
                // report it back to the model.
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(Value::String(tc.function.arguments)),
            })
            .collect();

        let usage = resp.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            model: resp.model,
            usage,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(&request.system, &request.messages),
            tools: Self::convert_tools(&request.tools),
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }

        let text = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let completion = Self::parse_response(parsed)?;

        tracing::debug!(
            model = %completion.model,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            tool_calls = completion.tool_calls.len(),
            "LLM completion received"
        );
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_carry_system_and_tool_linkage() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "hedera_get_hbar_balance".to_string(),
            arguments: json!({"accountId": "0.0.2"}),
        };
        let history = vec![
            ChatMessage::user("what is my balance?"),
            ChatMessage::assistant("", vec![call.clone()]),
            ChatMessage::tool_result(&call, r#"{"balance":"5 HBAR"}"#),
        ];

        let wire = OpenAiClient::convert_messages("be brief", &history);
        let value = serde_json::to_value(&wire).expect("json");

        assert_eq!(value[0]["role"], "system");
        assert_eq!(value[1]["role"], "user");
        assert_eq!(value[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(value[2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            value[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"accountId":"0.0.2"}"#
        );
        assert_eq!(value[3]["role"], "tool");
        assert_eq!(value[3]["tool_call_id"], "call_1");
    }

    #[test]
    fn parses_tool_calls_and_usage() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "model": "o3-mini",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "t", "arguments": "{\"a\":1}"}
                    }, {
                        "id": "call_10",
                        "type": "function",
                        "function": {"name": "t", "arguments": "not json"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }))
        .expect("parse");

        let completion = OpenAiClient::parse_response(resp).expect("completion");
        assert_eq!(completion.content, "");
        assert_eq!(completion.tool_calls.len(), 2);
        assert_eq!(completion.tool_calls[0].arguments, json!({"a": 1}));
        assert_eq!(completion.tool_calls[1].arguments, json!("not json"));
        assert_eq!(completion.usage.input_tokens, 12);
    }

    #[test]
    fn empty_choices_is_invalid_response() {
        let resp: ChatResponse =
            serde_json::from_value(json!({"model": "x", "choices": []})).expect("parse");
        assert!(matches!(
            OpenAiClient::parse_response(resp),
            Err(LlmError::InvalidResponse { .. })
        ));
    }
}
