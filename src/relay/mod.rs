//! Authenticated relay to the agent backend.
//!
//! One invocation is one HTTP POST: no retries, a bounded timeout, and every
//! outcome that is not a result mapped onto [`RelayError`].

pub mod envelope;
pub mod health;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use url::Url;

use crate::config::RelayConfig;
use crate::error::RelayError;

pub use self::envelope::ResponseEnvelope;

/// Shared secret presented to the agent backend.
pub const PROXY_TOKEN_HEADER: &str = "X-LANGCHAIN-PROXY-TOKEN";
/// `true`/`false`: whether the backend acts with its operator account.
pub const CUSTODIAL_MODE_HEADER: &str = "X-CUSTODIAL-MODE";

/// A single invocation handed to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCall {
    pub full_prompt: String,
    pub session_id: Option<String>,
    pub account_id: Option<String>,
    pub custodial_mode: bool,
}

/// JSON body posted to the agent backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendRequest {
    pub full_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

/// Everything needed to put one request on the wire.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub endpoint: Url,
    pub proxy_token: String,
    pub custodial_mode: bool,
    pub body: BackendRequest,
}

/// Raw HTTP outcome before envelope parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResponse {
    pub status: u16,
    pub body: String,
}

/// Transport to the agent backend.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<BackendResponse, RelayError>;
}

/// [`AgentBackend`] over reqwest.
pub struct HttpAgentBackend {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAgentBackend {
    pub fn new(timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Transport(format!("HTTP client init failed: {e}")))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn send(&self, request: OutboundRequest) -> Result<BackendResponse, RelayError> {
        let response = self
            .client
            .post(request.endpoint)
            .header(PROXY_TOKEN_HEADER, request.proxy_token)
            .header(
                CUSTODIAL_MODE_HEADER,
                if request.custodial_mode { "true" } else { "false" },
            )
            .json(&request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RelayError::Transport(format!(
                        "agent backend did not answer within {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    RelayError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Transport(format!("failed to read response body: {e}")))?;
        Ok(BackendResponse { status, body })
    }
}

/// Relay client bound to one configured endpoint.
pub struct Relay {
    endpoint: Option<Url>,
    proxy_token: Option<SecretString>,
    backend: Arc<dyn AgentBackend>,
}

impl Relay {
    pub fn new(
        endpoint: Option<Url>,
        proxy_token: Option<SecretString>,
        backend: Arc<dyn AgentBackend>,
    ) -> Self {
        Self {
            endpoint,
            proxy_token,
            backend,
        }
    }

    /// Build a relay with the reqwest transport from resolved configuration.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        let backend = HttpAgentBackend::new(config.timeout)?;
        Ok(Self::new(
            config.api_url.clone(),
            config.proxy_token.clone(),
            Arc::new(backend),
        ))
    }

    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    /// Forward one call and return the backend's result serialized as JSON text.
    pub async fn invoke(&self, call: &RelayCall) -> Result<String, RelayError> {
        let Some(endpoint) = self.endpoint.clone() else {
            return Err(RelayError::NotConfigured);
        };

        let request = OutboundRequest {
            endpoint,
            proxy_token: self
                .proxy_token
                .as_ref()
                .map(|t| t.expose_secret().to_string())
                .unwrap_or_default(),
            custodial_mode: call.custodial_mode,
            body: BackendRequest {
                full_prompt: call.full_prompt.clone(),
                session_id: call.session_id.clone(),
                account_id: call.account_id.clone(),
            },
        };

        let started = Instant::now();
        let response = self.backend.send(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = response.and_then(interpret_response);
        match &result {
            Ok(_) => tracing::info!(
                session_id = call.session_id.as_deref().unwrap_or("-"),
                custodial = call.custodial_mode,
                elapsed_ms,
                "Relay call succeeded"
            ),
            Err(e) => tracing::warn!(
                session_id = call.session_id.as_deref().unwrap_or("-"),
                custodial = call.custodial_mode,
                elapsed_ms,
                code = e.code(),
                error = %e,
                "Relay call failed"
            ),
        }
        result
    }
}

fn interpret_response(response: BackendResponse) -> Result<String, RelayError> {
    if !(200..300).contains(&response.status) {
        return Err(RelayError::BackendStatus {
            status: response.status,
            body: response.body,
        });
    }

    let envelope: ResponseEnvelope = serde_json::from_str(&response.body).map_err(|e| {
        RelayError::Transport(format!("agent backend returned an unreadable body: {e}"))
    })?;

    let data = envelope.into_result().map_err(RelayError::BackendRejected)?;
    serde_json::to_string(&data)
        .map_err(|e| RelayError::Transport(format!("failed to encode result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::{TOOL_ERROR_PREFIX, ToolCallError};

    /// Returns a canned outcome and records what it was asked to send.
    struct ScriptedBackend {
        outcome: Mutex<Option<Result<BackendResponse, RelayError>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<OutboundRequest>>,
    }

    impl ScriptedBackend {
        fn new(outcome: Result<BackendResponse, RelayError>) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(outcome)),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn replying(status: u16, body: &str) -> Arc<Self> {
            Self::new(Ok(BackendResponse {
                status,
                body: body.to_string(),
            }))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentBackend for ScriptedBackend {
        async fn send(&self, request: OutboundRequest) -> Result<BackendResponse, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().expect("lock").push(request);
            self.outcome
                .lock()
                .expect("lock")
                .take()
                .unwrap_or_else(|| Err(RelayError::Transport("called twice".into())))
        }
    }

    fn endpoint() -> Option<Url> {
        Url::parse("http://backend.test/interact-with-hedera").ok()
    }

    fn call() -> RelayCall {
        RelayCall {
            full_prompt: "create a token named Foo".to_string(),
            session_id: Some("s-1".to_string()),
            account_id: Some("0.0.42".to_string()),
            custodial_mode: false,
        }
    }

    #[tokio::test]
    async fn missing_endpoint_makes_no_network_call() {
        let backend = ScriptedBackend::replying(200, "{}");
        let relay = Relay::new(None, None, backend.clone());

        let err = relay.invoke(&call()).await.unwrap_err();

        assert!(matches!(err, RelayError::NotConfigured));
        assert_eq!(
            ToolCallError::from(err).render(),
            "API_URL environment variable is not set."
        );
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn success_returns_serialized_data() {
        let backend =
            ScriptedBackend::replying(200, r#"{"success":true,"data":{"tokenId":"0.0.777"}}"#);
        let relay = Relay::new(endpoint(), None, backend.clone());

        let text = relay.invoke(&call()).await.expect("invoke");

        assert_eq!(text, r#"{"tokenId":"0.0.777"}"#);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn non_2xx_is_backend_failure_with_status_and_body() {
        let backend = ScriptedBackend::replying(500, "upstream exploded");
        let relay = Relay::new(endpoint(), None, backend.clone());

        let err = relay.invoke(&call()).await.unwrap_err();

        assert_eq!(err.code(), "backend_failure");
        assert_eq!(
            ToolCallError::from(err).render(),
            format!("{TOOL_ERROR_PREFIX}API request failed with status 500: upstream exploded")
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn envelope_failure_carries_backend_error() {
        let backend =
            ScriptedBackend::replying(200, r#"{"success":false,"error":"insufficient balance"}"#);
        let relay = Relay::new(endpoint(), None, backend);

        let err = relay.invoke(&call()).await.unwrap_err();

        assert_eq!(
            ToolCallError::from(err).render(),
            format!("{TOOL_ERROR_PREFIX}insufficient balance")
        );
    }

    #[tokio::test]
    async fn transport_failure_is_prefixed_and_not_retried() {
        let backend = ScriptedBackend::new(Err(RelayError::Transport(
            "connection refused".to_string(),
        )));
        let relay = Relay::new(endpoint(), None, backend.clone());

        let err = relay.invoke(&call()).await.unwrap_err();

        assert_eq!(err.code(), "transport_failure");
        assert_eq!(
            ToolCallError::from(err).render(),
            format!("{TOOL_ERROR_PREFIX}connection refused")
        );
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn unparseable_2xx_body_is_transport_failure() {
        let backend = ScriptedBackend::replying(200, "<html>oops</html>");
        let relay = Relay::new(endpoint(), None, backend);

        let err = relay.invoke(&call()).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }

    #[tokio::test]
    async fn sends_token_mode_and_identity() {
        let backend = ScriptedBackend::replying(200, r#"{"success":true,"data":null}"#);
        let relay = Relay::new(
            endpoint(),
            Some(SecretString::from("proxy-secret")),
            backend.clone(),
        );
        let mut call = call();
        call.custodial_mode = true;

        assert_eq!(relay.invoke(&call).await.expect("invoke"), "null");

        let seen = backend.seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].proxy_token, "proxy-secret");
        assert!(seen[0].custodial_mode);
        assert_eq!(
            serde_json::to_value(&seen[0].body).expect("json"),
            serde_json::json!({
                "fullPrompt": "create a token named Foo",
                "sessionId": "s-1",
                "accountId": "0.0.42"
            })
        );
    }

    #[tokio::test]
    async fn absent_token_is_sent_as_empty_string() {
        let backend = ScriptedBackend::replying(200, r#"{"success":true,"data":1}"#);
        let relay = Relay::new(endpoint(), None, backend.clone());

        relay.invoke(&call()).await.expect("invoke");

        assert_eq!(backend.seen.lock().expect("lock")[0].proxy_token, "");
    }
}
