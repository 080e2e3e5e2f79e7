//! Agent backend reachability check run once at gateway startup.

use std::error::Error as _;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Typed backend health state for startup logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendHealthState {
    Healthy,
    NotConfigured,
    DnsFailure,
    ConnectFailure,
    Timeout,
    AuthFailure,
    HttpFailure,
}

impl BackendHealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::NotConfigured => "not_configured",
            Self::DnsFailure => "dns_failure",
            Self::ConnectFailure => "connect_failure",
            Self::Timeout => "timeout",
            Self::AuthFailure => "auth_failure",
            Self::HttpFailure => "http_failure",
        }
    }

    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Reachability of the relay endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub url: Option<String>,
    pub state: BackendHealthState,
    pub detail: String,
    pub http_status: Option<u16>,
}

/// Send one GET to the endpoint and classify the outcome.
///
/// Any answer below 500 other than 401/403 counts as reachable: the backend
/// only serves POST on this path, so 404/405 are expected.
pub async fn check_backend(endpoint: Option<&Url>, timeout: Duration) -> BackendHealth {
    let Some(endpoint) = endpoint else {
        return BackendHealth {
            url: None,
            state: BackendHealthState::NotConfigured,
            detail: "API_URL is not set".to_string(),
            http_status: None,
        };
    };
    let url = Some(endpoint.to_string());

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(error) => {
            return BackendHealth {
                url,
                state: BackendHealthState::ConnectFailure,
                detail: format!("HTTP client init failed: {error}"),
                http_status: None,
            };
        }
    };

    match client.get(endpoint.clone()).send().await {
        Ok(response) => {
            let status = response.status();
            let state = if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                BackendHealthState::AuthFailure
            } else if status.is_server_error() {
                BackendHealthState::HttpFailure
            } else {
                BackendHealthState::Healthy
            };
            BackendHealth {
                url,
                state,
                detail: format!("HTTP {}", status.as_u16()),
                http_status: Some(status.as_u16()),
            }
        }
        Err(error) => BackendHealth {
            url,
            state: classify_transport_error(&error),
            detail: error.to_string(),
            http_status: None,
        },
    }
}

/// Check and log; never fails startup.
pub async fn log_preflight(endpoint: Option<&Url>, timeout: Duration) -> BackendHealth {
    let health = check_backend(endpoint, timeout).await;
    let url = health.url.as_deref().unwrap_or("-");
    match health.state {
        BackendHealthState::Healthy => {
            tracing::info!(url, detail = %health.detail, "Agent backend reachable");
        }
        BackendHealthState::NotConfigured => {
            tracing::warn!("API_URL is not set; every tool call will report it");
        }
        state => {
            tracing::warn!(
                url,
                state = state.as_str(),
                detail = %health.detail,
                "Agent backend preflight failed; serving anyway"
            );
        }
    }
    health
}

fn classify_transport_error(error: &reqwest::Error) -> BackendHealthState {
    let mut io_kind = None;
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io_error) = err.downcast_ref::<io::Error>() {
            io_kind = Some(io_error.kind());
            break;
        }
        source = err.source();
    }
    classify_failure(error.is_timeout(), error.is_connect(), io_kind)
}

/// A connect error that never reached a socket failed at name resolution.
fn classify_failure(
    timed_out: bool,
    connecting: bool,
    io_kind: Option<io::ErrorKind>,
) -> BackendHealthState {
    use io::ErrorKind::*;

    if timed_out || io_kind == Some(TimedOut) {
        return BackendHealthState::Timeout;
    }
    match io_kind {
        Some(
            ConnectionRefused | ConnectionReset | ConnectionAborted | HostUnreachable
            | NetworkUnreachable | AddrNotAvailable,
        ) => BackendHealthState::ConnectFailure,
        _ if connecting => BackendHealthState::DnsFailure,
        _ => BackendHealthState::ConnectFailure,
    }
}
