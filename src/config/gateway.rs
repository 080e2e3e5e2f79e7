use std::net::SocketAddr;

use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env};
use crate::error::ConfigError;
use crate::gateway::auth::TokenAllowList;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_GATEWAY_PORT: u16 = 3000;
const DEFAULT_AGENT_PROXY_PORT: u16 = 3001;

/// MCP SSE gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub auth: GatewayAuthConfig,
    /// Deployment-wide custodial mode.
    pub custodial_mode: bool,
    /// Honor a per-request `X-CUSTODIAL-MODE` header.
    pub allow_custodial_override: bool,
}

/// Token gate settings for the channel-open endpoint.
#[derive(Debug, Clone)]
pub struct GatewayAuthConfig {
    /// `false` bypasses the gate (trusted internal deployments).
    pub enabled: bool,
    pub tokens: TokenAllowList,
}

/// Agent backend (proxy) HTTP server configuration.
#[derive(Debug, Clone)]
pub struct AgentProxyConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret expected in `X-LANGCHAIN-PROXY-TOKEN`.
    pub proxy_token: Option<SecretString>,
}

impl GatewayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let enabled = parse_bool_env("ENABLE_AUTH", true)?;
        let tokens = optional_env("MCP_AUTH_TOKEN")?
            .map(|raw| TokenAllowList::parse(&raw))
            .unwrap_or_default();

        if enabled && tokens.is_empty() {
            tracing::warn!(
                "ENABLE_AUTH is on but MCP_AUTH_TOKEN is empty; every channel open will be rejected"
            );
        }

        Ok(Self {
            host: optional_env("HOST")?.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_optional_env("PORT", "a valid port number")?
                .unwrap_or(DEFAULT_GATEWAY_PORT),
            auth: GatewayAuthConfig { enabled, tokens },
            custodial_mode: parse_bool_env("CUSTODIAL_MODE", false)?,
            allow_custodial_override: parse_bool_env("MCP_ALLOW_CUSTODIAL_OVERRIDE", false)?,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr(&self.host, self.port)
    }
}

impl AgentProxyConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            host: optional_env("HOST")?.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_optional_env("PORT", "a valid port number")?
                .unwrap_or(DEFAULT_AGENT_PROXY_PORT),
            proxy_token: optional_env("LANGCHAIN_PROXY_TOKEN")?.map(SecretString::from),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        socket_addr(&self.host, self.port)
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            key: "HOST".to_string(),
            message: format!("'{host}' is not a valid listen address: {e}"),
        })
}
