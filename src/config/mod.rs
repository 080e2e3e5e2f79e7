//! Configuration for hedera-mcp.
//!
//! Everything is read from environment variables once at startup. A `./.env`
//! file is loaded first through dotenvy, which never overwrites variables
//! already present in the process environment.

mod gateway;
pub(crate) mod helpers;

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::ConfigError;

pub use self::gateway::{AgentProxyConfig, GatewayAuthConfig, GatewayConfig};

const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 120;
const DEFAULT_OPENAI_MODEL: &str = "o3-mini";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AGENT_MAX_ITERATIONS: usize = 6;
const DEFAULT_THREAD_IDLE_TTL_SECS: u64 = 3600;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub agent_proxy: AgentProxyConfig,
    pub relay: RelayConfig,
    pub llm: LlmConfig,
    pub hedera: HederaConfig,
    pub agent: AgentConfig,
}

impl Config {
    /// Load `.env` and resolve every section from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::resolve()
    }

    fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve()?,
            agent_proxy: AgentProxyConfig::resolve()?,
            relay: RelayConfig::resolve()?,
            llm: LlmConfig::resolve()?,
            hedera: HederaConfig::resolve()?,
            agent: AgentConfig::resolve()?,
        })
    }
}

/// Outbound relay to the agent backend.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// `None` makes every invocation return the configuration error.
    pub api_url: Option<Url>,
    pub proxy_token: Option<SecretString>,
    pub timeout: Duration,
}

impl RelayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let api_url = helpers::optional_env("API_URL")?
            .map(|raw| {
                Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                    key: "API_URL".to_string(),
                    message: format!("must be an absolute URL: {e}"),
                })
            })
            .transpose()?;

        let timeout_secs: u64 =
            helpers::parse_optional_env("RELAY_TIMEOUT_SECS", "a positive integer")?
                .unwrap_or(DEFAULT_RELAY_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_TIMEOUT_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            api_url,
            proxy_token: helpers::optional_env("LANGCHAIN_PROXY_TOKEN")?.map(SecretString::from),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// OpenAI-compatible chat completion provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub base_url: String,
}

impl LlmConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let base_url = helpers::optional_env("OPENAI_BASE_URL")?
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        Url::parse(&base_url).map_err(|e| ConfigError::InvalidValue {
            key: "OPENAI_BASE_URL".to_string(),
            message: format!("must be an absolute URL: {e}"),
        })?;

        Ok(Self {
            api_key: helpers::optional_env("OPENAI_API_KEY")?.map(SecretString::from),
            model: helpers::optional_env("OPENAI_MODEL")?
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// The agent backend cannot start without a key.
    pub fn require_api_key(&self) -> Result<SecretString, ConfigError> {
        self.api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "OPENAI_API_KEY".to_string(),
                hint: "Set it in the environment or in ./.env before running agent-proxy."
                    .to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HederaNetwork {
    Mainnet,
    Testnet,
    Previewnet,
}

impl HederaNetwork {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "previewnet" => Ok(Self::Previewnet),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'mainnet', 'testnet', or 'previewnet', got '{value}'"),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Previewnet => "previewnet",
        }
    }

    fn default_mirror_node_url(self) -> &'static str {
        match self {
            Self::Mainnet => "https://mainnet-public.mirrornode.hedera.com",
            Self::Testnet => "https://testnet.mirrornode.hedera.com",
            Self::Previewnet => "https://previewnet.mirrornode.hedera.com",
        }
    }
}

/// Hedera network and operator identity used by chain tools.
#[derive(Debug, Clone)]
pub struct HederaConfig {
    pub network: HederaNetwork,
    /// Operator account acting in custodial mode.
    pub operator_account_id: Option<String>,
    pub mirror_node_url: String,
}

impl HederaConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let network = HederaNetwork::parse(
            &helpers::optional_env("HEDERA_NETWORK_TYPE")?.unwrap_or_else(|| "testnet".into()),
            "HEDERA_NETWORK_TYPE",
        )?;

        let mirror_node_url = helpers::optional_env("HEDERA_MIRROR_NODE_URL")?
            .unwrap_or_else(|| network.default_mirror_node_url().to_string());

        Ok(Self {
            network,
            operator_account_id: helpers::optional_env("HEDERA_ACCOUNT_ID")?,
            mirror_node_url: mirror_node_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Conversation engine limits.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: usize,
    /// Conversation threads unused for this long are forgotten.
    pub thread_idle_ttl: Duration,
}

impl AgentConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let max_iterations: usize =
            helpers::parse_optional_env("AGENT_MAX_ITERATIONS", "a positive integer")?
                .unwrap_or(DEFAULT_AGENT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_MAX_ITERATIONS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let ttl_secs: u64 =
            helpers::parse_optional_env("AGENT_THREAD_IDLE_TTL_SECS", "a positive integer")?
                .unwrap_or(DEFAULT_THREAD_IDLE_TTL_SECS);
        if ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_THREAD_IDLE_TTL_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            max_iterations,
            thread_idle_ttl: Duration::from_secs(ttl_secs),
        })
    }
}
