//! hedera-mcp binary: MCP gateway, agent backend, or stdio server.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hedera_mcp::agent::ConversationEngine;
use hedera_mcp::agent::proxy::{AgentProxyState, start_agent_proxy};
use hedera_mcp::config::Config;
use hedera_mcp::gateway::auth::{AuthState, MCP_AUTH_HEADER, TokenAllowList};
use hedera_mcp::gateway::stdio::run_stdio;
use hedera_mcp::gateway::{GatewayState, SessionContext, SessionRegistry, start_server};
use hedera_mcp::llm::OpenAiClient;
use hedera_mcp::mcp::{McpHandler, ToolCallHandler};
use hedera_mcp::relay::{Relay, health};
use hedera_mcp::tools::{HederaBalanceTool, ToolRegistry};

const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "hedera-mcp")]
#[command(version, about = "MCP server exposing a stateful Hedera agent tool")]
struct Cli {
    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the MCP gateway over SSE (default).
    Serve,
    /// Run the agent backend the gateway relays to.
    AgentProxy,
    /// Serve one MCP session over stdin/stdout.
    Stdio,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing("hedera_mcp=info", cli.log_json);

    let config = Config::from_env()?;
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::AgentProxy => agent_proxy(config).await,
        Command::Stdio => stdio(config).await,
    }
}

/// Logs always go to stderr so stdout stays free for the stdio transport.
fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn mcp_handler(config: &Config, relay: Arc<Relay>) -> Arc<McpHandler> {
    let tool_calls = ToolCallHandler::new(
        relay,
        config.gateway.custodial_mode,
        config.gateway.allow_custodial_override,
    );
    Arc::new(McpHandler::new(Arc::new(tool_calls)))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        custodial = config.gateway.custodial_mode,
        auth = config.gateway.auth.enabled,
        "Starting hedera-mcp gateway"
    );

    let relay = Arc::new(Relay::from_config(&config.relay)?);
    health::log_preflight(relay.endpoint(), PREFLIGHT_TIMEOUT).await;

    let state = Arc::new(GatewayState::new(
        Arc::new(SessionRegistry::new()),
        mcp_handler(&config, relay),
        AuthState {
            header: MCP_AUTH_HEADER,
            allow_list: Arc::new(config.gateway.auth.tokens.clone()),
            bypass: !config.gateway.auth.enabled,
        },
    ));

    start_server(config.gateway.socket_addr()?, Arc::clone(&state)).await?;
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    state.shutdown().await;
    Ok(())
}

async fn agent_proxy(config: Config) -> anyhow::Result<()> {
    let api_key = config.llm.require_api_key()?;
    let llm = Arc::new(OpenAiClient::from_config(&config.llm, api_key)?);

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(HederaBalanceTool::from_config(&config.hedera)?));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %config.llm.model,
        network = config.hedera.network.as_str(),
        tools = tools.len(),
        "Starting hedera-mcp agent backend"
    );

    let engine = Arc::new(
        ConversationEngine::new(llm, Arc::new(tools), config.agent.max_iterations)
            .with_thread_idle_ttl(config.agent.thread_idle_ttl),
    );
    let tokens = config
        .agent_proxy
        .proxy_token
        .as_ref()
        .map(|token| TokenAllowList::from_iter([token.expose_secret().to_string()]))
        .unwrap_or_default();
    if tokens.is_empty() {
        tracing::warn!("LANGCHAIN_PROXY_TOKEN is not set; every agent request will be rejected");
    }

    let state = Arc::new(AgentProxyState::new(engine, tokens));
    start_agent_proxy(config.agent_proxy.socket_addr()?, Arc::clone(&state)).await?;
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    state.shutdown().await;
    Ok(())
}

async fn stdio(config: Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting hedera-mcp on stdio");

    let context = SessionContext {
        account_id: config.hedera.operator_account_id.clone(),
        custodial_override: None,
    };
    let relay = Arc::new(Relay::from_config(&config.relay)?);
    let handler = mcp_handler(&config, relay);
    run_stdio(Arc::new(SessionRegistry::new()), handler, context).await?;
    Ok(())
}
