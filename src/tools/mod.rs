//! Chain tools the conversation engine can call.

pub mod hedera;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::InvocationContext;
use crate::error::ToolError;
use crate::llm::ToolDefinition;

pub use self::hedera::HederaBalanceTool;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a tool execution. The registry times calls itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub result: Value,
}

impl ToolOutput {
    pub fn success(result: Value) -> Self {
        Self { result }
    }
}

#[async_trait]
pub trait ChainTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the parameters object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &InvocationContext)
    -> Result<ToolOutput, ToolError>;

    fn execution_timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
}

/// Name-indexed set of tools offered to the model.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ChainTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any previous tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn ChainTool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replaced previously registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChainTool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    /// Run `name` under its timeout.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &InvocationContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        let timeout = tool.execution_timeout();
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, tool.execute(params, ctx))
            .await
            .map_err(|_| ToolError::Timeout {
                name: name.to_string(),
                timeout,
            })?;

        tracing::debug!(
            tool = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Tool executed"
        );
        result
    }
}
