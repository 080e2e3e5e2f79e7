//! Bounded tool-calling loop over an [`LlmClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{AgentEngine, InvocationContext, ThreadId, ThreadStore, ToolResultPayload};
use crate::error::EngineError;
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::tools::ToolRegistry;

const SYSTEM_PROMPT: &str = "\
**General Guidelines**
You are a helpful agent that can interact on-chain using Hedera tools.
You are empowered to interact on-chain using your tools. If you ever need funds,
you can request them from a faucet or from the user.
If there is a 5XX (internal) HTTP error code, ask the user to try again later.
If someone asks you to do something you can't do with your available tools, you
must say so, and encourage them to implement it themselves.
Keep your responses concise and helpful.";

/// Agent engine with per-thread memory.
///
/// A turn holds its thread's lock from the first model call to the commit,
/// so two calls on one thread never interleave. A failed model call discards
/// the turn and leaves the thread as it was.
pub struct ConversationEngine {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    threads: ThreadStore,
    max_iterations: usize,
    system_prompt: String,
}

impl ConversationEngine {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, max_iterations: usize) -> Self {
        Self {
            llm,
            tools,
            threads: ThreadStore::new(),
            max_iterations: max_iterations.max(1),
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    /// Forget threads nobody has used for `ttl`.
    pub fn with_thread_idle_ttl(mut self, ttl: Duration) -> Self {
        self.threads = ThreadStore::with_idle_ttl(ttl);
        self
    }

    pub fn threads(&self) -> &ThreadStore {
        &self.threads
    }

    fn system_for(&self, ctx: &InvocationContext) -> String {
        let acting = match (ctx.custodial_mode, ctx.account_id.as_deref()) {
            (true, _) => {
                "This request runs in custodial mode: act with the operator account.".to_string()
            }
            (false, Some(account)) => format!("This request acts for Hedera account {account}."),
            (false, None) => "No Hedera account is bound to this request.".to_string(),
        };
        format!("{}\n\n{acting}", self.system_prompt)
    }

    async fn run_turn(
        &self,
        prompt: &str,
        thread: &ThreadId,
        ctx: &InvocationContext,
    ) -> Result<ToolResultPayload, EngineError> {
        let history = self.threads.thread(thread);
        let mut history = history.lock().await;

        let system = self.system_for(ctx);
        let tool_definitions = self.tools.definitions();
        let mut turn = vec![ChatMessage::user(prompt)];
        let mut first_result: Option<ToolResultPayload> = None;

        for iteration in 0..self.max_iterations {
            let messages = history.iter().chain(turn.iter()).cloned().collect();
            let completion = self
                .llm
                .complete(CompletionRequest {
                    system: system.clone(),
                    messages,
                    tools: tool_definitions.clone(),
                })
                .await?;

            if completion.tool_calls.is_empty() {
                turn.push(ChatMessage::assistant(completion.content, Vec::new()));
                history.extend(turn);
                return first_result.ok_or(EngineError::NoToolResult);
            }

            tracing::debug!(
                thread = %thread,
                iteration,
                tool_calls = completion.tool_calls.len(),
                "Model requested tools"
            );

            let calls = completion.tool_calls.clone();
            turn.push(ChatMessage::assistant(completion.content, completion.tool_calls));

            for call in &calls {
                let outcome = self
                    .tools
                    .execute(&call.name, call.arguments.clone(), ctx)
                    .await;
                let content = match outcome {
                    Ok(output) => render_tool_output(output.result),
                    Err(e) => {
                        tracing::warn!(
                            thread = %thread,
                            tool = %call.name,
                            error = %e,
                            "Tool failed"
                        );
                        format!("Error: {e}")
                    }
                };
                if first_result.is_none() {
                    first_result = Some(ToolResultPayload {
                        tool_name: Some(call.name.clone()),
                        content: content.clone(),
                    });
                }
                turn.push(ChatMessage::tool_result(call, content));
            }
        }

        // Tools already ran, so keep the record of them in memory.
        history.extend(turn);
        match first_result {
            Some(result) => {
                tracing::warn!(
                    thread = %thread,
                    max = self.max_iterations,
                    "Turn hit the iteration limit; returning its first tool result"
                );
                Ok(result)
            }
            None => Err(EngineError::IterationLimit {
                max: self.max_iterations,
            }),
        }
    }
}

fn render_tool_output(result: Value) -> String {
    match result {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[async_trait]
impl AgentEngine for ConversationEngine {
    async fn invoke(
        &self,
        prompt: &str,
        thread: &ThreadId,
        ctx: &InvocationContext,
    ) -> Result<ToolResultPayload, EngineError> {
        let result = self.run_turn(prompt, thread, ctx).await;
        if thread.is_ephemeral() {
            self.threads.remove(thread);
        }
        match &result {
            Ok(payload) => tracing::info!(
                thread = %thread,
                model = self.llm.model_name(),
                tool = payload.tool_name.as_deref().unwrap_or("-"),
                "Agent turn finished"
            ),
            Err(e) => tracing::warn!(thread = %thread, error = %e, "Agent turn failed"),
        }
        result
    }
}
