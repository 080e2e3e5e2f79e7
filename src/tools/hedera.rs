//! Read-only Hedera tools backed by the public mirror node REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::InvocationContext;
use crate::config::HederaConfig;
use crate::error::ToolError;
use crate::tools::{ChainTool, ToolOutput};

pub const HBAR_BALANCE_TOOL_NAME: &str = "hedera_get_hbar_balance";
const TINYBARS_PER_HBAR: i64 = 100_000_000;
const ALLOWED_SCHEMES: &[&str] = &["https", "http"];

/// Looks up the HBAR and token balances of one account.
#[derive(Debug)]
pub struct HederaBalanceTool {
    client: reqwest::Client,
    mirror_node_url: String,
    operator_account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceParams {
    #[serde(default)]
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MirrorAccount {
    account: String,
    balance: MirrorBalance,
}

#[derive(Debug, Deserialize)]
struct MirrorBalance {
    balance: i64,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    tokens: Vec<MirrorTokenBalance>,
}

#[derive(Debug, Deserialize, Serialize)]
struct MirrorTokenBalance {
    token_id: String,
    balance: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceReport {
    account_id: String,
    hbar_balance: String,
    tinybars: i64,
    tokens: Vec<MirrorTokenBalance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

impl HederaBalanceTool {
    pub fn new(
        mirror_node_url: &str,
        operator_account_id: Option<String>,
    ) -> Result<Self, ToolError> {
        validate_mirror_url(mirror_node_url).map_err(|reason| ToolError::InvalidParameters {
            name: HBAR_BALANCE_TOOL_NAME.to_string(),
            reason,
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                name: HBAR_BALANCE_TOOL_NAME.to_string(),
                reason: format!("HTTP client init failed: {e}"),
            })?;
        Ok(Self {
            client,
            mirror_node_url: mirror_node_url.trim_end_matches('/').to_string(),
            operator_account_id,
        })
    }

    pub fn from_config(config: &HederaConfig) -> Result<Self, ToolError> {
        Self::new(&config.mirror_node_url, config.operator_account_id.clone())
    }

    /// Explicit parameter first, then whoever the call acts for.
    fn resolve_account(
        &self,
        params: &BalanceParams,
        ctx: &InvocationContext,
    ) -> Result<String, ToolError> {
        let acting_account = if ctx.custodial_mode {
            self.operator_account_id.as_deref()
        } else {
            ctx.account_id.as_deref()
        };
        let raw = params
            .account_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or(acting_account)
            .ok_or_else(|| invalid("no accountId given and no account is bound to this call"))?;
        parse_account_id(raw)
    }
}

fn invalid(reason: impl Into<String>) -> ToolError {
    ToolError::InvalidParameters {
        name: HBAR_BALANCE_TOOL_NAME.to_string(),
        reason: reason.into(),
    }
}

fn failed(reason: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        name: HBAR_BALANCE_TOOL_NAME.to_string(),
        reason: reason.into(),
    }
}

/// Accepts `shard.realm.num` with decimal components.
fn parse_account_id(raw: &str) -> Result<String, ToolError> {
    let parts: Vec<&str> = raw.trim().split('.').collect();
    let well_formed = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        return Err(invalid(format!(
            "invalid account id '{raw}': expected shard.realm.num"
        )));
    }
    Ok(parts.join("."))
}

fn validate_mirror_url(url: &str) -> Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("mirror node URL parse failed: {e}"))?;
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err("mirror node URL must not contain userinfo".to_string());
    }
    if !ALLOWED_SCHEMES
        .iter()
        .any(|s| parsed.scheme().eq_ignore_ascii_case(s))
    {
        return Err(format!(
            "scheme '{}' is not allowed (allowed: {})",
            parsed.scheme(),
            ALLOWED_SCHEMES.join(", ")
        ));
    }
    if parsed.host_str().is_none() {
        return Err("mirror node URL is missing host".to_string());
    }
    Ok(())
}

fn format_hbar(tinybars: i64) -> String {
    let sign = if tinybars < 0 { "-" } else { "" };
    let abs = tinybars.unsigned_abs();
    let per = TINYBARS_PER_HBAR as u64;
    format!("{sign}{}.{:08}", abs / per, abs % per)
}

#[async_trait]
impl ChainTool for HederaBalanceTool {
    fn name(&self) -> &str {
        HBAR_BALANCE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Returns the HBAR balance and token balances of a Hedera account. \
         Defaults to the account this request acts for."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "accountId": {
                    "type": "string",
                    "description": "Account in shard.realm.num form, e.g. 0.0.1234. Optional."
                }
            }
        })
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &InvocationContext,
    ) -> Result<ToolOutput, ToolError> {

        let params: BalanceParams = match params {
            Value::Null => BalanceParams { account_id: None },
            other => serde_json::from_value(other)
                .map_err(|e| invalid(format!("invalid parameters: {e}")))?,
        };
        let account_id = self.resolve_account(&params, ctx)?;

        let url = format!("{}/api/v1/accounts/{}", self.mirror_node_url, account_id);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| failed(format!("mirror node request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(failed(format!("account {account_id} not found")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!(
                "mirror node returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let account: MirrorAccount = response
            .json()
            .await
            .map_err(|e| failed(format!("unreadable mirror node response: {e}")))?;

        let report = BalanceReport {
            account_id: account.account,
            hbar_balance: format_hbar(account.balance.balance),
            tinybars: account.balance.balance,
            tokens: account.balance.tokens,
            timestamp: account.balance.timestamp,
        };
        let result = serde_json::to_value(report)
            .map_err(|e| failed(format!("failed to encode balance: {e}")))?;
        Ok(ToolOutput::success(result))
    }

    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(15)
    }
}
