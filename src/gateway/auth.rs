//! Shared-secret token gate.
//!
//! Stateless: a presented token is accepted when it exactly equals one entry
//! of a configured allow-list, or unconditionally when the gate is bypassed.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

/// Header carrying the MCP client credential on channel open.
pub const MCP_AUTH_HEADER: &str = "x-mcp-auth-token";

/// Allow-list of accepted tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenAllowList {
    tokens: BTreeSet<String>,
}

impl TokenAllowList {
    /// Parse a comma-delimited list; entries are trimmed and empty ones dropped.
    pub fn parse(raw: &str) -> Self {
        Self {
            tokens: raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        // Visit every entry so the scan time does not depend on which one matched.
        let mut found = false;
        for candidate in &self.tokens {
            found |= bool::from(candidate.as_bytes().ct_eq(token.as_bytes()));
        }
        found
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for TokenAllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            tokens: iter
                .into_iter()
                .map(|t| t.as_ref().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Authorized,
    Unauthorized,
}

impl AuthDecision {
    pub fn is_authorized(self) -> bool {
        matches!(self, Self::Authorized)
    }
}

/// Decide whether `presented` may pass.
pub fn authorize(
    presented: Option<&str>,
    allow_list: &TokenAllowList,
    bypass: bool,
) -> AuthDecision {
    if bypass {
        return AuthDecision::Authorized;
    }
    match presented {
        Some(token) if !token.is_empty() && allow_list.contains(token) => AuthDecision::Authorized,
        _ => AuthDecision::Unauthorized,
    }
}

/// State for [`require_token`].
#[derive(Clone)]
pub struct AuthState {
    pub header: &'static str,
    pub allow_list: Arc<TokenAllowList>,
    pub bypass: bool,
}

/// Reject requests whose token header fails the gate with `401`.
///
/// Runs before the handler, so nothing is allocated for rejected callers.
pub async fn require_token(
    State(auth): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(auth.header)
        .and_then(|v| v.to_str().ok());

    if authorize(presented, &auth.allow_list, auth.bypass).is_authorized() {
        return next.run(request).await;
    }

    tracing::warn!(
        header = auth.header,
        token_present = presented.is_some(),
        "Rejected request with invalid or missing token"
    );
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}
