//! Authentication context resolution

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use super::{SessionStore, TokenExchange, UNKNOWN_SESSION};
use crate::config::DevCredentials;
use crate::{Error, Result};

/// Markers that identify a raw cookie string rather than a bearer token
const COOKIE_MARKERS: &[&str] = &["next-auth.session-token", "Cookie"];

/// Ready-to-use credential and identity for one tool call
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    /// Bearer token, or an opaque cookie string when `is_cookie` is set
    #[serde(skip)]
    pub access_token: String,
    /// Workspace id
    pub workspace_id: String,
    /// Tenant subdomain
    pub subdomain: String,
    /// User email
    pub email: String,
    /// Account id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    /// Whether `access_token` is forwarded verbatim as a `Cookie` header
    pub is_cookie: bool,
    /// User id, when resolved from a session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AuthContext {
    /// Build a context from development credentials (bypass mode)
    #[must_use]
    pub fn from_dev(dev: &DevCredentials) -> Self {
        let token = dev.access_token.clone().unwrap_or_default();
        Self {
            is_cookie: looks_like_cookie(&token),
            access_token: token,
            workspace_id: dev.workspace_id.clone(),
            subdomain: dev.subdomain.clone(),
            email: dev.email.clone(),
            account_id: dev.account_id.clone(),
            user_id: None,
        }
    }

    /// Key the rate limiter accounts this caller against
    #[must_use]
    pub fn principal(&self) -> String {
        [
            self.user_id.as_deref(),
            self.account_id.as_deref(),
            Some(self.email.as_str()),
        ]
        .into_iter()
        .flatten()
        .find(|p| !p.is_empty())
        .map_or_else(
            || format!("{}/{}", self.workspace_id, self.subdomain),
            str::to_string,
        )
    }

    /// Credential kind, for diagnostics that must not reveal the credential
    #[must_use]
    pub fn credential_kind(&self) -> &'static str {
        if self.is_cookie { "cookie" } else { "bearer" }
    }
}

// Keep the credential out of logs
impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("access_token", &"<redacted>")
            .field("workspace_id", &self.workspace_id)
            .field("subdomain", &self.subdomain)
            .field("email", &self.email)
            .field("account_id", &self.account_id)
            .field("is_cookie", &self.is_cookie)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Whether a development token is a raw cookie string
#[must_use]
pub fn looks_like_cookie(token: &str) -> bool {
    COOKIE_MARKERS.iter().any(|m| token.contains(m))
}

/// Composes a session lookup and a token exchange into an [`AuthContext`]
#[derive(Clone)]
pub struct ContextBuilder {
    store: Arc<SessionStore>,
    exchanger: Arc<dyn TokenExchange>,
}

impl ContextBuilder {
    /// Create a builder over a shared store and exchanger
    pub fn new(store: Arc<SessionStore>, exchanger: Arc<dyn TokenExchange>) -> Self {
        Self { store, exchanger }
    }

    /// The session store this builder reads from
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Resolve a session id into a context. All-or-nothing.
    ///
    /// # Errors
    ///
    /// [`Error::Unauthenticated`] for unknown or expired sessions; token
    /// exchange failures surface unchanged.
    pub async fn build(&self, session_id: &str) -> Result<AuthContext> {
        if session_id == UNKNOWN_SESSION {
            return Err(Error::Unauthenticated("no session id on call".to_string()));
        }

        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| Error::Unauthenticated("no such session".to_string()))?;

        if session.is_expired_at(Utc::now()) {
            return Err(Error::Unauthenticated("session expired".to_string()));
        }

        let token = self.exchanger.exchange(&session).await?;

        debug!(session = %session_id, workspace = %session.workspace_id, "Built auth context");

        Ok(AuthContext {
            access_token: token.access_token,
            workspace_id: session.workspace_id,
            subdomain: session.subdomain,
            email: session.email,
            account_id: session.account_id,
            is_cookie: false,
            user_id: Some(session.user_id),
        })
    }
}
