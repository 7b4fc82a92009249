//! Authentication gateway for tool calls
//!
//! Every tool call passes through [`AuthGateway::invoke`]:
//! - Resolve an [`AuthContext`] (development bypass or session + token exchange)
//! - Rate limit keyed by the resolved principal
//! - Run the wrapped operation with `(input, context)`
//!
//! Auth-layer failures are logged and re-raised as
//! [`Error::AuthenticationFailed`]. Rate-limit and operation failures are
//! logged and returned unchanged.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::{AuthContext, ContextBuilder, SessionStore, TokenExchangeClient, UNKNOWN_SESSION};
use crate::config::{Config, DevCredentials};
use crate::failsafe::RateLimiter;
use crate::{Error, Result};

/// Per-call information the gateway resolves identity from
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// MCP session id supplied by the client, if any
    pub session_id: Option<String>,
    /// Name of the tool being invoked
    pub tool: String,
}

impl CallContext {
    /// Create a call context
    pub fn new(tool: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            session_id,
            tool: tool.into(),
        }
    }

    /// Session id to resolve; the unresolvable sentinel when absent or blank
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(UNKNOWN_SESSION)
    }
}

/// How caller identity is established, fixed at startup
pub enum AuthStrategy {
    /// Static development identity; no session lookup or token exchange
    Bypass(DevCredentials),
    /// Session lookup followed by a short-lived token exchange
    Standard(ContextBuilder),
}

impl AuthStrategy {
    /// Select the strategy from configuration.
    ///
    /// Bypass requires both the development flag and a non-empty development
    /// token; anything else runs in standard mode.
    ///
    /// # Errors
    ///
    /// Returns an error if standard mode has no auth URL or the exchange
    /// client cannot be built.
    pub fn from_config(config: &Config, store: Arc<SessionStore>) -> Result<Self> {
        if config.auth.bypass_enabled() {
            warn!(
                workspace = %config.auth.dev.workspace_id,
                subdomain = %config.auth.dev.subdomain,
                "Development auth bypass enabled"
            );
            return Ok(Self::Bypass(config.auth.dev.clone()));
        }

        let auth_url = config
            .upstream
            .auth_url
            .as_deref()
            .ok_or_else(|| Error::Config("upstream.auth_url is required".to_string()))?;
        let exchanger = TokenExchangeClient::new(auth_url, config.upstream.request_timeout)?;
        info!(endpoint = %exchanger.endpoint(), sessions = store.len(), "Session auth enabled");

        Ok(Self::Standard(ContextBuilder::new(store, Arc::new(exchanger))))
    }

    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bypass(_) => "bypass",
            Self::Standard(_) => "standard",
        }
    }

    /// Resolve the context for one call
    ///
    /// # Errors
    ///
    /// Auth-layer errors from the context builder, unwrapped.
    pub async fn resolve(&self, call: &CallContext) -> Result<AuthContext> {
        match self {
            Self::Bypass(dev) => Ok(AuthContext::from_dev(dev)),
            Self::Standard(builder) => builder.build(call.session_id()).await,
        }
    }
}

/// Entry point every tool call passes through
pub struct AuthGateway {
    strategy: AuthStrategy,
    limiter: Arc<RateLimiter>,
}

impl AuthGateway {
    /// Create a gateway
    pub fn new(strategy: AuthStrategy, limiter: Arc<RateLimiter>) -> Self {
        Self { strategy, limiter }
    }

    /// Active strategy
    #[must_use]
    pub fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }

    /// Resolve identity, enforce the rate limit, then run `operation`.
    ///
    /// `operation` only ever sees a fully resolved context with a non-empty
    /// credential.
    ///
    /// # Errors
    ///
    /// [`Error::AuthenticationFailed`] wrapping the auth-layer cause,
    /// [`Error::RateLimitExceeded`], or whatever `operation` returned.
    pub async fn invoke<I, T, F, Fut>(&self, call: &CallContext, input: I, operation: F) -> Result<T>
    where
        F: FnOnce(I, AuthContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ctx = match self.strategy.resolve(call).await {
            Ok(ctx) if ctx.access_token.is_empty() => {
                return Err(self.auth_failure(call, Error::MissingAccessToken));
            }
            Ok(ctx) => ctx,
            Err(e) => return Err(self.auth_failure(call, e)),
        };

        let principal = ctx.principal();
        if let Err(e) = self.limiter.allow(&principal) {
            warn!(tool = %call.tool, principal = %principal, error = %e, "Tool call rejected");
            return Err(e);
        }

        debug!(
            tool = %call.tool,
            principal = %principal,
            credential = ctx.credential_kind(),
            strategy = self.strategy.name(),
            "Invoking tool"
        );

        operation(input, ctx).await.inspect_err(|e| {
            warn!(
                tool = %call.tool,
                principal = %principal,
                kind = e.kind(),
                status = ?e.status(),
                error = %e,
                "Tool call failed"
            );
        })
    }

    fn auth_failure(&self, call: &CallContext, cause: Error) -> Error {
        warn!(
            tool = %call.tool,
            session = %call.session_id(),
            strategy = self.strategy.name(),
            kind = cause.kind(),
            status = ?cause.status(),
            error = %cause,
            "Authentication failed"
        );
        Error::AuthenticationFailed(Box::new(cause))
    }
}
