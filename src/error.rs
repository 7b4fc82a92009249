//! Error types for the Skarya MCP gateway

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
///
/// The auth-layer kinds (`Unauthenticated`, `UpstreamAuth`) are wrapped into
/// [`Error::AuthenticationFailed`] by the gateway; everything else reaches the
/// caller unchanged.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No resolvable session, or the session has expired
    #[error("Unauthenticated MCP session: {0}")]
    Unauthenticated(String),

    /// The token-exchange authority rejected the request or was unreachable
    #[error("Token exchange failed{}: {message}", status_suffix(*.status))]
    UpstreamAuth {
        /// HTTP status returned by the authority, if a response arrived
        status: Option<u16>,
        /// Authority message or transport failure reason
        message: String,
    },

    /// Principal exceeded its window quota
    #[error("Rate limit exceeded for MCP usage (principal '{principal}')")]
    RateLimitExceeded {
        /// Principal the quota is accounted against
        principal: String,
        /// Time until the limiter admits calls again
        retry_after: Duration,
    },

    /// Upstream API returned a transport error or an in-body failure flag
    #[error("API Error{}: {message}", status_suffix(*.status))]
    Upstream {
        /// HTTP status, if a response arrived
        status: Option<u16>,
        /// Upstream message, plain-text body, or status text
        message: String,
    },

    /// Dispatch attempted without a credential
    #[error("Unauthorized: Missing access token in context")]
    MissingAccessToken,

    /// Auth-layer failure re-raised by the gateway
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(#[source] Box<Error>),

    /// Tool not registered
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool input failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" {s}")).unwrap_or_default()
}

impl Error {
    /// Whether this failure belongs to the auth layer (context resolution)
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_) | Self::UpstreamAuth { .. } | Self::AuthenticationFailed(_)
        )
    }

    /// Stable machine-readable kind, exposed to MCP callers in error data
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::UpstreamAuth { .. } => "upstream_auth",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Upstream { .. } => "upstream",
            Self::MissingAccessToken => "missing_access_token",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
            Self::Internal(_) => "internal",
        }
    }

    /// Upstream HTTP status carried by this error, looking through the auth wrapper
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UpstreamAuth { status, .. } | Self::Upstream { status, .. } => *status,
            Self::AuthenticationFailed(inner) => inner.status(),
            _ => None,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::ToolNotFound(_) | Self::InvalidInput(_) => rpc_codes::INVALID_PARAMS,
            Self::Unauthenticated(_)
            | Self::UpstreamAuth { .. }
            | Self::AuthenticationFailed(_)
            | Self::MissingAccessToken => rpc_codes::UNAUTHORIZED,
            Self::RateLimitExceeded { .. } => rpc_codes::RATE_LIMITED,
            Self::Upstream { .. } | Self::Http(_) => rpc_codes::UPSTREAM_ERROR,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Upstream API failure
    pub const UPSTREAM_ERROR: i32 = -32000;
    /// Authentication failure
    pub const UNAUTHORIZED: i32 = -32001;
    /// Rate limit exceeded
    pub const RATE_LIMITED: i32 = -32002;
}
