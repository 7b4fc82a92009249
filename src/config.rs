//! Configuration management

use std::{env, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving legacy variables.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server identity reported on `initialize`
    pub server: ServerConfig,
    /// Upstream endpoints and timeouts
    pub upstream: UpstreamConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Per-principal rate limiting
    pub rate_limit: RateLimitConfig,
}

/// Server identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported in `serverInfo`
    pub name: String,
    /// Version reported in `serverInfo`
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Skarya MCP Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Upstream service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the board/task API
    pub api_url: Option<String>,
    /// Base URL of the token-exchange authority
    pub auth_url: Option<String>,
    /// Whole-request timeout for every outbound call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            auth_url: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Development posture. Together with a non-empty `dev.access_token`
    /// this selects the bypass strategy.
    pub development: bool,
    /// Development credentials used by the bypass strategy
    pub dev: DevCredentials,
    /// Sessions loaded into the session store at startup
    pub sessions: Vec<SessionSeed>,
}

impl AuthConfig {
    /// Whether the bypass strategy applies
    #[must_use]
    pub fn bypass_enabled(&self) -> bool {
        self.development && self.dev.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Development credentials for the bypass strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevCredentials {
    /// Bearer token or raw cookie string
    pub access_token: Option<String>,
    /// Workspace id
    pub workspace_id: String,
    /// Tenant subdomain
    pub subdomain: String,
    /// User email
    pub email: String,
    /// Account id
    pub account_id: Option<String>,
}

/// A session seeded from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSeed {
    /// Opaque session id presented by the MCP client
    pub session_id: String,
    /// User id sent to the token authority
    pub user_id: String,
    /// Workspace id
    pub workspace_id: String,
    /// Tenant subdomain
    pub subdomain: String,
    /// User email
    #[serde(default)]
    pub email: String,
    /// Account id
    #[serde(default)]
    pub account_id: Option<String>,
    /// Requested scopes
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Expiry (RFC 3339)
    pub expires_at: DateTime<Utc>,
}

/// Rate limiting strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Counter reset wholesale at window boundaries
    #[default]
    FixedWindow,
    /// Generic cell rate algorithm; smooths bursts at window boundaries
    Gcra,
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Counting strategy
    pub strategy: RateLimitStrategy,
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Calls admitted per principal per window
    pub max_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategy::FixedWindow,
            window: Duration::from_secs(60),
            max_per_window: 60,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or the resulting configuration is incomplete.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // SKARYA_MCP_UPSTREAM__API_URL -> upstream.api_url
        figment = figment.merge(Env::prefixed("SKARYA_MCP_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.apply_legacy_env();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Overlay the legacy deployment variables (`SKARYA_API_URL`, `DEV_*`, ...)
    fn apply_legacy_env(&mut self) {
        let var = |name: &str| env::var(name).ok();

        if let Some(v) = var("SKARYA_API_URL") {
            self.upstream.api_url = Some(v);
        }
        if let Some(v) = var("SKARYA_AUTH_URL") {
            self.upstream.auth_url = Some(v);
        }
        if let Some(v) = var("NODE_ENV") {
            self.auth.development = v == "development";
        }
        if let Some(v) = var("DEV_ACCESS_TOKEN") {
            self.auth.dev.access_token = Some(v);
        }
        if let Some(v) = var("DEV_WORKSPACE_ID") {
            self.auth.dev.workspace_id = v;
        }
        if let Some(v) = var("DEV_SUBDOMAIN") {
            self.auth.dev.subdomain = v;
        }
        if let Some(v) = var("DEV_EMAIL") {
            self.auth.dev.email = v;
        }
        if let Some(v) = var("DEV_ACCOUNT_ID") {
            self.auth.dev.account_id = Some(v);
        }
    }

    /// Check that the configuration can start a server
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing or invalid setting.
    pub fn validate(&self) -> Result<()> {
        let api_url = self
            .upstream
            .api_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Config("Missing upstream.api_url (SKARYA_API_URL)".to_string()))?;
        url::Url::parse(api_url)
            .map_err(|e| Error::Config(format!("Invalid upstream.api_url '{api_url}': {e}")))?;

        if !self.auth.bypass_enabled() {
            let auth_url = self
                .upstream
                .auth_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    Error::Config("Missing upstream.auth_url (SKARYA_AUTH_URL)".to_string())
                })?;
            url::Url::parse(auth_url)
                .map_err(|e| Error::Config(format!("Invalid upstream.auth_url '{auth_url}': {e}")))?;
        }

        if self.rate_limit.enabled && self.rate_limit.max_per_window == 0 {
            return Err(Error::Config(
                "rate_limit.max_per_window must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Effective configuration as YAML, with the development token redacted
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_redacted_yaml(&self) -> Result<String> {
        let mut redacted = self.clone();
        if redacted.auth.dev.access_token.is_some() {
            redacted.auth.dev.access_token = Some("<redacted>".to_string());
        }
        serde_yaml::to_string(&redacted).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "30s", "5m", "100ms" or a bare number of seconds
    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let number = |n: &str| {
            n.parse::<u64>()
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        };
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins)?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration '{s}' is out of range"))
        } else {
            number(s).map(Duration::from_secs)
        }
    }
}
