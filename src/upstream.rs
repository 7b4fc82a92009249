//! Upstream request dispatcher
//!
//! Builds outbound calls to the board/task API from an [`AuthContext`] and
//! classifies the responses. The upstream signals business failures inside a
//! 200 envelope (`{"success": false, "message": ...}`), so the body is checked
//! as well as the status.
//!
//! # Security
//!
//! The credential is attached as a header only; it is never logged or copied
//! into error messages.

use std::time::Duration;

use reqwest::{
    Client, Method, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::AuthContext;
use crate::{Error, Result};

/// Identity header carrying the caller's email
pub const USER_EMAIL_HEADER: &str = "x-user-email";
/// Identity header carrying the workspace id
pub const WORKSPACE_ID_HEADER: &str = "x-workspace-id";
/// Identity header carrying the tenant subdomain
pub const SUBDOMAIN_HEADER: &str = "x-subdomain";

/// Longest upstream message carried into an error
const MAX_MESSAGE_LEN: usize = 500;

/// A successful upstream response
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    /// Transport status
    pub status: u16,
    /// In-body success flag, when the upstream sent one
    pub success: Option<bool>,
    /// Parsed body
    pub body: Value,
}

impl UpstreamResponse {
    /// The `data` member of the envelope, or the whole body if absent
    #[must_use]
    pub fn data(&self) -> &Value {
        self.body.get("data").unwrap_or(&self.body)
    }
}

/// Dispatcher for upstream API calls
#[derive(Clone)]
pub struct RequestDispatcher {
    client: Client,
    base_url: String,
}

impl RequestDispatcher {
    /// Create a dispatcher for the API at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a dispatcher reusing an existing [`Client`]
    #[must_use]
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base URL every endpoint is appended to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Dispatch a call to `endpoint` (a path such as `/api/boards/createBoard`)
    ///
    /// # Errors
    ///
    /// [`Error::MissingAccessToken`] without a credential, otherwise
    /// [`Error::Upstream`] for transport failures, non-2xx statuses, and
    /// `success: false` envelopes.
    pub async fn dispatch(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
        ctx: &AuthContext,
    ) -> Result<UpstreamResponse> {
        self.dispatch_with_query(endpoint, method, &[], body, ctx)
            .await
    }

    /// Dispatch with query parameters appended to the endpoint
    ///
    /// # Errors
    ///
    /// Same as [`RequestDispatcher::dispatch`].
    pub async fn dispatch_with_query(
        &self,
        endpoint: &str,
        method: Method,
        query: &[(&str, &str)],
        body: Option<&Value>,
        ctx: &AuthContext,
    ) -> Result<UpstreamResponse> {
        let headers = build_headers(ctx)?;
        let url = format!("{}{endpoint}", self.base_url);

        info!(method = %method, endpoint = %endpoint, "Upstream request");

        let mut request = self.client.request(method.clone(), &url).headers(headers);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.body(serde_json::to_vec(body)?);
        }

        let outcome = match request.send().await {
            Ok(response) => classify(response).await,
            Err(e) => Err(Error::Upstream {
                status: e.status().map(|s| s.as_u16()),
                message: format!("Request failed: {e}"),
            }),
        };

        match &outcome {
            Ok(response) => {
                info!(
                    method = %method,
                    endpoint = %endpoint,
                    status = response.status,
                    body = %preview(&response.body),
                    "Upstream response"
                );
            }
            Err(e) => {
                warn!(method = %method, endpoint = %endpoint, status = ?e.status(), error = %e, "Upstream request failed");
            }
        }

        outcome
    }
}

/// Build auth, identity, and content-type headers for `ctx`
///
/// A token is sent as `Authorization: Bearer` only when it is not flagged as a
/// cookie and does not itself look like one (contains no `=`); otherwise it is
/// forwarded verbatim as `Cookie`.
///
/// # Errors
///
/// [`Error::MissingAccessToken`] when the context carries no credential.
pub fn build_headers(ctx: &AuthContext) -> Result<HeaderMap> {
    if ctx.access_token.is_empty() {
        return Err(Error::MissingAccessToken);
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let credential = |value: String| {
        // Don't include the credential in the error message
        HeaderValue::try_from(value)
            .map(|mut v| {
                v.set_sensitive(true);
                v
            })
            .map_err(|_| Error::Config("Invalid credential format".to_string()))
    };

    if !ctx.is_cookie && !ctx.access_token.contains('=') {
        headers.insert(AUTHORIZATION, credential(format!("Bearer {}", ctx.access_token))?);
    } else {
        headers.insert(COOKIE, credential(ctx.access_token.clone())?);
    }

    for (name, value) in [
        (USER_EMAIL_HEADER, &ctx.email),
        (WORKSPACE_ID_HEADER, &ctx.workspace_id),
        (SUBDOMAIN_HEADER, &ctx.subdomain),
    ] {
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|_| Error::Config(format!("Invalid value for header '{name}'")))?;
        headers.insert(HeaderName::from_static(name), value);
    }

    Ok(headers)
}

/// Compact JSON of `body`, cut to [`MAX_MESSAGE_LEN`] characters for logging
fn preview(body: &Value) -> String {
    let text = body.to_string();
    if text.chars().count() <= MAX_MESSAGE_LEN {
        return text;
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_LEN).collect();
    cut.push_str("...");
    cut
}

/// Classify a response as success or [`Error::Upstream`]
async fn classify(response: reqwest::Response) -> Result<UpstreamResponse> {
    let status = response.status();
    let text = response.text().await.map_err(|e| Error::Upstream {
        status: Some(status.as_u16()),
        message: format!("Failed to read response: {e}"),
    })?;

    classify_body(status, &text)
}

fn classify_body(status: StatusCode, text: &str) -> Result<UpstreamResponse> {
    let parsed = serde_json::from_str::<Value>(text).ok();
    let success = parsed
        .as_ref()
        .and_then(|v| v.get("success"))
        .and_then(Value::as_bool);

    if !status.is_success() || success == Some(false) {
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                (parsed.is_none() && !text.trim().is_empty())
                    .then(|| text.trim().chars().take(MAX_MESSAGE_LEN).collect())
            })
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown error")
                    .to_string()
            });
        return Err(Error::Upstream {
            status: Some(status.as_u16()),
            message,
        });
    }

    let body = parsed.ok_or_else(|| Error::Upstream {
        status: Some(status.as_u16()),
        message: "Failed to parse response: body is not JSON".to_string(),
    })?;

    Ok(UpstreamResponse {
        status: status.as_u16(),
        success,
        body,
    })
}
