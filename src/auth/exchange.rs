//! Short-lived token exchange
//!
//! Trades a session's identity claims for an upstream access token at the
//! internal auth service. Tokens are minted per call and never cached here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::Session;
use crate::{Error, Result};

/// Path of the exchange endpoint, relative to the authority base URL
const EXCHANGE_PATH: &str = "/token/exchange";

/// Token minted by the authority
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortLivedToken {
    /// Upstream access token
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: u64,
}

impl ShortLivedToken {
    /// Lifetime as a [`Duration`]
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.expires_in)
    }
}

/// Anything that can mint a short-lived token for a session
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Exchange the session's claims for a token. Must not retry internally.
    async fn exchange(&self, session: &Session) -> Result<ShortLivedToken>;
}

/// Exchange request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    user_id: &'a str,
    workspace_id: &'a str,
    subdomain: &'a str,
    scopes: &'a [String],
}

/// HTTP client for the token authority
pub struct TokenExchangeClient {
    http_client: Client,
    endpoint: String,
}

impl TokenExchangeClient {
    /// Create a client for the authority at `auth_url`.
    ///
    /// The timeout bounds how long a stalled authority can hold a tool call.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(auth_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(http_client, auth_url))
    }

    /// Create a client reusing an existing [`Client`]
    #[must_use]
    pub fn with_client(http_client: Client, auth_url: &str) -> Self {
        Self {
            http_client,
            endpoint: format!("{}{EXCHANGE_PATH}", auth_url.trim_end_matches('/')),
        }
    }

    /// Full URL of the exchange endpoint
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TokenExchange for TokenExchangeClient {
    async fn exchange(&self, session: &Session) -> Result<ShortLivedToken> {
        if session.user_id.is_empty()
            || session.workspace_id.is_empty()
            || session.subdomain.is_empty()
        {
            return Err(Error::UpstreamAuth {
                status: None,
                message: "Session is missing userId, workspaceId or subdomain".to_string(),
            });
        }

        let body = ExchangeRequest {
            user_id: &session.user_id,
            workspace_id: &session.workspace_id,
            subdomain: &session.subdomain,
            scopes: &session.scopes,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("X-Internal-Source", "MCP")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(user = %session.user_id, error = %e, "Token authority unreachable");
                Error::UpstreamAuth {
                    status: None,
                    message: format!("Token request failed: {e}"),
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            warn!(user = %session.user_id, status = status.as_u16(), error = %e, "Token response unreadable");
            Error::UpstreamAuth {
                status: Some(status.as_u16()),
                message: format!("Failed to read response: {e}"),
            }
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| {
                    if text.is_empty() {
                        status.canonical_reason().unwrap_or("Unknown error").to_string()
                    } else {
                        text.chars().take(500).collect()
                    }
                });
            warn!(user = %session.user_id, status = status.as_u16(), %message, "Token exchange rejected");
            return Err(Error::UpstreamAuth {
                status: Some(status.as_u16()),
                message,
            });
        }

        let token: ShortLivedToken = serde_json::from_str(&text).map_err(|e| Error::UpstreamAuth {
            status: Some(status.as_u16()),
            message: format!("Failed to parse token response: {e}"),
        })?;

        if token.access_token.is_empty() {
            return Err(Error::UpstreamAuth {
                status: Some(status.as_u16()),
                message: "Token response carried an empty accessToken".to_string(),
            });
        }

        debug!(user = %session.user_id, expires_in = token.expires_in, "Minted short-lived token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::session::tests::session;

    fn client(server: &MockServer) -> TokenExchangeClient {
        TokenExchangeClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let c = TokenExchangeClient::with_client(Client::new(), "https://auth.example.com/");
        assert_eq!(c.endpoint(), "https://auth.example.com/token/exchange");
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token/exchange"))
            .and(header("X-Internal-Source", "MCP"))
            .and(body_json(json!({
                "userId": "u1",
                "workspaceId": "w1",
                "subdomain": "acme",
                "scopes": ["boards"]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"accessToken": "tok123", "expiresIn": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .exchange(&session("s1", ChronoDuration::hours(1)))
            .await
            .unwrap();
        assert_eq!(token.access_token, "tok123");
        assert_eq!(token.lifetime(), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_exchange_rejection_preserves_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token/exchange"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "scope denied"})))
            .mount(&server)
            .await;

        let err = client(&server)
            .exchange(&session("s1", ChronoDuration::hours(1)))
            .await
            .unwrap_err();
        match err {
            Error::UpstreamAuth { status, message } => {
                assert_eq!(status, Some(403));
                assert_eq!(message, "scope denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_unexpected_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "nope"})))
            .mount(&server)
            .await;

        let err = client(&server)
            .exchange(&session("s1", ChronoDuration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamAuth { status: Some(200), .. }));
    }

    #[tokio::test]
    async fn test_exchange_empty_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"accessToken": "", "expiresIn": 60})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .exchange(&session("s1", ChronoDuration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamAuth { .. }));
    }

    #[tokio::test]
    async fn test_exchange_unreachable() {
        // Nothing listens on port 9 (discard) in the test environment
        let c = TokenExchangeClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = c
            .exchange(&session("s1", ChronoDuration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamAuth { status: None, .. }));
    }

    /// Serve one connection that promises a longer body than it sends
    async fn truncated_body_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            // Consume the whole request so closing the socket sends FIN, not RST
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{\"acc")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_exchange_body_read_failure_is_reported() {
        let base = truncated_body_server().await;
        let c = TokenExchangeClient::new(&base, Duration::from_secs(5)).unwrap();
        let err = c
            .exchange(&session("s1", ChronoDuration::hours(1)))
            .await
            .unwrap_err();
        match err {
            Error::UpstreamAuth { status, message } => {
                assert_eq!(status, Some(200));
                assert!(message.starts_with("Failed to read response"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_requires_identity() {
        let mut s = session("s1", ChronoDuration::hours(1));
        s.user_id.clear();
        let c = TokenExchangeClient::with_client(Client::new(), "http://127.0.0.1:9");
        let err = c.exchange(&s).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamAuth { status: None, .. }));
    }
}
