//! MCP server over stdio
//!
//! Newline-delimited JSON-RPC on stdin/stdout. Each `tools/call` runs as its
//! own task; responses are funneled through a single writer so lines never
//! interleave. Nothing but protocol messages is written to stdout.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{AuthGateway, AuthStrategy, CallContext};
use crate::auth::SessionStore;
use crate::config::Config;
use crate::error::rpc_codes;
use crate::failsafe::RateLimiter;
use crate::protocol::{
    Info, InitializeParams, InitializeResult, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    ServerCapabilities, ToolsCallParams, ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::tools::ToolRegistry;
use crate::upstream::RequestDispatcher;
use crate::{Error, Result};

/// Outbound responses buffered ahead of the writer
const RESPONSE_BUFFER: usize = 64;

/// MCP server exposing the tool registry behind the auth gateway
pub struct McpServer {
    info: Info,
    registry: Arc<ToolRegistry>,
    gateway: Arc<AuthGateway>,
}

impl McpServer {
    /// Create a server from its parts
    pub fn new(info: Info, registry: Arc<ToolRegistry>, gateway: Arc<AuthGateway>) -> Self {
        Self {
            info,
            registry,
            gateway,
        }
    }

    /// Wire store, gateway, dispatcher, and tools from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is incomplete or an HTTP client
    /// cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(SessionStore::from_seeds(&config.auth.sessions));
        let strategy = AuthStrategy::from_config(config, store)?;
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let gateway = Arc::new(AuthGateway::new(strategy, limiter));

        let api_url = config
            .upstream
            .api_url
            .as_deref()
            .ok_or_else(|| Error::Config("upstream.api_url is required".to_string()))?;
        let dispatcher = Arc::new(RequestDispatcher::new(
            api_url,
            config.upstream.request_timeout,
            config.upstream.connect_timeout,
        )?);
        let registry = Arc::new(ToolRegistry::with_builtin(dispatcher));

        let info = Info {
            name: config.server.name.clone(),
            version: config.server.version.clone(),
        };

        Ok(Self::new(info, registry, gateway))
    }

    /// Serve on the process's stdin/stdout until stdin closes
    ///
    /// # Errors
    ///
    /// Returns an error if stdin or stdout fails.
    pub async fn run_stdio(self: Arc<Self>) -> Result<()> {
        self.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve newline-delimited JSON-RPC from `reader` to `writer`
    ///
    /// Returns once the reader hits EOF and every in-flight call has answered.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub async fn run<R, W>(self: Arc<Self>, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(RESPONSE_BUFFER);

        let writer_task = tokio::spawn(async move {
            while let Some(response) = rx.recv().await {
                let mut line = match serde_json::to_vec(&response) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                        continue;
                    }
                };
                line.push(b'\n');
                writer.write_all(&line).await?;
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        info!(server = %self.info.name, tools = self.registry.len(), strategy = self.gateway.strategy().name(), "MCP server ready");

        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            if line.trim_ascii().is_empty() {
                continue;
            }

            match JsonRpcMessage::from_slice(&line) {
                Ok(JsonRpcMessage::Request(request)) if request.method == "tools/call" => {
                    let server = Arc::clone(&self);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let response = server.handle_request(request).await;
                        let _ = tx.send(response).await;
                    });
                }
                Ok(JsonRpcMessage::Request(request)) => {
                    let response = self.handle_request(request).await;
                    if tx.send(response).await.is_err() {
                        break;
                    }
                }
                Ok(JsonRpcMessage::Notification(notification)) => {
                    debug!(method = %notification.method, "Notification received");
                }
                Err(e) => {
                    warn!(error = %e, "Rejected message");
                    let response = JsonRpcResponse::error(None, e.to_rpc_code(), e.to_string());
                    if tx.send(response).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Input closed, draining in-flight calls");
        drop(tx);
        writer_task
            .await
            .map_err(|e| Error::Internal(format!("Writer task failed: {e}")))??;

        Ok(())
    }

    /// Answer one request
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        debug!(id = %id, method = %request.method, "Request received");
        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            method => {
                debug!(method = %method, "Unknown method");
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                );
            }
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error_with_data(
                Some(id),
                e.to_rpc_code(),
                e.to_string(),
                json!({ "kind": e.kind(), "status": e.status() }),
            ),
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value> {
        let params: InitializeParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| Error::InvalidInput(format!("initialize: {e}")))?;
        let version = negotiate_version(&params.protocol_version);
        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            requested = %params.protocol_version,
            negotiated = version,
            "Client initialized"
        );

        let result = InitializeResult {
            protocol_version: version.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: self.info.clone(),
        };
        Ok(serde_json::to_value(result)?)
    }

    fn handle_tools_list(&self) -> Result<Value> {
        let result = ToolsListResult {
            tools: self.registry.list(),
        };
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value> {
        let params: ToolsCallParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| Error::InvalidInput(format!("tools/call: {e}")))?;

        let call = CallContext::new(params.name, params.meta.and_then(|m| m.session_id));
        let arguments = if params.arguments.is_null() {
            json!({})
        } else {
            params.arguments
        };

        let result = self.registry.call(&self.gateway, &call, arguments).await?;
        Ok(serde_json::to_value(result)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use reqwest::Client;

    use super::*;
    use crate::auth::{ContextBuilder, FixedExchange, test_session};
    use crate::config::RateLimitConfig;
    use crate::protocol::RequestId;

    fn server() -> McpServer {
        let store = Arc::new(SessionStore::new());
        store.save("s1", test_session("s1", ChronoDuration::hours(1)));
        let strategy = AuthStrategy::Standard(ContextBuilder::new(store, FixedExchange::new("tok")));
        let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
            window: Duration::from_secs(60),
            ..Default::default()
        }));
        let dispatcher = RequestDispatcher::with_client(Client::new(), "http://127.0.0.1:9");
        McpServer::new(
            Info {
                name: "Skarya MCP Server".to_string(),
                version: "0.0.0".to_string(),
            },
            Arc::new(ToolRegistry::with_builtin(Arc::new(dispatcher))),
            Arc::new(AuthGateway::new(strategy, limiter)),
        )
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(id),
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let response = server()
            .handle_request(request(
                1,
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "1"}
                }),
            ))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "Skarya MCP Server");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = server().handle_request(request(2, "resources/list", json!({}))).await;
        assert_eq!(response.error.unwrap().code, rpc_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_tools_call_with_session_meta() {
        let response = server()
            .handle_request(request(
                3,
                "tools/call",
                json!({"name": "whoami", "arguments": {}, "_meta": {"sessionId": "s1"}}),
            ))
            .await;
        assert!(response.error.is_none());
        let text = response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(text.contains("\"workspaceId\": \"w1\""));
    }

    #[tokio::test]
    async fn test_tools_call_without_session_is_unauthorized() {
        let response = server()
            .handle_request(request(4, "tools/call", json!({"name": "whoami"})))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, rpc_codes::UNAUTHORIZED);
        assert!(error.message.starts_with("Authentication failed"));
        assert_eq!(error.data.unwrap()["kind"], "authentication_failed");
    }

    #[tokio::test]
    async fn test_run_answers_every_request_and_skips_notifications() {
        let input = [
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "not json",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"whoami","_meta":{"sessionId":"s1"}}}"#,
        ]
        .join("\n");

        let (client, server_end) = tokio::io::duplex(64 * 1024);
        Arc::new(server())
            .run(BufReader::new(input.as_bytes()), server_end)
            .await
            .unwrap();

        let mut output = String::new();
        let mut client = BufReader::new(client);
        while client.read_line(&mut output).await.unwrap() > 0 {}

        let responses: Vec<JsonRpcResponse> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 4);
        assert!(
            responses
                .iter()
                .any(|r| r.error.as_ref().is_some_and(|e| e.code == rpc_codes::PARSE_ERROR))
        );
        assert!(
            responses
                .iter()
                .any(|r| r.id == Some(RequestId::Number(3)) && r.result.is_some())
        );
    }

    #[tokio::test]
    async fn test_run_survives_invalid_utf8_and_malformed_ids() {
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#);
        input.push(b'\n');
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"p\xffng\"}\n");
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#);
        input.push(b'\n');
        input.extend_from_slice(br#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#);
        input.push(b'\n');

        let (client, server_end) = tokio::io::duplex(64 * 1024);
        Arc::new(server())
            .run(BufReader::new(input.as_slice()), server_end)
            .await
            .unwrap();

        let mut output = String::new();
        let mut client = BufReader::new(client);
        while client.read_line(&mut output).await.unwrap() > 0 {}

        let responses: Vec<JsonRpcResponse> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 4);

        let codes: Vec<i32> = responses
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| e.code))
            .collect();
        assert_eq!(codes, vec![rpc_codes::PARSE_ERROR, rpc_codes::INVALID_REQUEST]);
        assert!(
            responses
                .iter()
                .any(|r| r.id == Some(RequestId::Number(3)) && r.result.is_some())
        );
    }
}
