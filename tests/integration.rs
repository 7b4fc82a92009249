//! Integration tests for the Skarya MCP server

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skarya_mcp::config::{Config, RateLimitStrategy};
use skarya_mcp::error::rpc_codes;
use skarya_mcp::gateway::McpServer;
use skarya_mcp::protocol::{
    JsonRpcResponse, PROTOCOL_VERSION, RequestId, SUPPORTED_VERSIONS, ToolsCallParams,
    negotiate_version,
};

#[test]
fn test_protocol_version() {
    assert_eq!(PROTOCOL_VERSION, "2025-03-26");
    assert!(SUPPORTED_VERSIONS.contains(&"2024-11-05"));
}

#[test]
fn test_version_negotiation() {
    // Client requests supported version - gets it back
    assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");

    // Client requests unknown version - gets latest as fallback
    assert_eq!(negotiate_version("2023-01-01"), PROTOCOL_VERSION);
}

#[test]
fn test_request_id_display() {
    assert_eq!(RequestId::Number(42).to_string(), "42");
    assert_eq!(RequestId::String("test-123".to_string()).to_string(), "test-123");
}

#[test]
fn test_tools_call_params_session_meta() {
    let params: ToolsCallParams = serde_json::from_value(json!({
        "name": "whoami",
        "_meta": {"sessionId": "s1"}
    }))
    .unwrap();
    assert_eq!(params.meta.unwrap().session_id.as_deref(), Some("s1"));
    assert!(params.arguments.is_null());
}

#[test]
fn test_error_response_serialization() {
    let response = JsonRpcResponse::error(Some(RequestId::Number(1)), -32601, "Method not found");
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["error"]["code"], -32601);
    assert!(value.get("result").is_none());
}

fn write_config(dir: &tempfile::TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("skarya.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(yaml.as_bytes()).unwrap();
    path
}

#[test]
fn test_config_load_with_seeded_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
upstream:
  api_url: https://api.example.com
  auth_url: https://auth.example.com
  request_timeout: 5s
auth:
  sessions:
    - session_id: s1
      user_id: u1
      workspace_id: w1
      subdomain: acme
      scopes: [boards]
      expires_at: 2099-01-01T00:00:00Z
rate_limit:
  strategy: gcra
  window: 1m
  max_per_window: 30
"#,
    );

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.upstream.request_timeout, Duration::from_secs(5));
    assert_eq!(config.auth.sessions.len(), 1);
    assert_eq!(config.auth.sessions[0].workspace_id, "w1");
    assert_eq!(config.rate_limit.strategy, RateLimitStrategy::Gcra);
    assert_eq!(config.rate_limit.window, Duration::from_secs(60));
    assert!(!config.auth.bypass_enabled());

    assert!(McpServer::from_config(&config).is_ok());
}

#[test]
fn test_config_rejects_missing_auth_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "upstream:\n  api_url: https://api.example.com\n");
    assert!(Config::load(Some(&path)).is_err());
}

async fn run_session(server: McpServer, lines: &[Value]) -> Vec<JsonRpcResponse> {
    let input = lines
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");

    let (client, server_end) = tokio::io::duplex(64 * 1024);
    Arc::new(server)
        .run(BufReader::new(input.as_bytes()), server_end)
        .await
        .unwrap();

    let mut responses = Vec::new();
    let mut reader = BufReader::new(client).lines();
    while let Some(line) = reader.next_line().await.unwrap() {
        responses.push(serde_json::from_str(&line).unwrap());
    }
    responses
}

fn by_id(responses: &[JsonRpcResponse], id: i64) -> &JsonRpcResponse {
    responses
        .iter()
        .find(|r| r.id == Some(RequestId::Number(id)))
        .unwrap()
}

/// Full MCP session in development bypass mode against a mocked API
#[tokio::test]
async fn test_stdio_session_in_bypass_mode() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/boards/getBoards"))
        .and(header("authorization", "Bearer devtoken"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": [{"id": "b1"}]})),
        )
        .mount(&api)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/boards/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Board not found"})))
        .mount(&api)
        .await;

    let mut config = Config::default();
    config.upstream.api_url = Some(api.uri());
    config.auth.development = true;
    config.auth.dev.access_token = Some("devtoken".to_string());
    config.auth.dev.workspace_id = "w-dev".to_string();
    config.auth.dev.subdomain = "dev".to_string();
    config.validate().unwrap();

    let server = McpServer::from_config(&config).unwrap();
    let responses = run_session(
        server,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "it", "version": "1"}
            }}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {
                "name": "api_request",
                "arguments": {"endpoint": "/api/boards/getBoards"}
            }}),
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call", "params": {
                "name": "api_request",
                "arguments": {"endpoint": "/api/boards/missing"}
            }}),
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call", "params": {
                "name": "delete_everything"
            }}),
        ],
    )
    .await;

    assert_eq!(responses.len(), 5);

    let init = by_id(&responses, 1).result.as_ref().unwrap();
    assert_eq!(init["serverInfo"]["name"], "Skarya MCP Server");

    let tools = by_id(&responses, 2).result.as_ref().unwrap();
    assert_eq!(tools["tools"].as_array().unwrap().len(), 2);

    let call = by_id(&responses, 3).result.as_ref().unwrap();
    let text = call["content"][0]["text"].as_str().unwrap();
    assert_eq!(serde_json::from_str::<Value>(text).unwrap(), json!([{"id": "b1"}]));

    let error = by_id(&responses, 4).error.as_ref().unwrap();
    assert_eq!(error.code, rpc_codes::UPSTREAM_ERROR);
    assert_eq!(error.message, "API Error 404: Board not found");
    assert_eq!(error.data.as_ref().unwrap()["status"], 404);

    let error = by_id(&responses, 5).error.as_ref().unwrap();
    assert_eq!(error.code, rpc_codes::INVALID_PARAMS);
}
