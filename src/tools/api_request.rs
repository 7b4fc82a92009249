//! Generic authenticated call to the board/task API

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use super::Operation;
use crate::auth::AuthContext;
use crate::protocol::{Tool, ToolAnnotations, ToolsCallResult};
use crate::upstream::RequestDispatcher;
use crate::{Error, Result};

/// Endpoints must live under this prefix
const API_PREFIX: &str = "/api/";

/// Methods the tool will forward
const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiRequestInput {
    endpoint: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    query: BTreeMap<String, String>,
}

impl ApiRequestInput {
    fn parse(input: Value) -> Result<Self> {
        let input: Self = serde_json::from_value(input)
            .map_err(|e| Error::InvalidInput(format!("api_request: {e}")))?;

        if !input.endpoint.starts_with(API_PREFIX) {
            return Err(Error::InvalidInput(format!(
                "endpoint must start with '{API_PREFIX}'"
            )));
        }
        if input.endpoint.contains("://") || input.endpoint.contains("..") {
            return Err(Error::InvalidInput(
                "endpoint must be a plain API path".to_string(),
            ));
        }

        Ok(input)
    }

    fn method(&self) -> Result<Method> {
        let method = self.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(Error::InvalidInput(format!("unsupported method '{method}'")));
        }
        Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::InvalidInput(format!("unsupported method '{method}'")))
    }
}

/// Forwards one request to the upstream API with the caller's credential
pub struct ApiRequest {
    dispatcher: Arc<RequestDispatcher>,
}

impl ApiRequest {
    /// Create the tool over a shared dispatcher
    pub fn new(dispatcher: Arc<RequestDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Operation for ApiRequest {
    fn tool(&self) -> Tool {
        Tool {
            name: "api_request".to_string(),
            title: Some("API Request".to_string()),
            description: Some(
                "Call a board/task API endpoint as the authenticated user and return its data"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "endpoint": {
                        "type": "string",
                        "description": "API path, e.g. /api/boards/getBoards"
                    },
                    "method": {
                        "type": "string",
                        "enum": ALLOWED_METHODS,
                        "default": "GET"
                    },
                    "body": {
                        "type": "object",
                        "description": "JSON payload"
                    },
                    "query": {
                        "type": "object",
                        "additionalProperties": { "type": "string" },
                        "description": "Query string parameters"
                    }
                },
                "required": ["endpoint"]
            }),
            // Forwards DELETE
            annotations: Some(ToolAnnotations {
                read_only_hint: Some(false),
                destructive_hint: Some(true),
                open_world_hint: Some(true),
            }),
        }
    }

    async fn call(&self, input: Value, ctx: AuthContext) -> Result<ToolsCallResult> {
        let input = ApiRequestInput::parse(input)?;
        let method = input.method()?;
        let query: Vec<(&str, &str)> = input
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let response = self
            .dispatcher
            .dispatch_with_query(&input.endpoint, method, &query, input.body.as_ref(), &ctx)
            .await?;

        ToolsCallResult::json(response.data())
    }
}
