//! Identity diagnostic tool

use async_trait::async_trait;
use serde_json::{Value, json};

use super::Operation;
use crate::Result;
use crate::auth::AuthContext;
use crate::protocol::{Tool, ToolAnnotations, ToolsCallResult};

/// Reports the identity a call resolves to, without the credential
pub struct WhoAmI;

#[async_trait]
impl Operation for WhoAmI {
    fn tool(&self) -> Tool {
        Tool {
            name: "whoami".to_string(),
            title: Some("Who Am I".to_string()),
            description: Some(
                "Show the workspace, subdomain and user this session is authenticated as"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            annotations: Some(ToolAnnotations {
                read_only_hint: Some(true),
                ..Default::default()
            }),
        }
    }

    async fn call(&self, _input: Value, ctx: AuthContext) -> Result<ToolsCallResult> {
        let mut identity = serde_json::to_value(&ctx)?;
        if let Some(fields) = identity.as_object_mut() {
            fields.insert("credentialKind".to_string(), json!(ctx.credential_kind()));
        }
        ToolsCallResult::json(&identity)
    }
}
