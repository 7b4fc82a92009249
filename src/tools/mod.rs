//! Tool surface exposed over MCP
//!
//! Each tool is an [`Operation`] receiving validated input and a resolved
//! [`AuthContext`]. The registry routes every call through the
//! [`AuthGateway`].

mod api_request;
mod whoami;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use api_request::ApiRequest;
pub use whoami::WhoAmI;

use crate::auth::AuthContext;
use crate::gateway::{AuthGateway, CallContext};
use crate::protocol::{Tool, ToolsCallResult};
use crate::upstream::RequestDispatcher;
use crate::{Error, Result};

/// A named operation callable as an MCP tool
#[async_trait]
pub trait Operation: Send + Sync {
    /// Tool definition advertised in `tools/list`
    fn tool(&self) -> Tool;

    /// Run the operation for an authenticated caller
    async fn call(&self, input: Value, ctx: AuthContext) -> Result<ToolsCallResult>;
}

/// Registered tools, listed in name order
#[derive(Default)]
pub struct ToolRegistry {
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools
    #[must_use]
    pub fn with_builtin(dispatcher: Arc<RequestDispatcher>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WhoAmI));
        registry.register(Arc::new(ApiRequest::new(dispatcher)));
        registry
    }

    /// Register an operation under its tool name, replacing any previous one
    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        let name = operation.tool().name;
        self.operations.insert(name, operation);
    }

    /// Look up an operation by tool name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    /// All tool definitions
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        self.operations.values().map(|op| op.tool()).collect()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether no tools are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Invoke a tool through the gateway
    ///
    /// # Errors
    ///
    /// [`Error::ToolNotFound`] for unknown names (checked before any auth
    /// work), otherwise whatever [`AuthGateway::invoke`] returns.
    pub async fn call(
        &self,
        gateway: &AuthGateway,
        call: &CallContext,
        arguments: Value,
    ) -> Result<ToolsCallResult> {
        let operation = self
            .get(&call.tool)
            .ok_or_else(|| Error::ToolNotFound(call.tool.clone()))?;

        gateway
            .invoke(call, arguments, |input, ctx| async move {
                operation.call(input, ctx).await
            })
            .await
    }
}
