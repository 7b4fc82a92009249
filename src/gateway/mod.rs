//! Gateway: auth middleware and the MCP server in front of it

pub mod auth;
mod server;

pub use auth::{AuthGateway, AuthStrategy, CallContext};
pub use server::McpServer;
