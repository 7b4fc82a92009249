//! MCP protocol types (tool subset)

mod messages;
mod types;

pub use messages::*;
pub use types::*;

/// Latest MCP protocol version spoken by this server
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Protocol versions accepted on `initialize`, newest first
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-03-26", "2024-11-05"];

/// Pick the version to answer `initialize` with: the client's if supported,
/// otherwise the latest.
#[must_use]
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(PROTOCOL_VERSION)
}
