//! Skarya MCP Library
//!
//! MCP tool adapter for the Skarya board/task backend.
//!
//! # Features
//!
//! - **Session auth**: opaque MCP session ids resolved to short-lived upstream tokens
//! - **Development bypass**: static credentials selected once at startup
//! - **Rate limiting**: per-principal fixed window (or GCRA)
//! - **Upstream dispatch**: credential and identity headers, in-body failure detection
//! - **Transport**: MCP over stdio
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05 and 2025-03-26.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod gateway;
pub mod protocol;
pub mod tools;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// Logs go to stderr; stdout is reserved for the MCP protocol.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to initialize tracing: {e}")))
}
