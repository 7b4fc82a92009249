//! Skarya MCP - authenticated board/task tools over MCP stdio

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use skarya_mcp::{
    cli::{Cli, Command},
    config::Config,
    gateway::McpServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match &cli.command {
        Some(Command::CheckConfig { print }) => run_check_config(&cli, *print),
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Validate configuration and report the resolved posture
fn run_check_config(cli: &Cli, print: bool) -> ExitCode {
    match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            println!("✅ Configuration valid");
            if let Some(ref api_url) = config.upstream.api_url {
                println!("   API: {api_url}");
            }
            if config.auth.bypass_enabled() {
                println!(
                    "   Auth: development bypass ({}/{})",
                    config.auth.dev.workspace_id, config.auth.dev.subdomain
                );
            } else if let Some(ref auth_url) = config.upstream.auth_url {
                println!("   Auth: token exchange at {auth_url}");
                println!("   Seeded sessions: {}", config.auth.sessions.len());
            }
            if config.rate_limit.enabled {
                println!(
                    "   Rate limit: {} per {:?} ({:?})",
                    config.rate_limit.max_per_window,
                    config.rate_limit.window,
                    config.rate_limit.strategy
                );
            } else {
                println!("   Rate limit: disabled");
            }
            if print {
                match config.to_redacted_yaml() {
                    Ok(yaml) => println!("\n{yaml}"),
                    Err(e) => {
                        eprintln!("❌ {e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: &Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %config.server.name,
        development = config.auth.development,
        "Starting Skarya MCP server"
    );

    let server = match McpServer::from_config(&config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        result = server.run_stdio() => {
            if let Err(e) = result {
                error!("Server error: {e}");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}
