//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Skarya MCP server - authenticated board/task tools over stdio
#[derive(Parser, Debug)]
#[command(name = "skarya-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SKARYA_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SKARYA_MCP_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SKARYA_MCP_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve MCP over stdio (default)
    Serve,

    /// Load and validate configuration, then exit
    CheckConfig {
        /// Print the effective configuration as YAML (credentials redacted)
        #[arg(long)]
        print: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["skarya-mcp"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_check_config_with_global_flags() {
        let cli = Cli::try_parse_from([
            "skarya-mcp",
            "check-config",
            "--config",
            "skarya.yaml",
            "--log-format",
            "json",
            "--print",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Command::CheckConfig { print: true })));
        assert_eq!(cli.config, Some(PathBuf::from("skarya.yaml")));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
