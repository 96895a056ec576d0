//! Command Line Interface module
//!
//! Implements the CLI commands and argument parsing for ProcBridge.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "procbridge")]
#[command(about = "ProcBridge Process Console Bridge")]
#[command(
    long_about = "Supervises one external process and relays its console to WebSocket sessions"
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    #[arg(long, default_value = "config.toml")]
    pub config_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the bridge: spawn the supervised process and serve sessions
    Serve,

    /// Attach an interactive console session to a running bridge
    Attach,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show default configuration
    Reset,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Effective log level, with --verbose forcing debug
    pub fn effective_log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }
}
