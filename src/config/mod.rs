//! Configuration management module
//!
//! Handles loading, validation, and management of bridge configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging level
    pub log_level: String,

    /// Gateway listener configuration
    pub server: ServerConfig,

    /// Supervised process spawn configuration
    pub process: ProcessConfig,

    /// Attach client configuration
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port for both HTTP liveness queries and WebSocket upgrades
    pub port: u16,

    /// Origin allowed to query the liveness path cross-origin
    pub allowed_origin: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Executable name or path
    pub program: String,

    /// Argument list passed verbatim to the process
    pub args: Vec<String>,

    /// Working directory the process is spawned in
    pub working_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base HTTP URL of the bridge, e.g. http://127.0.0.1:8080
    pub server_url: String,

    /// Fixed retry interval between probe/attach attempts in milliseconds
    pub retry_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig::default(),
            process: ProcessConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            args: vec![
                "-Xmx1024M".to_string(),
                "-Xms1024M".to_string(),
                "-jar".to_string(),
                "minecraft_server.1.18.1.jar".to_string(),
                "nogui".to_string(),
            ],
            working_dir: ".".to_string(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            retry_interval_ms: 5000,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // PROCBRIDGE_LOG_LEVEL - logging level
        if let Ok(log_level) = env::var("PROCBRIDGE_LOG_LEVEL") {
            self.log_level = log_level;
        }

        // PROCBRIDGE_PORT - gateway listener port
        if let Ok(port) = env::var("PROCBRIDGE_PORT") {
            if let Ok(value) = port.parse::<u16>() {
                self.server.port = value;
            }
        }

        // PROCBRIDGE_ALLOWED_ORIGIN - CORS origin for the liveness path
        if let Ok(origin) = env::var("PROCBRIDGE_ALLOWED_ORIGIN") {
            if !origin.trim().is_empty() {
                self.server.allowed_origin = origin;
            }
        }

        // PROCBRIDGE_PROGRAM - supervised executable
        if let Ok(program) = env::var("PROCBRIDGE_PROGRAM") {
            if !program.trim().is_empty() {
                self.process.program = program;
            }
        }

        // PROCBRIDGE_ARGS - comma-separated argument list
        if let Ok(args) = env::var("PROCBRIDGE_ARGS") {
            self.process.args = args
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // PROCBRIDGE_WORKING_DIR - process working directory
        if let Ok(dir) = env::var("PROCBRIDGE_WORKING_DIR") {
            if !dir.trim().is_empty() {
                self.process.working_dir = dir;
            }
        }

        // PROCBRIDGE_SERVER_URL - bridge URL used by the attach client
        if let Ok(url) = env::var("PROCBRIDGE_SERVER_URL") {
            if !url.trim().is_empty() {
                self.client.server_url = url;
            }
        }

        // PROCBRIDGE_RETRY_INTERVAL_MS - fixed client retry interval
        if let Ok(interval) = env::var("PROCBRIDGE_RETRY_INTERVAL_MS") {
            if let Ok(value) = interval.parse::<u64>() {
                self.client.retry_interval_ms = value;
            }
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.process.program.trim().is_empty() {
            anyhow::bail!("Process program must not be empty");
        }

        if self.process.working_dir.trim().is_empty() {
            anyhow::bail!("Process working directory must not be empty");
        }

        if self.server.allowed_origin.trim().is_empty() {
            anyhow::bail!("Allowed origin must not be empty");
        }

        if self.client.server_url.trim().is_empty() {
            anyhow::bail!("Client server URL must not be empty");
        }

        if !self.client.server_url.starts_with("http://")
            && !self.client.server_url.starts_with("https://")
        {
            anyhow::bail!("Client server URL must be an http(s) URL");
        }

        if self.client.retry_interval_ms == 0 {
            anyhow::bail!("Client retry interval must be greater than 0");
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        println!("Current configuration:");
        println!("{:#?}", self);
        Ok(())
    }

    /// Display configuration management help
    pub fn display_help() -> Result<()> {
        println!("Configuration management commands:");
        println!("  procbridge config show  - Show current configuration");
        println!("  procbridge config reset - Show default configuration");
        Ok(())
    }

    /// Handle configuration command
    pub fn handle_command(action: &Option<crate::cli::ConfigAction>, config_file: &str) -> Result<()> {
        match action {
            Some(crate::cli::ConfigAction::Show) => {
                let config = Config::load_or_default(config_file);
                config.display()?;
            }
            Some(crate::cli::ConfigAction::Reset) => {
                let default_config = Config::default();
                default_config.display()?;
            }
            None => {
                Config::display_help()?;
            }
        }
        Ok(())
    }
}
