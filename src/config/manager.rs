//! Configuration Manager

use super::{Config, FramingMode};
use crate::Result;
use anyhow::{Context, bail};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const ENV_BIND_ADDR: &str = "CHAT_RELAY_BIND_ADDR";
pub const ENV_MAX_CLIENTS: &str = "CHAT_RELAY_MAX_CLIENTS";
pub const ENV_MAX_MESSAGE_SIZE: &str = "CHAT_RELAY_MAX_MESSAGE_SIZE";
pub const ENV_SEND_TIMEOUT: &str = "CHAT_RELAY_SEND_TIMEOUT";
pub const ENV_FRAMING: &str = "CHAT_RELAY_FRAMING";
pub const ENV_LOG_LEVEL: &str = "CHAT_RELAY_LOG_LEVEL";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, falling back to defaults when it is absent
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config = Self::load_from_str(&content)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;

            tracing::debug!("Configuration loaded from {}", path.display());
            Ok(config)
        } else {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse and validate a TOML document
    pub fn load_from_str(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content)
            .context("Failed to parse configuration")?;

        config.validate()
            .context("Configuration validation failed")?;

        Ok(config)
    }

    /// Layer defaults, then environment, then the file at `path` if present.
    /// Keys set in the file win over the environment; keys it omits keep the
    /// environment or default value.
    pub fn load_layered<F>(path: &Path, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut base = Config::default();
        base.apply_env(lookup)?;

        if !path.exists() {
            base.validate()?;
            return Ok(base);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let file_table: toml::Table = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let mut merged = match toml::Value::try_from(&base)
            .context("Failed to serialize base configuration")?
        {
            toml::Value::Table(table) => table,
            other => bail!("Unexpected base configuration shape: {}", other.type_str()),
        };
        merge_tables(&mut merged, file_table);

        let config: Config = toml::Value::Table(merged)
            .try_into()
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;
        config.validate()
            .context("Configuration validation failed")?;

        tracing::debug!("Configuration loaded from {} over environment", path.display());
        Ok(config)
    }
}

fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match value {
            toml::Value::Table(nested) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, nested);
                } else {
                    base.insert(key, toml::Value::Table(nested));
                }
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

impl Config {
    /// Override fields from `CHAT_RELAY_*` variables resolved through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind_addr) = lookup(ENV_BIND_ADDR) {
            self.server.bind_addr = bind_addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid {}: {}", ENV_BIND_ADDR, bind_addr))?;
        }

        if let Some(max_clients) = lookup(ENV_MAX_CLIENTS) {
            self.server.max_clients = max_clients.parse::<usize>()
                .with_context(|| format!("Invalid {}: {}", ENV_MAX_CLIENTS, max_clients))?;
        }

        if let Some(size) = lookup(ENV_MAX_MESSAGE_SIZE) {
            self.server.max_message_size = size.parse::<usize>()
                .with_context(|| format!("Invalid {}: {}", ENV_MAX_MESSAGE_SIZE, size))?;
        }

        if let Some(timeout) = lookup(ENV_SEND_TIMEOUT) {
            self.server.send_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid {}: {}", ENV_SEND_TIMEOUT, timeout))?;
        }

        if let Some(framing) = lookup(ENV_FRAMING) {
            self.server.framing = framing.parse::<FramingMode>()
                .with_context(|| format!("Invalid {}: {}", ENV_FRAMING, framing))?;
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_clients == 0 {
            bail!("max_clients must be greater than 0");
        }

        if self.server.max_clients > 1024 {
            bail!("max_clients cannot exceed 1024");
        }

        if self.server.max_message_size < 2 {
            bail!("max_message_size must be at least 2 bytes");
        }

        if self.server.max_message_size > 1_048_576 {
            bail!("max_message_size cannot exceed 1MB");
        }

        if self.server.send_timeout.is_zero() {
            bail!("send_timeout must be greater than 0");
        }

        if self.server.shutdown_timeout > Duration::from_secs(600) {
            bail!("shutdown_timeout cannot exceed 10 minutes");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", VALID_LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_clients: Option<usize>,
        max_message_size: Option<usize>,
        framing: Option<FramingMode>,
    ) -> Result<()> {
        if let Some(bind_str) = bind {
            self.server.bind_addr = bind_str.parse::<SocketAddr>()
                .with_context(|| format!("Invalid bind address: {}", bind_str))?;
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
        }

        if let Some(max_clients) = max_clients {
            self.server.max_clients = max_clients;
        }

        if let Some(size) = max_message_size {
            self.server.max_message_size = size;
        }

        if let Some(framing) = framing {
            self.server.framing = framing;
        }

        Ok(())
    }
}
