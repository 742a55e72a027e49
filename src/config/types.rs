//! Configuration Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::protocol::constants::{DEFAULT_MAX_CLIENTS, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Number of registry slots; ids are always in `1..=max_clients`
    pub max_clients: usize,
    /// Size of the per-connection read buffer. One byte is reserved, so a
    /// single read returns at most `max_message_size - 1` bytes.
    pub max_message_size: usize,
    /// Upper bound on a single write to one peer during a broadcast
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub framing: FramingMode,
}

/// How inbound bytes are cut into relayed messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Every successful read is relayed as one message
    #[default]
    Chunk,
    /// Newline-terminated lines are relayed individually
    Line,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_clients: DEFAULT_MAX_CLIENTS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            send_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            framing: FramingMode::Chunk,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Maximum number of bytes handed back by one read
    pub fn read_limit(&self) -> usize {
        self.max_message_size.saturating_sub(1).max(1)
    }
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingMode::Chunk => write!(f, "chunk"),
            FramingMode::Line => write!(f, "line"),
        }
    }
}

impl FromStr for FramingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chunk" => Ok(FramingMode::Chunk),
            "line" => Ok(FramingMode::Line),
            other => Err(anyhow::anyhow!("unknown framing mode '{}', expected 'chunk' or 'line'", other)),
        }
    }
}
