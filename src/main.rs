//! Chat Relay - TCP text broadcast relay server
//!
//! Every chunk a client sends is relayed to all other connected clients,
//! prefixed with the sender's id.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_relay::{
    config::{ConfigManager, FramingMode},
    Config, ConnectionManager, ShutdownCoordinator,
};

/// CLI arguments for Chat Relay
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(about = "Chat Relay - TCP text broadcast relay server")]
#[command(version)]
#[command(long_about = "
Chat Relay - TCP text broadcast relay server

Clients connect over TCP and receive \"Welcome, Client <id>!\". Whatever a
client sends is relayed to every other client as \"Client <id>: <bytes>\".
Connections beyond the client limit are closed without a reply.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file (when present)
3. Environment variables
4. Built-in defaults

Environment variables:
  CHAT_RELAY_BIND_ADDR         - Bind address (e.g., 0.0.0.0:8080)
  CHAT_RELAY_MAX_CLIENTS       - Maximum concurrent clients
  CHAT_RELAY_MAX_MESSAGE_SIZE  - Read buffer size in bytes
  CHAT_RELAY_SEND_TIMEOUT      - Per-peer send timeout (e.g., 5s, 500ms)
  CHAT_RELAY_FRAMING           - Message framing (chunk, line)
  CHAT_RELAY_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "chat-relay.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:8080)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Maximum number of concurrent clients
    #[arg(long, help = "Maximum number of concurrent clients")]
    pub max_clients: Option<usize>,

    /// Read buffer size in bytes
    #[arg(long, help = "Read buffer size in bytes")]
    pub max_message_size: Option<usize>,

    /// Message framing: chunk or line
    #[arg(long, help = "Message framing (chunk, line)")]
    pub framing: Option<FramingMode>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = load_config(&args)?;

    init_tracing(&args, &config)?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Max clients: {}", config.server.max_clients);
        info!("  Max message size: {} bytes", config.server.max_message_size);
        info!("  Send timeout: {:?}", config.server.send_timeout);
        info!("  Framing: {}", config.server.framing);
        return Ok(());
    }

    info!("Starting Chat Relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Max clients: {}, framing: {}",
        config.server.max_clients, config.server.framing
    );

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);

    let mut connection_manager = ConnectionManager::new(Arc::new(config));
    connection_manager
        .bind()
        .await
        .context("Server setup failed")?;
    let connection_manager = Arc::new(connection_manager);

    let server_handle = {
        let manager = Arc::clone(&connection_manager);
        tokio::spawn(async move {
            if let Err(e) = manager.accept_connections().await {
                error!("Server error: {}", e);
            }
        })
    };

    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
    }

    shutdown_coordinator
        .shutdown_connection_manager(&connection_manager)
        .await?;

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Load configuration with priority: CLI args > config file > environment > defaults
fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = ConfigManager::load_layered(&args.config, |key| std::env::var(key).ok())?;

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_clients,
        args.max_message_size,
        args.framing,
    )?;

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    Ok(config)
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
