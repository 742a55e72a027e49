//! Chat Relay Library
//!
//! A connection-oriented text broadcast relay: every chunk a client sends
//! is forwarded to all other currently-connected clients.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod shutdown;

pub use config::Config;
pub use connection::ConnectionManager;
pub use registry::{ClientId, Registry, RegistryError};
pub use relay::Broadcaster;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the relay server
pub type Result<T> = anyhow::Result<T>;
