//! Connection Registry Module
//! 
//! Owns the authoritative fixed-capacity set of live connections.

pub mod connection;
pub mod error;
pub mod slots;

pub use connection::{ClientId, Connection};
pub use error::RegistryError;
pub use slots::{PeersGuard, Registry};
