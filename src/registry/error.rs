//! Registry error types.

use thiserror::Error;

/// Errors produced by registry operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot is occupied; the caller must reject the connection
    #[error("registry is full ({capacity} clients connected)")]
    CapacityExceeded { capacity: usize },
}
