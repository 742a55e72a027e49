//! Configuration Module
//! 
//! Handles configuration loading, validation, and management.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::*;
