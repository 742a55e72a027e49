//! Connection Management Module
//! 
//! Handles TCP connection acceptance, the per-connection read loop, and
//! connection lifecycle.

pub mod handler;
pub mod manager;

pub use handler::{ConnectionHandler, HandlerOutcome, HandlerState, HandlerSummary};
pub use manager::{ConnectionManager, ConnectionStats};
