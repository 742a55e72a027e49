//! Broadcast Relay Module
//! 
//! Fans inbound messages out to every other registered connection.

pub mod broadcaster;
pub mod framing;
pub mod stats;

pub use broadcaster::{BroadcastReport, Broadcaster};
pub use framing::MessageFramer;
pub use stats::{RelayStats, RelayStatsSnapshot};
