//! Wire Protocol Module
//! 
//! There is no structured protocol: raw bytes over the stream, plus a
//! greeting on connect and an id prefix on every relayed message.

pub mod constants;
pub mod messages;

pub use messages::{relay_message, welcome_message};
