//! Relay Protocol Constants

// Transport defaults
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_CLIENTS: usize = 10;

// Read buffer size; one byte is kept in reserve, so reads are capped at 1023
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

// Message templates
pub const WELCOME_PREFIX: &str = "Welcome, Client ";
pub const WELCOME_SUFFIX: &str = "!\n";
pub const RELAY_PREFIX: &str = "Client ";
pub const RELAY_SEPARATOR: &str = ": ";

pub const LINE_DELIMITER: u8 = b'\n';
