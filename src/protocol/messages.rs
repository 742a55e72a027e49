//! Message Formatting

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use crate::registry::ClientId;

/// Greeting sent to a client right after it is registered
pub fn welcome_message(id: ClientId) -> Bytes {
    Bytes::from(format!("{}{}{}", WELCOME_PREFIX, id, WELCOME_SUFFIX))
}

/// Prefix `body` with the sender's id; the body is copied verbatim
pub fn relay_message(id: ClientId, body: &[u8]) -> Bytes {
    let prefix = format!("{}{}{}", RELAY_PREFIX, id, RELAY_SEPARATOR);
    let mut framed = BytesMut::with_capacity(prefix.len() + body.len());
    framed.put_slice(prefix.as_bytes());
    framed.put_slice(body);
    framed.freeze()
}
