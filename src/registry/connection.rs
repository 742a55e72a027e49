//! Registered connection state

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Positional client identity: always `slot index + 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(usize);

impl ClientId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub(crate) fn from_slot(slot: usize) -> Self {
        Self(slot + 1)
    }

    /// Slot index this id maps to, `None` for the invalid id 0
    pub(crate) fn slot(self) -> Option<usize> {
        self.0.checked_sub(1)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live client session as seen by the registry.
///
/// The connection owns the write side of the client's transport; dropping
/// it closes that side.
#[derive(Debug)]
pub struct Connection<W> {
    id: ClientId,
    writer: W,
    remote_addr: SocketAddr,
    connected_at: Instant,
}

impl<W> Connection<W> {
    pub(crate) fn new(id: ClientId, writer: W, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            writer,
            remote_addr,
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }
}
