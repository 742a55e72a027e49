//! Broadcaster

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::RelayStats;
use crate::registry::{ClientId, Registry};

/// Outcome of one broadcast call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Delivers messages to registered connections.
///
/// Writes run on the calling task while the registry lock is held. A failed
/// write is logged and skipped; the failing connection stays registered
/// until its own handler removes it.
pub struct Broadcaster<W> {
    registry: Arc<Registry<W>>,
    send_timeout: Duration,
    stats: Arc<RelayStats>,
}

impl<W> Broadcaster<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(registry: Arc<Registry<W>>, send_timeout: Duration, stats: Arc<RelayStats>) -> Self {
        Self {
            registry,
            send_timeout,
            stats,
        }
    }

    pub fn registry(&self) -> &Arc<Registry<W>> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Write `payload` verbatim to every registered connection except `sender`
    pub async fn broadcast(&self, sender: ClientId, payload: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut peers = self.registry.lock_peers().await;

        for conn in peers.except(sender) {
            let recipient = conn.id();
            match write_bounded(conn.writer_mut(), payload, self.send_timeout).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Send error to client {} ({}): {}", recipient, conn.remote_addr(), e);
                    report.failed += 1;
                }
            }
        }
        drop(peers);

        debug!(
            "Broadcast from client {}: {} bytes to {} recipients ({} failed)",
            sender,
            payload.len(),
            report.recipients(),
            report.failed
        );
        self.stats.record_broadcast(&report);
        report
    }

    /// Write `payload` to the single connection registered as `id`
    pub async fn send_to(&self, id: ClientId, payload: &[u8]) -> io::Result<()> {
        let mut peers = self.registry.lock_peers().await;
        let conn = peers.get_mut(id).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("client {} is not registered", id))
        })?;

        write_bounded(conn.writer_mut(), payload, self.send_timeout).await
    }
}

async fn write_bounded<W>(writer: &mut W, payload: &[u8], limit: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let write = async {
        writer.write_all(payload).await?;
        writer.flush().await
    };

    match timeout(limit, write).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("send timed out after {:?}", limit),
        )),
    }
}
