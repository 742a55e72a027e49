//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM/SIGINT and drains the relay: the accept loop stops,
//! every handler unregisters its connection, and the process exits once the
//! handlers are gone or the timeout elapses.

use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Shutdown timeout duration
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(())
    }

    /// Stop the connection manager and wait for its connections to drain.
    ///
    /// The manager's own shutdown channel is the only one; accept loop and
    /// handlers are all subscribed to it.
    pub async fn shutdown_connection_manager(&self, connection_manager: &ConnectionManager) -> Result<()> {
        connection_manager.initiate_shutdown();

        let drained = tokio::time::timeout(
            self.timeout,
            connection_manager.wait_for_connections_to_close(),
        )
        .await
        .unwrap_or(false);

        let stats = connection_manager.get_connection_stats().await;
        info!(
            "Relay totals: {} accepted, {} rejected, {} messages relayed, {} deliveries, {} delivery failures",
            stats.relay.total_accepted,
            stats.relay.total_rejected,
            stats.relay.messages_relayed,
            stats.relay.deliveries,
            stats.relay.delivery_failures
        );

        if !drained {
            warn!("{} connections still active at shutdown", connection_manager.get_active_connections());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_reaches_manager_subscribers() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let manager = ConnectionManager::new(Arc::new(Config::default()));
        let mut receiver = manager.subscribe_shutdown();

        coordinator.shutdown_connection_manager(&manager).await.unwrap();

        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_idle_connection_manager() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let manager = ConnectionManager::new(Arc::new(Config::default()));

        coordinator.shutdown_connection_manager(&manager).await.unwrap();
        assert!(manager.is_shutting_down());
        assert_eq!(manager.get_active_connections(), 0);
    }
}
