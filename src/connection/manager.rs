//! Connection Manager Implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use super::handler::ConnectionHandler;
use crate::config::Config;
use crate::registry::{Registry, RegistryError};
use crate::relay::{Broadcaster, RelayStats, RelayStatsSnapshot};
use crate::Result;

/// Accepts TCP connections, registers them and spawns their handlers
pub struct ConnectionManager {
    listener: Option<TcpListener>,
    config: Arc<Config>,
    registry: Arc<Registry<OwnedWriteHalf>>,
    broadcaster: Arc<Broadcaster<OwnedWriteHalf>>,
    stats: Arc<RelayStats>,
    active_connections: Arc<AtomicUsize>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>) -> Self {
        let registry = Arc::new(Registry::new(config.server.max_clients));
        let stats = Arc::new(RelayStats::new());
        let broadcaster = Arc::new(Broadcaster::new(
            Arc::clone(&registry),
            config.server.send_timeout,
            Arc::clone(&stats),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            listener: None,
            config,
            registry,
            broadcaster,
            stats,
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Bind the listening socket. Failing here is a setup failure.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let bind_addr = self.config.server.bind_addr;

        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind listener to {}", bind_addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        info!("Chat server started on {}", local_addr);
        self.listener = Some(listener);
        Ok(local_addr)
    }

    /// Bind if needed, then accept connections until shutdown
    pub async fn start(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind().await?;
        }

        self.accept_connections().await
    }

    /// Main connection acceptance loop
    pub async fn accept_connections(&self) -> Result<()> {
        let listener = self.listener.as_ref()
            .ok_or_else(|| anyhow::anyhow!("Listener not initialized"))?;

        debug!("Starting connection acceptance loop");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.is_shutting_down() {
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.handle_accepted(stream, addr).await,
                        Err(e) => {
                            // Accept failures are transient; keep serving
                            error!("Accept failed: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        info!("Connection acceptance loop stopped");
        Ok(())
    }

    /// Register an accepted stream or reject it when every slot is taken
    async fn handle_accepted(&self, stream: TcpStream, addr: SocketAddr) {
        // Subscribe before checking the flag so a concurrent shutdown is not missed
        let shutdown_rx = self.shutdown_tx.subscribe();
        if self.is_shutting_down() {
            debug!("Rejecting connection from {} due to shutdown", addr);
            return;
        }

        let (reader, writer) = stream.into_split();

        let id = match self.registry.try_insert(writer, addr).await {
            Ok(id) => id,
            Err(RegistryError::CapacityExceeded { capacity }) => {
                // The write half was dropped by the registry; dropping the read
                // half closes the socket without sending anything
                self.stats.record_rejected();
                warn!("Max clients connected ({}). Connection from {} rejected.", capacity, addr);
                return;
            }
        };

        self.stats.record_accepted();
        info!("Client {} connected from {}", id, addr);

        let handler = ConnectionHandler::new(
            id,
            addr,
            reader,
            Arc::clone(&self.broadcaster),
            &self.config.server,
            shutdown_rx,
        );
        let active_connections = Arc::clone(&self.active_connections);
        active_connections.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let summary = handler.run().await;
            debug!(
                "Handler for client {} finished: {:?} ({} bytes received)",
                summary.id, summary.outcome, summary.bytes_received
            );
            active_connections.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Number of running connection handlers
    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Get the bind address if listener is initialized
    pub fn get_bind_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    pub fn registry(&self) -> &Arc<Registry<OwnedWriteHalf>> {
        &self.registry
    }

    /// Get connection statistics
    pub async fn get_connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            active_clients: self.registry.len().await,
            max_clients: self.registry.capacity(),
            relay: self.stats.snapshot(),
        }
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::SeqCst);

        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No receivers for shutdown signal: {}", e);
        }
    }

    /// Get a shutdown receiver for external components
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// Wait for all handlers to finish, up to the configured shutdown timeout.
    /// Returns whether every connection closed in time.
    pub async fn wait_for_connections_to_close(&self) -> bool {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        debug!("Waiting for {} active connections to close (timeout: {:?})",
               self.get_active_connections(), shutdown_timeout);

        while self.get_active_connections() > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.get_active_connections();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All connections closed gracefully in {:?}", elapsed);
            true
        } else {
            warn!("Shutdown timeout reached after {:?} with {} connections still active",
                  elapsed, remaining);
            false
        }
    }

    /// Gracefully shutdown the connection manager
    pub async fn shutdown(&self) -> bool {
        self.initiate_shutdown();
        self.wait_for_connections_to_close().await
    }
}

/// Connection statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub active_clients: usize,
    pub max_clients: usize,
    pub relay: RelayStatsSnapshot,
}
