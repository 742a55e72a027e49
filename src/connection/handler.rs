//! Per-connection handler

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::protocol::{relay_message, welcome_message};
use crate::registry::ClientId;
use crate::relay::{Broadcaster, MessageFramer};

/// Lifecycle of a handler: `Greeting -> Reading -> Closing`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Greeting,
    Reading,
    Closing,
}

/// Why a handler reached `Closing`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Read returned zero bytes
    RemoteClosed,
    /// Read failed
    ReadError,
    /// Server shutdown was signalled
    Shutdown,
}

/// What a finished handler reports back to the acceptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSummary {
    pub id: ClientId,
    pub outcome: HandlerOutcome,
    pub messages_relayed: u64,
    pub bytes_received: u64,
}

/// Drives one registered connection.
///
/// The handler owns the read half of the transport and its read buffer; the
/// write half lives in the registry so peers can broadcast to it. Every exit
/// path goes through `close`, which unregisters the connection exactly once.
pub struct ConnectionHandler<R, W> {
    id: ClientId,
    session_id: Uuid,
    remote_addr: SocketAddr,
    reader: R,
    broadcaster: Arc<Broadcaster<W>>,
    framer: MessageFramer,
    read_limit: usize,
    shutdown_rx: broadcast::Receiver<()>,
    state: HandlerState,
    messages_relayed: u64,
    bytes_received: u64,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        id: ClientId,
        remote_addr: SocketAddr,
        reader: R,
        broadcaster: Arc<Broadcaster<W>>,
        server: &ServerConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let read_limit = server.read_limit();

        Self {
            id,
            session_id: Uuid::new_v4(),
            remote_addr,
            reader,
            broadcaster,
            framer: MessageFramer::new(server.framing, read_limit),
            read_limit,
            shutdown_rx,
            state: HandlerState::Greeting,
            messages_relayed: 0,
            bytes_received: 0,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Run the connection to completion
    #[instrument(name = "client", skip_all, fields(id = %self.id, session = %self.session_id, addr = %self.remote_addr))]
    pub async fn run(mut self) -> HandlerSummary {
        self.greet().await;

        self.state = HandlerState::Reading;
        let outcome = self.read_loop().await;

        self.close(outcome).await;

        HandlerSummary {
            id: self.id,
            outcome,
            messages_relayed: self.messages_relayed,
            bytes_received: self.bytes_received,
        }
    }

    async fn greet(&mut self) {
        // A failed welcome does not end the connection
        if let Err(e) = self.broadcaster.send_to(self.id, &welcome_message(self.id)).await {
            warn!("Failed to send welcome to client {}: {}", self.id, e);
        }
    }

    async fn read_loop(&mut self) -> HandlerOutcome {
        let mut buffer = vec![0u8; self.read_limit];

        loop {
            let read = tokio::select! {
                result = self.reader.read(&mut buffer) => result,
                _ = self.shutdown_rx.recv() => {
                    debug!("Client {} received shutdown signal", self.id);
                    return HandlerOutcome::Shutdown;
                }
            };

            match read {
                Ok(0) => {
                    if let Some(rest) = self.framer.finish() {
                        self.relay(&rest).await;
                    }
                    return HandlerOutcome::RemoteClosed;
                }
                Ok(n) => {
                    self.bytes_received += n as u64;
                    let chunk = &buffer[..n];
                    info!("Client {}: {}", self.id, String::from_utf8_lossy(chunk).trim_end());

                    for message in self.framer.push(chunk) {
                        self.relay(&message).await;
                    }
                }
                Err(e) => {
                    warn!("Read error from client {}: {}", self.id, e);
                    return HandlerOutcome::ReadError;
                }
            }
        }
    }

    async fn relay(&mut self, message: &[u8]) {
        let framed = relay_message(self.id, message);
        self.broadcaster.broadcast(self.id, &framed).await;
        self.messages_relayed += 1;
    }

    async fn close(&mut self, outcome: HandlerOutcome) {
        self.state = HandlerState::Closing;

        // Dropping the registered connection closes the write half
        self.broadcaster.registry().remove(self.id).await;

        info!(
            "Client {} disconnected ({:?}, {} messages relayed)",
            self.id, outcome, self.messages_relayed
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FramingMode;
    use crate::registry::Registry;
    use crate::relay::RelayStats;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    fn broadcaster() -> Arc<Broadcaster<DuplexStream>> {
        Arc::new(Broadcaster::new(
            Arc::new(Registry::new(4)),
            Duration::from_secs(1),
            Arc::new(RelayStats::new()),
        ))
    }

    async fn register(broadcaster: &Arc<Broadcaster<DuplexStream>>) -> (ClientId, DuplexStream) {
        let (server_side, client_side) = duplex(4096);
        let id = broadcaster.registry().try_insert(server_side, addr()).await.unwrap();
        (id, client_side)
    }

    async fn read_exactly(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_handler_greets_relays_and_unregisters() {
        let broadcaster = broadcaster();
        let (sender, mut sender_client) = register(&broadcaster).await;
        let (_peer, mut peer_client) = register(&broadcaster).await;
        let (_tx, shutdown_rx) = broadcast::channel(1);

        let reader = tokio_test::io::Builder::new().read(b"hi").build();
        let handler = ConnectionHandler::new(
            sender,
            addr(),
            reader,
            Arc::clone(&broadcaster),
            &ServerConfig::default(),
            shutdown_rx,
        );
        assert_eq!(handler.state(), HandlerState::Greeting);

        let summary = handler.run().await;
        assert_eq!(summary.outcome, HandlerOutcome::RemoteClosed);
        assert_eq!(summary.messages_relayed, 1);
        assert_eq!(summary.bytes_received, 2);

        let welcome = b"Welcome, Client 1!\n";
        assert_eq!(read_exactly(&mut sender_client, welcome.len()).await, welcome);
        assert_eq!(read_exactly(&mut peer_client, 12).await, b"Client 1: hi");
        assert!(!broadcaster.registry().contains(sender).await);
    }

    #[tokio::test]
    async fn test_read_error_closes_connection() {
        let broadcaster = broadcaster();
        let (id, _client) = register(&broadcaster).await;
        let (_tx, shutdown_rx) = broadcast::channel(1);

        let reader = tokio_test::io::Builder::new()
            .read_error(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
            .build();
        let handler = ConnectionHandler::new(
            id,
            addr(),
            reader,
            Arc::clone(&broadcaster),
            &ServerConfig::default(),
            shutdown_rx,
        );

        let summary = handler.run().await;
        assert_eq!(summary.outcome, HandlerOutcome::ReadError);
        assert!(broadcaster.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_shutdown_signal_closes_idle_connection() {
        let broadcaster = broadcaster();
        let (id, _client) = register(&broadcaster).await;
        let (tx, shutdown_rx) = broadcast::channel(1);

        // Never yields data, so only the shutdown signal can end the loop
        let (reader, _keep_open) = duplex(64);
        let handler = ConnectionHandler::new(
            id,
            addr(),
            reader,
            Arc::clone(&broadcaster),
            &ServerConfig::default(),
            shutdown_rx,
        );

        let task = tokio::spawn(handler.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(()).unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.outcome, HandlerOutcome::Shutdown);
        assert!(!broadcaster.registry().contains(id).await);
    }

    #[tokio::test]
    async fn test_line_framing_relays_each_line() {
        let broadcaster = broadcaster();
        let (sender, _sender_client) = register(&broadcaster).await;
        let (_peer, mut peer_client) = register(&broadcaster).await;
        let (_tx, shutdown_rx) = broadcast::channel(1);

        let server = ServerConfig {
            framing: FramingMode::Line,
            ..ServerConfig::default()
        };
        let reader = tokio_test::io::Builder::new()
            .read(b"a\nb")
            .read(b"c\ntail")
            .build();
        let handler = ConnectionHandler::new(
            sender,
            addr(),
            reader,
            Arc::clone(&broadcaster),
            &server,
            shutdown_rx,
        );

        let summary = handler.run().await;
        assert_eq!(summary.messages_relayed, 3);

        let expected = b"Client 1: a\nClient 1: bc\nClient 1: tail";
        assert_eq!(read_exactly(&mut peer_client, expected.len()).await, expected);
    }
    #[tokio::test]
    async fn test_oversized_read_is_relayed_in_capped_fragments() {
        let broadcaster = broadcaster();
        let (sender, _sender_client) = register(&broadcaster).await;
        let (_peer, mut peer_client) = register(&broadcaster).await;
        let (_tx, shutdown_rx) = broadcast::channel(1);

        let payload: Vec<u8> = (0..2000u32).map(|i| b'a' + (i % 26) as u8).collect();
        let reader = tokio_test::io::Builder::new().read(&payload).build();
        let server = ServerConfig::default();
        let handler = ConnectionHandler::new(
            sender,
            addr(),
            reader,
            Arc::clone(&broadcaster),
            &server,
            shutdown_rx,
        );

        let summary = handler.run().await;
        assert_eq!(summary.messages_relayed, 2);
        assert_eq!(summary.bytes_received, 2000);

        let limit = server.read_limit();
        assert_eq!(limit, 1023);
        let prefix = b"Client 1: ";
        let received = read_exactly(&mut peer_client, payload.len() + 2 * prefix.len()).await;

        assert_eq!(&received[..prefix.len()], prefix);
        assert_eq!(&received[prefix.len()..prefix.len() + limit], &payload[..limit]);
        let second = prefix.len() + limit;
        assert_eq!(&received[second..second + prefix.len()], prefix);
        assert_eq!(&received[second + prefix.len()..], &payload[limit..]);
    }
}
