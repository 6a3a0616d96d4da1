//! TCP control channel: server, client, and request correlation.
//!
//! Messages are newline-delimited JSON ([`ltp_wire::Message`]). The server
//! runs one task per connection so a slow handler on one connection never
//! head-of-line-blocks another. The client keeps a `seq -> oneshot` map;
//! responses resolve the waiter with the matching `seq`, and everything
//! else (no `seq`, or no waiter) goes to an out-of-band fallback handler.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ltp_wire::{ErrorCode, Message, ProtocolError};

use crate::error::TransportError;
use crate::DEFAULT_REQUEST_TIMEOUT;

/// Handler invoked for every inbound control message.
///
/// Returning `Ok(Some(response))` writes the response back on the same
/// connection; `Ok(None)` stays silent. An `Err` is turned into an `error`
/// message carrying the request's `seq`.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Message) -> BoxFuture<'_, Result<Option<Message>, ProtocolError>>;
}

/// A handler that ignores every message. Useful for probe-only clients.
pub struct NullHandler;

impl MessageHandler for NullHandler {
    fn handle(&self, _message: Message) -> BoxFuture<'_, Result<Option<Message>, ProtocolError>> {
        Box::pin(async { Ok(None) })
    }
}

struct ConnectionEntry {
    id: u64,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Connections {
    entries: Mutex<Vec<ConnectionEntry>>,
}

/// Cloneable handle for pushing messages to a running server's
/// connections. Devices hold one to broadcast `control_changed`.
#[derive(Clone)]
pub struct ControlServerHandle {
    connections: Arc<Connections>,
}

impl ControlServerHandle {
    /// Push a message to every open connection. Connections whose writer
    /// has gone away are skipped; the reaper removes them.
    pub fn broadcast(&self, message: &Message) {
        let line = message.to_line();
        let entries = self.connections.entries.lock();
        for entry in entries.iter() {
            if entry.outbound.send(line.clone()).is_err() {
                debug!(peer = %entry.peer, "broadcast to closed connection skipped");
            }
        }
    }

    /// Number of currently open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.entries.lock().len()
    }
}

/// TCP server for the control channel.
///
/// Accepts connections concurrently; each connection reads
/// newline-delimited messages, dispatches them to the handler, and writes
/// the response back.
pub struct ControlServer {
    local_addr: SocketAddr,
    handle: ControlServerHandle,
    accept_task: JoinHandle<()>,
}

impl ControlServer {
    /// Bind and start serving. Port 0 picks an OS-assigned port,
    /// queryable via [`ControlServer::local_port`].
    pub async fn bind(
        host: &str,
        port: u16,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "control server listening");

        let connections = Arc::new(Connections::default());
        let handle = ControlServerHandle {
            connections: connections.clone(),
        };

        let accept_task = tokio::spawn(accept_loop(listener, connections, handler));

        Ok(Self {
            local_addr,
            handle,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Handle for broadcasting from outside the server.
    pub fn handle(&self) -> ControlServerHandle {
        self.handle.clone()
    }

    /// Push a message to every open connection.
    pub fn broadcast(&self, message: &Message) {
        self.handle.broadcast(message);
    }

    /// Stop accepting and drop all connections.
    pub fn stop(&self) {
        self.accept_task.abort();
        self.handle.connections.entries.lock().clear();
        info!(local_addr = %self.local_addr, "control server stopped");
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    connections: Arc<Connections>,
    handler: Arc<dyn MessageHandler>,
) {
    let mut next_id = 0u64;
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                next_id += 1;
                let id = next_id;
                debug!(%peer, "control connection accepted");
                let connections = connections.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    serve_connection(socket, peer, id, connections.clone(), handler).await;
                    connections.entries.lock().retain(|e| e.id != id);
                    debug!(%peer, "control connection closed");
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn serve_connection(
    socket: TcpStream,
    peer: SocketAddr,
    id: u64,
    connections: Arc<Connections>,
    handler: Arc<dyn MessageHandler>,
) {
    let (read_half, write_half) = socket.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();

    connections.entries.lock().push(ConnectionEntry {
        id,
        peer,
        outbound: outbound_tx.clone(),
    });

    let writer_task = tokio::spawn(write_loop(write_half, outbound_rx));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "control read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match Message::from_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, error = %e, "dropping malformed control message");
                let reply = Message::error(None, ErrorCode::InvalidFormat, e.message);
                let _ = outbound_tx.send(reply.to_line());
                continue;
            }
        };

        let seq = message.seq();
        debug!(%peer, msg = message.type_name(), ?seq, "control message received");

        let reply = match handler.handle(message).await {
            Ok(reply) => reply,
            Err(e) => Some(Message::error(seq, e.code, e.message)),
        };
        if let Some(reply) = reply {
            if outbound_tx.send(reply.to_line()).is_err() {
                break;
            }
        }
    }

    writer_task.abort();
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if writer.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Out-of-band handler for client messages that match no pending request
/// (unsolicited pushes such as `control_changed`).
pub type FallbackHandler = Arc<dyn Fn(Message) + Send + Sync>;

struct ClientShared {
    pending: Mutex<HashMap<u64, oneshot::Sender<Message>>>,
    fallback: Mutex<Option<FallbackHandler>>,
    connected: AtomicBool,
}

/// TCP client for the control channel.
///
/// Each request is stamped with the next `seq` and awaited against the
/// response carrying the same `seq`, under a caller-supplied timeout.
pub struct ControlClient {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    shared: Arc<ClientShared>,
    seq: AtomicU64,
    read_task: JoinHandle<()>,
    peer: SocketAddr,
}

impl ControlClient {
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let socket = TcpStream::connect((host, port)).await?;
        let peer = socket.peer_addr()?;
        let (read_half, write_half) = socket.into_split();

        let shared = Arc::new(ClientShared {
            pending: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
            connected: AtomicBool::new(true),
        });

        let read_task = tokio::spawn(client_read_loop(read_half, shared.clone(), peer));
        debug!(%peer, "control client connected");

        Ok(Self {
            writer: tokio::sync::Mutex::new(write_half),
            shared,
            seq: AtomicU64::new(0),
            read_task,
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Install the handler for unsolicited messages.
    pub fn set_fallback_handler(&self, handler: FallbackHandler) {
        *self.shared.fallback.lock() = Some(handler);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Send a request and await the response with the matching `seq`,
    /// under the default 5 s timeout.
    pub async fn request(&self, message: Message) -> Result<Message, TransportError> {
        self.request_timeout(message, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Send a request and await the response with the matching `seq`.
    pub async fn request_timeout(
        &self,
        mut message: Message,
        timeout: Duration,
    ) -> Result<Message, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }

        let seq = self.next_seq();
        message.set_seq(seq);

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(seq, tx);

        if let Err(e) = self.send_raw(&message).await {
            self.shared.pending.lock().remove(&seq);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Read loop dropped the sender: connection is gone.
                self.shared.pending.lock().remove(&seq);
                Err(TransportError::Closed)
            }
            Err(_) => {
                self.shared.pending.lock().remove(&seq);
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    /// Send a message without waiting for any response.
    pub async fn send(&self, message: Message) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        self.send_raw(&message).await
    }

    async fn send_raw(&self, message: &Message) -> Result<(), TransportError> {
        let line = message.to_line();
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Close the connection. Pending requests resolve with
    /// [`TransportError::Closed`].
    pub async fn close(&self) {
        self.shared.connected.store(false, Ordering::Release);
        self.read_task.abort();
        self.shared.pending.lock().clear();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        debug!(peer = %self.peer, "control client closed");
    }
}

impl Drop for ControlClient {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

async fn client_read_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    shared: Arc<ClientShared>,
    peer: SocketAddr,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "control client read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message = match Message::from_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(%peer, error = %e, "dropping malformed message from server");
                continue;
            }
        };

        let waiter = message
            .seq()
            .and_then(|seq| shared.pending.lock().remove(&seq));
        match waiter {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => {
                let fallback = shared.fallback.lock().clone();
                if let Some(fallback) = fallback {
                    fallback(message);
                } else {
                    debug!(%peer, msg = message.type_name(), "unmatched message dropped");
                }
            }
        }
    }

    shared.connected.store(false, Ordering::Release);
    // Wake every pending request with a closed-connection error.
    shared.pending.lock().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    impl MessageHandler for EchoHandler {
        fn handle(
            &self,
            message: Message,
        ) -> BoxFuture<'_, Result<Option<Message>, ProtocolError>> {
            Box::pin(async move {
                match message {
                    Message::CapabilityRequest { seq } => Ok(Some(Message::CapabilityResponse {
                        seq,
                        device: serde_json::json!({"name": "echo"}),
                    })),
                    Message::ControlGet { .. } => {
                        Err(ProtocolError::new(ErrorCode::Internal, "get exploded"))
                    }
                    _ => Ok(None),
                }
            })
        }
    }

    #[tokio::test]
    async fn request_response_roundtrip() {
        let server = ControlServer::bind("127.0.0.1", 0, Arc::new(EchoHandler))
            .await
            .unwrap();
        let client = ControlClient::connect("127.0.0.1", server.local_port())
            .await
            .unwrap();

        let response = client
            .request(Message::CapabilityRequest { seq: None })
            .await
            .unwrap();
        match response {
            Message::CapabilityResponse { seq, device } => {
                assert_eq!(seq, Some(1));
                assert_eq!(device["name"], "echo");
            }
            other => panic!("unexpected response: {other:?}"),
        }

        client.close().await;
        server.stop();
    }

    #[tokio::test]
    async fn handler_error_becomes_error_message_with_seq() {
        let server = ControlServer::bind("127.0.0.1", 0, Arc::new(EchoHandler))
            .await
            .unwrap();
        let client = ControlClient::connect("127.0.0.1", server.local_port())
            .await
            .unwrap();

        let response = client
            .request(Message::ControlGet { seq: None, ids: None })
            .await
            .unwrap();
        match response {
            Message::Error { seq, code, .. } => {
                assert_eq!(seq, Some(1));
                assert_eq!(code, ErrorCode::Internal);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        client.close().await;
        server.stop();
    }

    #[tokio::test]
    async fn request_times_out_without_response() {
        let server = ControlServer::bind("127.0.0.1", 0, Arc::new(NullHandler))
            .await
            .unwrap();
        let client = ControlClient::connect("127.0.0.1", server.local_port())
            .await
            .unwrap();

        let result = client
            .request_timeout(
                Message::CapabilityRequest { seq: None },
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));

        client.close().await;
        server.stop();
    }

    #[tokio::test]
    async fn unsolicited_messages_reach_fallback_handler() {
        let server = ControlServer::bind("127.0.0.1", 0, Arc::new(NullHandler))
            .await
            .unwrap();
        let client = ControlClient::connect("127.0.0.1", server.local_port())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client.set_fallback_handler(Arc::new(move |message| {
            let _ = tx.send(message);
        }));

        // Give the connection a moment to register, then broadcast.
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.broadcast(&Message::ControlChanged {
            values: serde_json::Map::new(),
        });

        let pushed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(pushed, Message::ControlChanged { .. }));

        client.close().await;
        server.stop();
    }
}
