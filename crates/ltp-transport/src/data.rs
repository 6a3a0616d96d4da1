//! UDP data channel: pixel packet sender and receiver.
//!
//! The data plane never errors upward: the receiver drops malformed
//! datagrams with a warning, and the sender transmits oversized packets
//! anyway (logging the MTU excess); keeping pixel counts within
//! [`ltp_wire::MAX_PACKET_SIZE`] is the caller's job.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ltp_wire::{ColorFormat, DataPacket, Encoding, MAX_PACKET_SIZE};

use crate::error::TransportError;

/// Callback invoked with every successfully decoded packet.
pub type DataHandler = Arc<dyn Fn(DataPacket) + Send + Sync>;

/// Connected UDP socket sending pixel packets to a single peer.
pub struct DataSender {
    socket: UdpSocket,
    peer: SocketAddr,
    sequence: AtomicU32,
    frames_sent: AtomicU64,
    /// Minimum interval between sends, when a rate cap is set.
    min_interval: Option<Duration>,
    last_send: tokio::sync::Mutex<Option<tokio::time::Instant>>,
}

impl DataSender {
    /// Connect to `host:port`. The local port is OS-assigned.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect((host, port)).await?;
        let peer = socket.peer_addr()?;
        info!(%peer, "data sender targeting peer");
        Ok(Self {
            socket,
            peer,
            sequence: AtomicU32::new(0),
            frames_sent: AtomicU64::new(0),
            min_interval: None,
            last_send: tokio::sync::Mutex::new(None),
        })
    }

    /// Cap the outgoing frame rate. A send arriving sooner than
    /// `1 / max_fps` after the previous one sleeps the difference first.
    pub fn with_rate_limit(mut self, max_fps: f64) -> Self {
        if max_fps > 0.0 {
            self.min_interval = Some(Duration::from_secs_f64(1.0 / max_fps));
        }
        self
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Build, serialize, and transmit one packet.
    ///
    /// `pixels` is a flat `pixel_count * bpp` buffer. The sequence counter
    /// increments per call and wraps at `2^32`.
    pub async fn send(
        &self,
        pixels: &[u8],
        color_format: ColorFormat,
        encoding: Encoding,
    ) -> Result<(), TransportError> {
        if let Some(interval) = self.min_interval {
            let mut last = self.last_send.lock().await;
            let now = tokio::time::Instant::now();
            if let Some(previous) = *last {
                let elapsed = now.duration_since(previous);
                if elapsed < interval {
                    tokio::time::sleep(interval - elapsed).await;
                }
            }
            *last = Some(tokio::time::Instant::now());
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let packet = DataPacket::new(sequence, color_format, encoding, pixels.to_vec());
        let bytes = packet.to_bytes()?;

        if bytes.len() > MAX_PACKET_SIZE {
            warn!(
                size = bytes.len(),
                max = MAX_PACKET_SIZE,
                peer = %self.peer,
                "packet exceeds max datagram size, sending anyway"
            );
        }

        self.socket.send(&bytes).await?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Bound UDP socket decoding pixel packets and dispatching them to a
/// handler.
pub struct DataReceiver {
    local_addr: SocketAddr,
    frames_received: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    recv_task: JoinHandle<()>,
}

impl DataReceiver {
    /// Bind to `host:port` (0 picks an OS-assigned port) and start
    /// dispatching decoded packets to `handler`.
    pub async fn bind(host: &str, port: u16, handler: DataHandler) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((host, port)).await?;
        let local_addr = socket.local_addr()?;
        info!(%local_addr, "data receiver listening");

        let frames_received = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));
        let recv_task = tokio::spawn(recv_loop(
            socket,
            handler,
            frames_received.clone(),
            dropped.clone(),
        ));

        Ok(Self {
            local_addr,
            frames_received,
            dropped,
            recv_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Datagrams dropped as malformed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.recv_task.abort();
        debug!(local_addr = %self.local_addr, "data receiver stopped");
    }
}

impl Drop for DataReceiver {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn recv_loop(
    socket: UdpSocket,
    handler: DataHandler,
    frames_received: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
) {
    // Headroom above MAX_PACKET_SIZE: oversized packets are sent anyway,
    // so the receive buffer must not truncate them.
    let mut buf = vec![0u8; 65536];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => match DataPacket::from_bytes(&buf[..len]) {
                Ok(packet) => {
                    frames_received.fetch_add(1, Ordering::Relaxed);
                    handler(packet);
                }
                Err(e) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(%peer, error = %e, "dropping malformed datagram");
                }
            },
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}
