//! TCP transport implementation
//!
//! Raw TCP transport for the deck. Bytes are passed through untouched in both
//! directions; the deck's line protocol is decoded further up.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Default channel buffer size for TCP connections
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 256;

/// TCP configuration
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Read buffer size
    pub read_buffer_size: usize,
    /// Keep-alive interval in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// How long to wait for the connect to complete
    pub connect_timeout: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8192,
            keepalive_secs: 30,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Work for the IO loop
#[derive(Debug)]
enum Outgoing {
    Data(Bytes),
    Close,
}

/// TCP transport
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            config: TcpConfig::default(),
        }
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Connect to a deck at `addr` (`host:port`)
    pub async fn connect(&self, addr: &str) -> Result<(TcpSender, TcpReceiver)> {
        info!("Connecting to TCP: {}", addr);

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        #[cfg(feature = "keepalive")]
        if self.config.keepalive_secs > 0 {
            let socket = socket2::SockRef::from(&stream);
            let keepalive =
                socket2::TcpKeepalive::new().with_time(Duration::from_secs(self.config.keepalive_secs));
            if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
                debug!("Could not enable TCP keepalive: {}", e);
            }
        }

        let _ = stream.set_nodelay(true);

        info!("TCP connected to {}", addr);
        Ok(spawn_connection(stream, self.config.read_buffer_size))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Split the stream and start its IO loop
fn spawn_connection(stream: TcpStream, read_buffer_size: usize) -> (TcpSender, TcpReceiver) {
    let connected = Arc::new(Mutex::new(true));
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Outgoing>(DEFAULT_CHANNEL_BUFFER_SIZE);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(DEFAULT_CHANNEL_BUFFER_SIZE);

    let sender = TcpSender {
        tx: outgoing_tx,
        connected: connected.clone(),
    };
    let receiver = TcpReceiver { rx: incoming_rx };

    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        let _ = incoming_tx.send(TransportEvent::Connected).await;
        run_tcp_io_loop(reader, writer, outgoing_rx, incoming_tx, read_buffer_size, connected).await;
    });

    (sender, receiver)
}

/// Shared IO loop for TCP connections
async fn run_tcp_io_loop(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<Outgoing>,
    incoming_tx: mpsc::Sender<TransportEvent>,
    read_buffer_size: usize,
    connected: Arc<Mutex<bool>>,
) {
    let mut read_buf = BytesMut::with_capacity(read_buffer_size);

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(Outgoing::Data(data)) => {
                        if let Err(e) = writer.write_all(&data).await {
                            error!("TCP write error: {}", e);
                            let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                            let _ = incoming_tx.send(TransportEvent::Disconnected {
                                reason: Some(e.to_string()),
                            }).await;
                            break;
                        }
                    }
                    Some(Outgoing::Close) => {
                        debug!("TCP connection closed locally");
                        let _ = writer.shutdown().await;
                        let _ = incoming_tx.send(TransportEvent::Disconnected {
                            reason: Some("closed locally".to_string()),
                        }).await;
                        break;
                    }
                    None => {
                        debug!("TCP sender dropped, closing connection");
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            }

            result = reader.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!("TCP connection closed");
                        let _ = incoming_tx.send(TransportEvent::Disconnected { reason: None }).await;
                        break;
                    }
                    Ok(_) => {
                        let data = read_buf.split().freeze();
                        if incoming_tx.send(TransportEvent::Data(data)).await.is_err() {
                            break;
                        }
                        read_buf.reserve(read_buffer_size);
                    }
                    Err(e) => {
                        error!("TCP read error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        let _ = incoming_tx.send(TransportEvent::Disconnected {
                            reason: Some(e.to_string()),
                        }).await;
                        break;
                    }
                }
            }
        }
    }

    *connected.lock() = false;
}

/// TCP sender for writing data
#[derive(Clone)]
pub struct TcpSender {
    tx: mpsc::Sender<Outgoing>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(Outgoing::Data(data))
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".into()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        if !*self.connected.lock() {
            return Ok(());
        }
        *self.connected.lock() = false;
        self.tx
            .send(Outgoing::Close)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// TCP receiver for reading data
pub struct TcpReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// TCP server for accepting connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Bind to an address and create a new TCP server
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Bind with custom configuration
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(e.to_string()))?;

        info!("TCP server listening on {}", addr);

        Ok(Self { listener, config })
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        info!("TCP connection accepted from {}", peer_addr);

        let (sender, receiver) = spawn_connection(stream, self.config.read_buffer_size);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
