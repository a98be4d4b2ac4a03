//! TLS transport for the peer driver.
//!
//! Sockets are set up once (no Nagle delay, keep-alive, capped buffers) and
//! then split: a reader task turns frames into [`TransportEvent`]s for the
//! driver, and the driver keeps the write half for replies.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsStream};
use tracing::{debug, warn};

use crate::crypto::TlsConfig;
use crate::error::{Error, Result};
use crate::protocol::{self, Message};

/// How long a TLS handshake may take before the socket is dropped.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a graceful close may take.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// TLS handshakes allowed in flight at once. Sockets beyond this are closed
/// as soon as they are accepted.
const MAX_PENDING_HANDSHAKES: usize = 16;

/// A TLS stream over TCP in either role.
pub type PeerStream = TlsStream<TcpStream>;

/// Something that happened on a socket, reported to the driver.
#[derive(Debug)]
pub enum TransportEvent {
    /// The listener accepted a connection and finished the TLS handshake.
    Accepted {
        /// Encrypted stream
        stream: Box<PeerStream>,
        /// Remote address
        addr: SocketAddr,
    },
    /// A decoded message.
    Data {
        /// Connection the message arrived on
        generation: u64,
        /// The message
        message: Message,
    },
    /// A well-framed payload that is not a valid message.
    Invalid {
        /// Connection the payload arrived on
        generation: u64,
        /// Why it was rejected
        error: Error,
    },
    /// The peer closed the stream.
    Closed {
        /// Connection that closed
        generation: u64,
    },
    /// Reading failed; the stream is unusable.
    Errored {
        /// Connection that failed
        generation: u64,
        /// Cause
        error: Error,
    },
}

/// Configure a freshly opened TCP socket.
///
/// Disables Nagle, enables OS keep-alive (probe after 10 s idle, every 5 s)
/// and caps the send/receive buffers.
///
/// # Errors
///
/// Returns an error if a socket option cannot be set.
pub fn configure_socket(stream: &TcpStream, buffer_size: usize) -> Result<()> {
    stream.set_nodelay(true)?;

    let socket_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref.set_tcp_keepalive(&keepalive)?;
    socket_ref.set_send_buffer_size(buffer_size)?;
    socket_ref.set_recv_buffer_size(buffer_size)?;

    debug!(buffer_size, "Socket configured");
    Ok(())
}

/// A running listener.
#[derive(Debug)]
pub struct Listener {
    /// Bound address
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Listener {
    /// Bind and start accepting in the background.
    ///
    /// Every accepted socket is configured and TLS-accepted before it is
    /// reported as [`TransportEvent::Accepted`].
    ///
    /// # Errors
    ///
    /// Returns an error if no server certificate is available or the address
    /// cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        tls: &TlsConfig,
        buffer_size: usize,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self> {
        let acceptor = tls.acceptor()?;
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(accept_loop(listener, acceptor, buffer_size, events));
        Ok(Self { addr, task })
    }

    /// Stop accepting. Already accepted connections are unaffected.
    pub fn stop(self) {
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    buffer_size: usize,
    events: mpsc::Sender<TransportEvent>,
) {
    let pending = Arc::new(Semaphore::new(MAX_PENDING_HANDSHAKES));

    loop {
        let (tcp, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {e}");
                continue;
            }
        };
        debug!(%addr, "Incoming connection");

        let Ok(permit) = Arc::clone(&pending).try_acquire_owned() else {
            warn!(%addr, "Too many pending TLS handshakes, dropping connection");
            continue;
        };

        if let Err(e) = configure_socket(&tcp, buffer_size) {
            warn!(%addr, "Failed to configure socket: {e}");
        }

        let acceptor = acceptor.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(tcp)).await {
                Ok(Ok(stream)) => {
                    let event = TransportEvent::Accepted {
                        stream: Box::new(TlsStream::Server(stream)),
                        addr,
                    };
                    if events.send(event).await.is_err() {
                        debug!("Driver gone, dropping accepted connection");
                    }
                }
                Ok(Err(e)) => warn!(%addr, "TLS handshake failed: {e}"),
                Err(_) => warn!(%addr, "TLS handshake timed out"),
            }
        });
    }
}

/// Close a connection the driver will not use. The TLS close runs in its
/// own task so the caller never waits on the remote side.
pub fn reject(mut stream: PeerStream, addr: SocketAddr) {
    tokio::spawn(async move {
        if tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown())
            .await
            .is_err()
        {
            debug!(%addr, "Close of rejected connection timed out");
        }
    });
}

/// Open a TLS connection to `addr`, trusting only the pinned certificate.
///
/// # Errors
///
/// Returns an error if the TCP connect or the TLS handshake fails.
pub async fn connect(addr: SocketAddr, tls: &TlsConfig, buffer_size: usize) -> Result<PeerStream> {
    let connector = tls.connector()?;
    let tcp = TcpStream::connect(addr).await?;
    configure_socket(&tcp, buffer_size)?;

    let stream = connector
        .connect(tls.server_name().clone(), tcp)
        .await
        .map_err(|e| Error::TlsError(e.to_string()))?;

    Ok(TlsStream::Client(stream))
}

/// The live connection held by the driver.
#[derive(Debug)]
pub struct Connection {
    /// Identifies events from this connection
    pub generation: u64,
    /// Remote address
    pub addr: SocketAddr,
    writer: WriteHalf<PeerStream>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Split `stream` and start its reader task.
    pub fn start(
        stream: PeerStream,
        addr: SocketAddr,
        generation: u64,
        events: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        let reader = tokio::spawn(read_loop(read_half, generation, events));
        Self {
            generation,
            addr,
            writer,
            reader,
        }
    }

    /// Write one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or exceeds `timeout`.
    pub async fn send(&mut self, message: &Message, timeout: Duration) -> Result<()> {
        debug!(generation = self.generation, event = message.event(), "Sending");
        protocol::write_message_with_timeout(&mut self.writer, message, timeout).await
    }

    /// Close the stream. Sends TLS close_notify if the peer is still there.
    pub async fn close(mut self) {
        self.reader.abort();
        if tokio::time::timeout(CLOSE_TIMEOUT, self.writer.shutdown())
            .await
            .is_err()
        {
            debug!(generation = self.generation, "Close timed out");
        }
    }
}

async fn read_loop(
    mut reader: ReadHalf<PeerStream>,
    generation: u64,
    events: mpsc::Sender<TransportEvent>,
) {
    loop {
        let event = match protocol::read_frame(&mut reader).await {
            Ok(payload) => match protocol::decode_message(&payload) {
                Ok(message) => TransportEvent::Data {
                    generation,
                    message,
                },
                Err(error) => TransportEvent::Invalid { generation, error },
            },
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                let _ = events.send(TransportEvent::Closed { generation }).await;
                return;
            }
            Err(error) => {
                let _ = events.send(TransportEvent::Errored { generation, error }).await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    }
}
