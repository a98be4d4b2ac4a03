//! The peer driver.
//!
//! A [`Peer`] is a handle to one background task that owns the transfer
//! [`Orchestrator`], the listener and the single live connection. UI
//! commands and socket events both arrive over channels and are handled one
//! at a time, so the orchestrator is never touched concurrently. Every change
//! is published as one [`PeerStatus`] snapshot on a `watch` channel.
//!
//! ```text
//!   Peer (handle) ── Command ──▶ ┌──────────────┐ ◀── TransportEvent ── reader task
//!                                │ driver task  │ ◀── TransportEvent ── accept loop
//!   watch::Receiver ◀─ status ── └──────────────┘ ── frames ──▶ TLS write half
//! ```

mod transport;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connection::Endpoint;
use crate::crypto::TlsConfig;
use crate::error::{Error, Result};
use crate::file::{DirectorySink, FileSink, FileSource};
use crate::protocol::Message;
use crate::session::{Role, SessionPhase};
use crate::store::FileRecord;
use crate::transfer::{Orchestrator, ReceivedFile};

use transport::{Connection, Listener, PeerStream, TransportEvent};

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 64;

/// Settings the driver runs with.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Display name sent in handshakes
    pub device_name: String,
    /// Address the listener binds to
    pub bind_address: IpAddr,
    /// Chunk size for outgoing files
    pub chunk_size: usize,
    /// How long an active transfer or pending handshake may wait for the
    /// peer's next frame
    pub request_timeout: Duration,
    /// Tear the connection down on protocol violations
    pub strict_protocol: bool,
    /// Socket send/receive buffer cap
    pub socket_buffer_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PeerConfig {
    /// Take the driver settings from the application config.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            device_name: config.general.device_name.clone(),
            bind_address: config.network.bind_address,
            chunk_size: config.transfer.chunk_size,
            request_timeout: config.transfer.request_timeout,
            strict_protocol: config.transfer.strict_protocol,
            socket_buffer_size: config.network.socket_buffer_size,
        }
    }
}

/// Everything the UI needs to render, captured atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    /// Session phase
    pub phase: SessionPhase,
    /// Our role, if listening or connected
    pub role: Option<Role>,
    /// Live authenticated connection with completed handshake
    pub connected: bool,
    /// Peer display name
    pub remote_device_name: Option<String>,
    /// Listener address, if listening
    pub listen_addr: Option<SocketAddr>,
    /// Files sent, oldest first
    pub sent_files: Vec<FileRecord>,
    /// Files received, oldest first
    pub received_files: Vec<FileRecord>,
    /// Chunk bytes sent on this connection
    pub total_sent: u64,
    /// Chunk bytes received on this connection
    pub total_received: u64,
    /// A file is being sent
    pub outbound_active: bool,
    /// A file is being received
    pub inbound_active: bool,
    /// Most recent failure, for display
    pub last_error: Option<String>,
}

impl PeerStatus {
    fn capture(
        orchestrator: &Orchestrator,
        listen_addr: Option<SocketAddr>,
        last_error: Option<String>,
    ) -> Self {
        let session = orchestrator.session();
        let store = orchestrator.store();
        let counters = store.counters();
        Self {
            phase: session.phase(),
            role: session.role(),
            connected: session.is_connected(),
            remote_device_name: session.remote_device_name().map(str::to_string),
            listen_addr,
            sent_files: store.sent_files().to_vec(),
            received_files: store.received_files().to_vec(),
            total_sent: counters.total_sent,
            total_received: counters.total_received,
            outbound_active: store.is_outbound_active(),
            inbound_active: store.is_inbound_active(),
            last_error,
        }
    }
}

enum Command {
    Listen {
        port: u16,
        reply: oneshot::Sender<Result<SocketAddr>>,
    },
    Connect {
        addr: SocketAddr,
        local_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        source: FileSource,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running peer driver.
///
/// Dropping the handle stops the driver and closes any connection.
pub struct Peer {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<PeerStatus>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl Peer {
    /// Start a driver. Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(config: PeerConfig, tls: TlsConfig, sink: Arc<dyn FileSink>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = Orchestrator::new(config.device_name.clone(), config.chunk_size);
        let (status_tx, status_rx) =
            watch::channel(PeerStatus::capture(&orchestrator, None, None));

        let driver = Driver {
            config,
            tls,
            sink,
            orchestrator,
            listener: None,
            connection: None,
            next_generation: 1,
            events: events_tx,
            status: status_tx,
            last_error: None,
            last_activity: Instant::now(),
        };
        let task = tokio::spawn(driver.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            status: status_rx,
            task,
        }
    }

    /// Start a driver from the application config: TLS material from
    /// `[tls]`, received files written to the configured output directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no TLS material can be loaded.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tls = TlsConfig::from_settings(&config.tls)?;
        let sink = DirectorySink::new(config.general.resolved_output_dir());
        Ok(Self::new(PeerConfig::from_config(config), tls, Arc::new(sink)))
    }

    /// Start listening on `port` (0 picks a free port). Listening again is a
    /// no-op that returns the existing address.
    ///
    /// # Errors
    ///
    /// Returns an error if a client connection exists, no server certificate
    /// is provisioned, or the port cannot be bound.
    pub async fn start_listening(&self, port: u16) -> Result<SocketAddr> {
        self.request(|reply| Command::Listen { port, reply }).await?
    }

    /// Connect to `host:port` and send the handshake as `local_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not resolve, a session already
    /// exists, or the TCP/TLS connection fails.
    pub async fn connect(&self, host: &str, port: u16, local_name: &str) -> Result<()> {
        let addr = Endpoint {
            host: host.to_string(),
            port,
        }
        .resolve()
        .await?;
        let local_name = local_name.to_string();
        self.request(|reply| Command::Connect {
            addr,
            local_name,
            reply,
        })
        .await?
    }

    /// Read and announce a file. Returns once the announce is written; the
    /// transfer then proceeds as the peer pulls chunks.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `Busy`, or the read error for the source file.
    pub async fn send_file(&self, source: FileSource) -> Result<Uuid> {
        self.request(|reply| Command::Send { source, reply }).await?
    }

    /// Close the connection and stop listening. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `DriverStopped` if the driver is gone.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Subscribe to status snapshots.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<PeerStatus> {
        self.status.clone()
    }

    /// The latest status snapshot.
    #[must_use]
    pub fn snapshot(&self) -> PeerStatus {
        self.status.borrow().clone()
    }

    /// Stop the driver and wait for it to close its sockets.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            warn!("Peer driver ended abnormally: {e}");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| Error::DriverStopped)?;
        response.await.map_err(|_| Error::DriverStopped)
    }
}

struct Driver {
    config: PeerConfig,
    tls: TlsConfig,
    sink: Arc<dyn FileSink>,
    orchestrator: Orchestrator,
    listener: Option<Listener>,
    connection: Option<Connection>,
    next_generation: u64,
    events: mpsc::Sender<TransportEvent>,
    status: watch::Sender<PeerStatus>,
    last_error: Option<String>,
    last_activity: Instant,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        loop {
            let deadline = self.deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = events.recv() => self.handle_event(event).await,
                () = sleep_until(deadline) => self.on_timeout().await,
            }
            self.publish();
        }

        debug!("Peer handle dropped, stopping driver");
        self.stop().await;
        self.publish();
    }

    /// When the peer must have sent something by, if anything is pending.
    fn deadline(&self) -> Option<Instant> {
        let waiting = self.connection.is_some()
            && (self.orchestrator.has_active_transfer()
                || !self.orchestrator.session().is_connected());
        waiting.then(|| self.last_activity + self.config.request_timeout)
    }

    fn publish(&self) {
        let listen_addr = self.listener.as_ref().map(|l| l.addr);
        self.status.send_replace(PeerStatus::capture(
            &self.orchestrator,
            listen_addr,
            self.last_error.clone(),
        ));
    }

    fn fail(&mut self, error: &Error) {
        self.last_error = Some(error.to_string());
    }

    /// Handle one command. The status is published before replying, so a
    /// caller that awaited the reply always sees its effect in a snapshot.
    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Listen { port, reply } => {
                let result = self.listen(port).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Connect {
                addr,
                local_name,
                reply,
            } => {
                let result = self.connect(addr, local_name).await;
                if let Err(e) = &result {
                    self.fail(e);
                }
                self.publish();
                let _ = reply.send(result);
            }
            Command::Send { source, reply } => {
                let result = self.send_file(source).await;
                self.publish();
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => {
                info!("Disconnecting");
                self.stop().await;
                let _ = reply.send(());
            }
        }
    }

    async fn listen(&mut self, port: u16) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            warn!(addr = %listener.addr, "Already listening");
            return Ok(listener.addr);
        }

        self.orchestrator.session_mut().start_listening()?;

        let addr = SocketAddr::new(self.config.bind_address, port);
        match Listener::bind(
            addr,
            &self.tls,
            self.config.socket_buffer_size,
            self.events.clone(),
        )
        .await
        {
            Ok(listener) => {
                info!(addr = %listener.addr, "Listening for a peer");
                let addr = listener.addr;
                self.listener = Some(listener);
                Ok(addr)
            }
            Err(e) => {
                self.orchestrator.reset();
                Err(e)
            }
        }
    }

    async fn connect(&mut self, addr: SocketAddr, local_name: String) -> Result<()> {
        self.orchestrator.session_mut().begin_connect()?;
        self.orchestrator.set_local_name(local_name);
        self.publish();

        info!(%addr, "Connecting to peer");
        let stream = match tokio::time::timeout(
            self.config.request_timeout,
            transport::connect(addr, &self.tls, self.config.socket_buffer_size),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(%addr, "Connection failed: {e}");
                self.orchestrator.reset();
                return Err(e);
            }
            Err(_) => {
                warn!(%addr, "Connection timed out");
                self.orchestrator.reset();
                return Err(Error::Timeout(self.config.request_timeout.as_secs()));
            }
        };

        self.attach(stream, addr);
        let handshake = self.orchestrator.handshake();
        self.write(&handshake).await?;

        self.orchestrator.session_mut().client_connected();
        self.last_error = None;
        info!(%addr, "Connected");
        Ok(())
    }

    async fn send_file(&mut self, source: FileSource) -> Result<Uuid> {
        self.orchestrator.ensure_can_send()?;

        let bytes = source.read_bytes().await.inspect_err(|e| {
            warn!(path = %source.path.display(), "Cannot read file: {e}");
        })?;
        let (id, announce) = self.orchestrator.begin_send(&source, &bytes)?;
        drop(bytes);

        self.write(&announce).await?;
        self.last_activity = Instant::now();
        Ok(id)
    }

    fn attach(&mut self, stream: PeerStream, addr: SocketAddr) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.connection = Some(Connection::start(
            stream,
            addr,
            generation,
            self.events.clone(),
        ));
        self.last_activity = Instant::now();
        debug!(%addr, generation, "Connection attached");
    }

    /// Write to the live connection; a failed write tears it down.
    async fn write(&mut self, message: &Message) -> Result<()> {
        let timeout = self.config.request_timeout;
        let Some(connection) = self.connection.as_mut() else {
            return Err(Error::NotConnected);
        };

        if let Err(e) = connection.send(message, timeout).await {
            warn!("Write failed: {e}");
            let addr = connection.addr;
            self.drop_connection(&e).await;
            return Err(Error::ConnectionLost(addr));
        }
        Ok(())
    }

    /// Tear down the live connection: discard chunk sets, zero counters,
    /// clear the peer. A listener keeps running.
    async fn drop_connection(&mut self, cause: &Error) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        info!(addr = %connection.addr, "Connection closed: {cause}");

        self.orchestrator.connection_lost();
        if self.listener.is_none() {
            self.orchestrator.session_mut().reset();
        }
        self.fail(cause);
        self.publish();
        connection.close().await;
    }

    /// Stop everything and return to idle.
    async fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop();
        }
        let connection = self.connection.take();
        self.orchestrator.reset();
        self.publish();

        if let Some(connection) = connection {
            connection.close().await;
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Accepted { stream, addr } => self.on_accepted(*stream, addr),
            TransportEvent::Data {
                generation,
                message,
            } => {
                if self.is_current(generation) {
                    self.on_message(message).await;
                }
            }
            TransportEvent::Invalid { generation, error } => {
                if self.is_current(generation) {
                    self.on_violation(error).await;
                }
            }
            TransportEvent::Closed { generation } => {
                if self.is_current(generation) {
                    self.drop_connection(&Error::ConnectionClosed).await;
                }
            }
            TransportEvent::Errored { generation, error } => {
                if self.is_current(generation) {
                    warn!("Connection error: {error}");
                    self.drop_connection(&error).await;
                }
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let current = self
            .connection
            .as_ref()
            .is_some_and(|c| c.generation == generation);
        if !current {
            debug!(generation, "Ignoring event from a closed connection");
        }
        current
    }

    fn on_accepted(&mut self, stream: PeerStream, addr: SocketAddr) {
        if self.listener.is_none() {
            debug!(%addr, "Listener stopped, dropping connection");
            return;
        }
        if self.connection.is_some() {
            warn!(%addr, "Rejecting second inbound connection, a peer is already attached");
            transport::reject(stream, addr);
            return;
        }

        info!(%addr, "Peer connected, waiting for handshake");
        self.attach(stream, addr);
    }

    async fn on_message(&mut self, message: Message) {
        self.last_activity = Instant::now();

        match self.orchestrator.handle_message(message) {
            Ok(reaction) => {
                if let Some(reply) = reaction.reply {
                    if self.write(&reply).await.is_err() {
                        return;
                    }
                }
                if let Some(id) = reaction.sent {
                    debug!(%id, "Send finished");
                }
                if let Some(received) = reaction.received {
                    self.persist(received).await;
                }
            }
            Err(e @ Error::Busy(_)) => {
                warn!("Rejected announce: {e}");
                self.fail(&e);
            }
            Err(e) if e.is_protocol_violation() => self.on_violation(e).await,
            Err(e) => {
                error!("Transfer failed: {e}");
                self.drop_connection(&e).await;
            }
        }
    }

    async fn on_violation(&mut self, error: Error) {
        if self.config.strict_protocol {
            warn!("Protocol violation, closing connection: {error}");
            self.drop_connection(&error).await;
        } else {
            warn!("Protocol violation, message dropped: {error}");
            self.fail(&error);
        }
    }

    async fn persist(&mut self, received: ReceivedFile) {
        let id = received.record.id;
        let name = received.record.name.clone();
        let sink = Arc::clone(&self.sink);

        let result = tokio::task::spawn_blocking(move || {
            sink.persist(&received.record, &received.payload)
        })
        .await
        .unwrap_or_else(|e| Err(Error::Internal(format!("storage task failed: {e}"))));

        match result {
            Ok(path) => {
                info!(%id, path = %path.display(), "Saved received file");
                self.orchestrator.store_mut().set_received_path(id, path);
            }
            Err(e) => {
                error!(%id, %name, "Failed to save received file: {e}");
                self.orchestrator.store_mut().mark_received_unavailable(id);
                self.fail(&e);
            }
        }
    }

    async fn on_timeout(&mut self) {
        let timeout = self.config.request_timeout;
        warn!(
            timeout_secs = timeout.as_secs(),
            "Peer went quiet, aborting connection"
        );
        self.drop_connection(&Error::Timeout(timeout.as_secs())).await;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Where a [`FileSink`] put a received file, for callers that only have a
/// status snapshot.
#[must_use]
pub fn stored_path(status: &PeerStatus, id: Uuid) -> Option<PathBuf> {
    status
        .received_files
        .iter()
        .find(|r| r.id == id)
        .and_then(|r| r.source_ref.clone())
}
