//! Connection state: are we connected, and to whom.
//!
//! Client: `Idle → Connecting → Connected → Idle`.
//! Server: `Idle → Listening → Connected → Listening`, or `Idle` once the
//! listener is stopped.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Which side of the connection this device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Accepted the connection
    Server,
    /// Opened the connection
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No listener, no connection
    #[default]
    Idle,
    /// Listener running, no peer handshake yet
    Listening,
    /// Outbound connection in progress
    Connecting,
    /// Handshake done, transfers allowed
    Connected,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Listening => f.write_str("listening"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
        }
    }
}

/// Snapshot of the single peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConnection {
    /// Our role
    pub role: Role,
    /// Display name from the peer's handshake
    pub remote_device_name: Option<String>,
    /// Live authenticated connection
    pub connected: bool,
}

/// Session state machine.
#[derive(Debug, Default)]
pub struct SessionState {
    phase: SessionPhase,
    role: Option<Role>,
    remote_device_name: Option<String>,
}

impl SessionState {
    /// A fresh idle session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Current role, if a listener or connection exists.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Whether the handshake completed on a live connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.phase == SessionPhase::Connected
    }

    /// Peer display name, once known.
    #[must_use]
    pub fn remote_device_name(&self) -> Option<&str> {
        self.remote_device_name.as_deref()
    }

    /// The peer connection, if one exists in any phase.
    #[must_use]
    pub fn peer_connection(&self) -> Option<PeerConnection> {
        self.role.map(|role| PeerConnection {
            role,
            remote_device_name: self.remote_device_name.clone(),
            connected: self.is_connected(),
        })
    }

    /// `Idle → Listening`. Returns `false` when already listening.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected` while a client connection exists.
    pub fn start_listening(&mut self) -> Result<bool> {
        match (self.phase, self.role) {
            (SessionPhase::Idle, _) => {
                self.set_phase(SessionPhase::Listening);
                self.role = Some(Role::Server);
                Ok(true)
            }
            (_, Some(Role::Server)) => Ok(false),
            _ => Err(Error::AlreadyConnected(self.describe_peer())),
        }
    }

    /// `Idle → Connecting`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyConnected` unless idle.
    pub fn begin_connect(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            return Err(Error::AlreadyConnected(self.describe_peer()));
        }
        self.set_phase(SessionPhase::Connecting);
        self.role = Some(Role::Client);
        Ok(())
    }

    /// `Connecting → Connected` once the client's TLS session is up and its
    /// handshake is sent.
    pub fn client_connected(&mut self) {
        if self.phase == SessionPhase::Connecting {
            self.set_phase(SessionPhase::Connected);
        }
    }

    /// A `connect` handshake arrived. Returns `true` if it completed the
    /// server-side transition to `Connected`.
    pub fn handshake_received(&mut self, device_name: String) -> bool {
        self.remote_device_name = Some(device_name);
        if self.phase == SessionPhase::Listening {
            self.set_phase(SessionPhase::Connected);
            return true;
        }
        false
    }

    /// The connection went away. A server keeps listening; a client returns
    /// to idle.
    pub fn connection_lost(&mut self) {
        self.remote_device_name = None;
        match self.role {
            Some(Role::Server) => self.set_phase(SessionPhase::Listening),
            _ => {
                self.set_phase(SessionPhase::Idle);
                self.role = None;
            }
        }
    }

    /// Drop everything, including the listener role.
    pub fn reset(&mut self) {
        self.set_phase(SessionPhase::Idle);
        self.role = None;
        self.remote_device_name = None;
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Session phase change");
            self.phase = phase;
        }
    }

    fn describe_peer(&self) -> String {
        match (&self.remote_device_name, self.phase) {
            (Some(name), _) => name.clone(),
            (None, phase) => format!("a {phase} session"),
        }
    }
}
