//! Error types for Lanshare.
//!
//! This module provides a unified error type for all Lanshare operations,
//! with specific error variants for different failure modes.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A specialized `Result` type for Lanshare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Direction of a transfer, used to report which side is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// A file leaving this device
    Outbound,
    /// A file arriving at this device
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => f.write_str("outbound"),
            Self::Inbound => f.write_str("inbound"),
        }
    }
}

/// The main error type for Lanshare.
#[derive(Error, Debug)]
pub enum Error {
    /// A transfer in this direction is already running (E001)
    #[error("an {0} transfer is already in progress, wait for it to finish")]
    Busy(Direction),

    /// No peer is attached (E002)
    #[error("not connected to a peer")]
    NotConnected,

    /// A peer is already attached (E003)
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// Connection refused or dropped (E004)
    #[error("connection lost with {0}")]
    ConnectionLost(SocketAddr),

    /// Connection closed by the peer
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// TLS setup or handshake failed (E005)
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Invalid protocol message (E006)
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// Unsupported protocol version
    #[error("unsupported protocol version: {major}.{minor}")]
    UnsupportedVersion {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
    },

    /// A chunk index arrived out of sequence (E007)
    #[error("unexpected chunk {actual}, expected chunk {expected}")]
    UnexpectedChunk {
        /// Next index the state machine accepts
        expected: u64,
        /// Index that was received
        actual: u64,
    },

    /// A chunk message arrived with no transfer to apply it to
    #[error("no {0} transfer is active")]
    NoActiveTransfer(Direction),

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// Cannot read file: permission denied (E008)
    #[error("cannot read file '{0}': permission denied")]
    PermissionDenied(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid user input (host, ticket, port)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// The peer driver task is gone
    #[error("peer driver stopped")]
    DriverStopped,

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::Busy(_) => Some("E001"),
            Self::NotConnected => Some("E002"),
            Self::AlreadyConnected(_) => Some("E003"),
            Self::ConnectionLost(_) | Self::ConnectionClosed => Some("E004"),
            Self::TlsError(_) => Some("E005"),
            Self::ProtocolError(_) | Self::UnsupportedVersion { .. } => Some("E006"),
            Self::UnexpectedChunk { .. } | Self::NoActiveTransfer(_) => Some("E007"),
            Self::PermissionDenied(_) => Some("E008"),
            _ => None,
        }
    }

    /// Returns whether the caller can simply try again later.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::ConnectionLost(_) | Self::ConnectionClosed | Self::Timeout(_)
        )
    }

    /// Returns whether this error means the peer broke the wire protocol.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::ProtocolError(_)
                | Self::UnsupportedVersion { .. }
                | Self::UnexpectedChunk { .. }
                | Self::NoActiveTransfer(_)
                | Self::Serialization(_)
        )
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Busy(_) => Some("Wait for the current transfer to finish, then try again."),
            Self::TlsError(_) => Some(
                "Both devices must share the same provisioned certificate.\n\
                 Generate one with: lanshare certs generate",
            ),
            Self::NotConnected => Some(
                "Start a listener with 'lanshare listen' on one device and\n\
                 connect to it with 'lanshare connect <ticket>' on the other.",
            ),
            _ => None,
        }
    }
}
