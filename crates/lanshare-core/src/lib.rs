//! # Lanshare Core Library
//!
//! `lanshare-core` provides the core functionality for Lanshare, a
//! peer-to-peer file transfer tool for two devices on the same network.
//!
//! ## Features
//!
//! - **Pinned TLS**: both devices trust one provisioned certificate
//! - **Single peer**: exactly one active connection at a time
//! - **Stop-and-wait transfers**: the receiver pulls one chunk at a time
//! - **One transfer per direction**: a second send or announce reports busy
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`connection`] - Host and port parsing
//! - [`crypto`] - TLS material, provisioning and fingerprints
//! - [`mod@file`] - File sources, chunking and the storage collaborator
//! - [`peer`] - The peer driver: transport, event loop and status surface
//! - [`protocol`] - Wire messages and length framing
//! - [`qr`] - Terminal QR codes for connection tickets
//! - [`session`] - Connection state (role, phase, remote device)
//! - [`store`] - Chunk sets, file logs and byte counters
//! - [`ticket`] - Connection ticket format exchanged out of band
//! - [`transfer`] - The transfer state machine
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanshare_core::{config::Config, file::FileSource, peer::Peer};
//!
//! let config = Config::load()?;
//! let peer = Peer::from_config(&config)?;
//! peer.connect("192.168.1.20", 4000, "Laptop").await?;
//! peer.send_file(FileSource::file("./report.pdf")?).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod file;
pub mod peer;
pub mod protocol;
pub mod qr;
pub mod session;
pub mod store;
pub mod ticket;
pub mod transfer;

pub use error::{Direction, Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version (major, minor)
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Default listening port
pub const DEFAULT_PORT: u16 = 4000;

/// Default chunk size for file transfers (8 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Maximum frame payload, also the socket buffer cap (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default seconds to wait for the next frame of an active transfer
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Name the provisioned certificate is issued for and verified against
pub const DEFAULT_SERVER_NAME: &str = "lanshare.local";
