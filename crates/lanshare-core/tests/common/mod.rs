//! Common test utilities for Lanshare integration tests.
//!
//! This module provides shared functionality for integration tests: TLS
//! material, loopback peers, and a raw protocol client for driving a peer
//! message by message.

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::client::TlsStream;

use lanshare_core::crypto::{CertificateBundle, TlsConfig};
use lanshare_core::file::DirectorySink;
use lanshare_core::peer::{Peer, PeerConfig, PeerStatus};
use lanshare_core::protocol::{self, Message};
use lanshare_core::DEFAULT_SERVER_NAME;

/// How long a test waits for a status change.
pub const WAIT: Duration = Duration::from_secs(10);

/// Create a temporary directory for test files.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Fresh provisioned TLS material usable in both roles.
pub fn test_tls() -> TlsConfig {
    let bundle = CertificateBundle::generate(DEFAULT_SERVER_NAME).expect("generate certificate");
    TlsConfig::from_bundle(&bundle, DEFAULT_SERVER_NAME).expect("build TLS config")
}

/// Driver settings bound to loopback with small chunks.
pub fn loopback_config(name: &str) -> PeerConfig {
    PeerConfig {
        device_name: name.to_string(),
        bind_address: IpAddr::from([127, 0, 0, 1]),
        chunk_size: 1024,
        request_timeout: Duration::from_secs(5),
        strict_protocol: true,
        ..PeerConfig::default()
    }
}

/// Start a peer that stores received files in `dir`.
pub fn start_peer(config: PeerConfig, tls: TlsConfig, dir: &Path) -> Peer {
    Peer::new(config, tls, Arc::new(DirectorySink::new(dir)))
}

/// Wait until the status satisfies `predicate`.
pub async fn wait_for(
    rx: &mut watch::Receiver<PeerStatus>,
    what: &str,
    predicate: impl Fn(&PeerStatus) -> bool,
) -> PeerStatus {
    tokio::time::timeout(WAIT, rx.wait_for(|s| predicate(s)))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("peer driver stopped")
        .clone()
}

/// A protocol client without a driver, for scripting exact message
/// sequences against a listening peer.
pub struct RawClient {
    stream: TlsStream<TcpStream>,
}

impl RawClient {
    /// Connect to `addr` over TLS. Does not send a handshake.
    pub async fn connect(addr: SocketAddr, tls: &TlsConfig) -> Self {
        let tcp = TcpStream::connect(addr).await.expect("tcp connect");
        let stream = tls
            .connector()
            .expect("connector")
            .connect(tls.server_name().clone(), tcp)
            .await
            .expect("tls connect");
        Self { stream }
    }

    /// Connect and complete the handshake as `name`.
    pub async fn handshake(addr: SocketAddr, tls: &TlsConfig, name: &str) -> Self {
        let mut client = Self::connect(addr, tls).await;
        client
            .send(&Message::Connect {
                device_name: name.to_string(),
            })
            .await;
        match client.recv().await {
            Message::Connect { .. } => client,
            other => panic!("expected server handshake, got {other:?}"),
        }
    }

    /// Write one message.
    pub async fn send(&mut self, message: &Message) {
        protocol::write_message(&mut self.stream, message)
            .await
            .expect("write message");
    }

    /// Read one message.
    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(WAIT, protocol::read_message(&mut self.stream))
            .await
            .expect("timed out reading")
            .expect("read message")
    }

    /// Assert the peer closed the connection.
    pub async fn expect_closed(&mut self) {
        let result = tokio::time::timeout(WAIT, protocol::read_message(&mut self.stream))
            .await
            .expect("timed out waiting for close");
        assert!(result.is_err(), "expected close, got {result:?}");
    }
}
