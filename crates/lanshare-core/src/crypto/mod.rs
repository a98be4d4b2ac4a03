//! Cryptographic primitives for Lanshare.
//!
//! This module provides:
//! - Provisioning of the shared certificate/key pair
//! - Loading PEM material from disk
//! - TLS server and client configuration
//! - SHA-256 certificate fingerprints
//!
//! ## Security Model
//!
//! Trust is pre-provisioned, never negotiated at runtime. One self-signed
//! certificate is generated once and installed on both devices: the listener
//! presents it, and the connecting side trusts that exact certificate and
//! nothing else. The certificate is verified under a fixed server name
//! (`lanshare.local` by default) rather than the peer's IP, since LAN
//! addresses change between sessions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::config::TlsSettings;
use crate::error::{Error, Result};

/// File name of the generated certificate.
pub const CERT_FILE_NAME: &str = "server-cert.pem";

/// File name of the generated private key.
pub const KEY_FILE_NAME: &str = "server-key.pem";

/// A freshly generated certificate and its private key, PEM encoded.
#[derive(Clone)]
pub struct CertificateBundle {
    /// Certificate (PEM)
    pub cert_pem: String,
    /// Private key (PEM)
    pub key_pem: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

impl CertificateBundle {
    /// Generate a self-signed certificate for `server_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if key or certificate generation fails.
    pub fn generate(server_name: &str) -> Result<Self> {
        let subject_alt_names = vec![server_name.to_string(), "localhost".to_string()];
        let mut cert_params = rcgen::CertificateParams::new(subject_alt_names)
            .map_err(|e| Error::TlsError(format!("Failed to create cert params: {e}")))?;
        cert_params
            .distinguished_name
            .push(rcgen::DnType::CommonName, server_name);

        let key_pair = rcgen::KeyPair::generate()
            .map_err(|e| Error::TlsError(format!("Failed to generate key pair: {e}")))?;

        let cert = cert_params
            .self_signed(&key_pair)
            .map_err(|e| Error::TlsError(format!("Failed to generate self-signed cert: {e}")))?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Write the bundle as `server-cert.pem` and `server-key.pem` into `dir`.
    ///
    /// Returns the certificate and key paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or files cannot be written.
    pub fn write_to_dir(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;

        let cert_path = dir.join(CERT_FILE_NAME);
        let key_path = dir.join(KEY_FILE_NAME);

        std::fs::write(&cert_path, &self.cert_pem)?;
        std::fs::write(&key_path, &self.key_pem)?;
        restrict_permissions(&key_path)?;

        Ok((cert_path, key_path))
    }

    /// SHA-256 fingerprint of the certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM cannot be parsed.
    pub fn fingerprint(&self) -> Result<String> {
        let certs = parse_certs(self.cert_pem.as_bytes())?;
        certs
            .first()
            .map(fingerprint)
            .ok_or_else(|| Error::TlsError("bundle holds no certificate".to_string()))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Parse every certificate in a PEM buffer.
///
/// # Errors
///
/// Returns an error if the PEM is malformed or holds no certificate.
pub fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &*pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::TlsError(format!("Failed to parse certificate: {e}")))?;

    if certs.is_empty() {
        return Err(Error::TlsError("no certificate found in PEM".to_string()));
    }
    Ok(certs)
}

/// Parse the first private key in a PEM buffer.
///
/// # Errors
///
/// Returns an error if the PEM is malformed or holds no key.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &*pem)
        .map_err(|e| Error::TlsError(format!("Failed to parse private key: {e}")))?
        .ok_or_else(|| Error::TlsError("no private key found in PEM".to_string()))
}

/// SHA-256 fingerprint of a DER certificate, as colon-separated hex.
#[must_use]
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    sha256(cert.as_ref())
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Compute SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// TLS configuration for Lanshare connections.
///
/// A device may act as either role, so this holds the server side (present
/// the provisioned certificate) and the client side (trust only the pinned
/// certificate) when the material for each is available.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    server: Option<Arc<rustls::ServerConfig>>,
    client: Option<Arc<rustls::ClientConfig>>,
    server_name: ServerName<'static>,
}

impl TlsConfig {
    /// Build a server-only configuration from PEM certificate chain and key.
    ///
    /// # Errors
    ///
    /// Returns an error if the material cannot be parsed or does not match.
    pub fn server_from_pem(cert_pem: &[u8], key_pem: &[u8], server_name: &str) -> Result<Self> {
        Ok(Self {
            server: Some(Arc::new(build_server_config(cert_pem, key_pem)?)),
            client: None,
            server_name: parse_server_name(server_name)?,
        })
    }

    /// Build a client-only configuration trusting the pinned PEM certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be parsed.
    pub fn client_from_pem(pinned_pem: &[u8], server_name: &str) -> Result<Self> {
        Ok(Self {
            server: None,
            client: Some(Arc::new(build_client_config(pinned_pem)?)),
            server_name: parse_server_name(server_name)?,
        })
    }

    /// Build both roles from one provisioned bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundle cannot be parsed.
    pub fn from_bundle(bundle: &CertificateBundle, server_name: &str) -> Result<Self> {
        Ok(Self {
            server: Some(Arc::new(build_server_config(
                bundle.cert_pem.as_bytes(),
                bundle.key_pem.as_bytes(),
            )?)),
            client: Some(Arc::new(build_client_config(bundle.cert_pem.as_bytes())?)),
            server_name: parse_server_name(server_name)?,
        })
    }

    /// Load whatever roles the configured files allow.
    ///
    /// The server role needs both certificate and key; the client role needs
    /// the pinned certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if a present file is unreadable or invalid, or if
    /// neither role could be configured.
    pub fn from_settings(settings: &TlsSettings) -> Result<Self> {
        let cert_path = settings.resolved_cert_path();
        let key_path = settings.resolved_key_path();
        let ca_path = settings.resolved_ca_path();

        let server = if cert_path.exists() && key_path.exists() {
            let cert_pem = std::fs::read(&cert_path)?;
            let key_pem = std::fs::read(&key_path)?;
            Some(Arc::new(build_server_config(&cert_pem, &key_pem)?))
        } else {
            tracing::debug!(
                "No server certificate at {}, listening disabled",
                cert_path.display()
            );
            None
        };

        let client = if ca_path.exists() {
            let pinned = std::fs::read(&ca_path)?;
            Some(Arc::new(build_client_config(&pinned)?))
        } else {
            None
        };

        if server.is_none() && client.is_none() {
            return Err(Error::TlsError(format!(
                "no TLS material found in {}",
                cert_path.parent().unwrap_or(&cert_path).display()
            )));
        }

        Ok(Self {
            server,
            client,
            server_name: parse_server_name(&settings.server_name)?,
        })
    }

    /// Get the server configuration, if this device can listen.
    #[must_use]
    pub fn server_config(&self) -> Option<&rustls::ServerConfig> {
        self.server.as_deref()
    }

    /// Get the client configuration, if this device can connect.
    #[must_use]
    pub fn client_config(&self) -> Option<&rustls::ClientConfig> {
        self.client.as_deref()
    }

    /// Name the peer certificate is verified against.
    #[must_use]
    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// Acceptor for the listening role.
    ///
    /// # Errors
    ///
    /// Returns an error if no server certificate was provisioned.
    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        self.server
            .clone()
            .map(TlsAcceptor::from)
            .ok_or_else(|| Error::TlsError("no server certificate provisioned".to_string()))
    }

    /// Connector for the connecting role.
    ///
    /// # Errors
    ///
    /// Returns an error if no pinned certificate was provisioned.
    pub fn connector(&self) -> Result<TlsConnector> {
        self.client
            .clone()
            .map(TlsConnector::from)
            .ok_or_else(|| Error::TlsError("no pinned certificate provisioned".to_string()))
    }
}

fn build_server_config(cert_pem: &[u8], key_pem: &[u8]) -> Result<rustls::ServerConfig> {
    let certs = parse_certs(cert_pem)?;
    let key = parse_private_key(key_pem)?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::TlsError(format!("Failed to build server config: {e}")))
}

fn build_client_config(pinned_pem: &[u8]) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in parse_certs(pinned_pem)? {
        roots
            .add(cert)
            .map_err(|e| Error::TlsError(format!("Failed to pin certificate: {e}")))?;
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn parse_server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name.to_string())
        .map_err(|e| Error::TlsError(format!("invalid server name '{name}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NAME: &str = crate::DEFAULT_SERVER_NAME;

    #[test]
    fn test_generate_bundle() {
        let bundle = CertificateBundle::generate(NAME).expect("generate");
        assert!(bundle.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.key_pem.contains("PRIVATE KEY"));

        let other = CertificateBundle::generate(NAME).expect("generate");
        assert_ne!(
            bundle.fingerprint().unwrap(),
            other.fingerprint().unwrap(),
            "Each bundle should carry a fresh key"
        );
    }

    #[test]
    fn test_fingerprint_format() {
        let bundle = CertificateBundle::generate(NAME).expect("generate");
        let fp = bundle.fingerprint().expect("fingerprint");
        assert_eq!(fp.split(':').count(), 32);
        assert!(fp
            .chars()
            .all(|c| c == ':' || c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_server_and_client_configs() {
        let bundle = CertificateBundle::generate(NAME).expect("generate");

        let server =
            TlsConfig::server_from_pem(bundle.cert_pem.as_bytes(), bundle.key_pem.as_bytes(), NAME)
                .expect("server config");
        assert!(server.server_config().is_some());
        assert!(server.client_config().is_none());
        assert!(server.connector().is_err());

        let client = TlsConfig::client_from_pem(bundle.cert_pem.as_bytes(), NAME)
            .expect("client config");
        assert!(client.client_config().is_some());
        assert!(client.server_config().is_none());
        assert!(client.acceptor().is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_certs(b"not a pem").is_err());
        assert!(parse_private_key(b"not a pem").is_err());
        assert!(TlsConfig::client_from_pem(b"", NAME).is_err());
    }

    #[test]
    fn test_from_settings_reads_written_bundle() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = CertificateBundle::generate(NAME).expect("generate");
        let (cert_path, key_path) = bundle.write_to_dir(temp_dir.path()).expect("write");

        let settings = TlsSettings {
            cert_path: Some(cert_path),
            key_path: Some(key_path),
            ca_path: None,
            server_name: NAME.to_string(),
        };
        let tls = TlsConfig::from_settings(&settings).expect("load");
        assert!(tls.server_config().is_some());
        assert!(tls.client_config().is_some());
    }

    #[test]
    fn test_from_settings_without_material_fails() {
        let temp_dir = TempDir::new().unwrap();
        let settings = TlsSettings {
            cert_path: Some(temp_dir.path().join("missing-cert.pem")),
            key_path: Some(temp_dir.path().join("missing-key.pem")),
            ca_path: None,
            server_name: NAME.to_string(),
        };
        assert!(matches!(
            TlsConfig::from_settings(&settings),
            Err(Error::TlsError(_))
        ));
    }

    #[tokio::test]
    async fn test_pinned_handshake_loopback() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        let bundle = CertificateBundle::generate(NAME).expect("generate");
        let tls = TlsConfig::from_bundle(&bundle, NAME).expect("tls");
        let acceptor = tls.acceptor().expect("acceptor");
        let connector = tls.connector().expect("connector");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let server_handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut tls_stream = acceptor.accept(stream).await.expect("tls accept");

            let mut buf = [0u8; 64];
            let n = tls_stream.read(&mut buf).await.expect("read");
            tls_stream.write_all(&buf[..n]).await.expect("write");
        });

        let stream = TcpStream::connect(addr).await.expect("connect");
        let mut tls_stream = connector
            .connect(tls.server_name().clone(), stream)
            .await
            .expect("tls connect");

        tls_stream.write_all(b"pinned").await.expect("write");
        let mut buf = [0u8; 64];
        let n = tls_stream.read(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], b"pinned");

        server_handle.await.expect("server task");
    }

    #[tokio::test]
    async fn test_unpinned_certificate_rejected() {
        use tokio::net::{TcpListener, TcpStream};

        let server_bundle = CertificateBundle::generate(NAME).expect("generate");
        let other_bundle = CertificateBundle::generate(NAME).expect("generate");

        let server = TlsConfig::from_bundle(&server_bundle, NAME).expect("server tls");
        let client = TlsConfig::from_bundle(&other_bundle, NAME).expect("client tls");
        let acceptor = server.acceptor().expect("acceptor");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let _ = acceptor.accept(stream).await;
            }
        });

        let stream = TcpStream::connect(addr).await.expect("connect");
        let result = client
            .connector()
            .expect("connector")
            .connect(client.server_name().clone(), stream)
            .await;

        assert!(result.is_err(), "A certificate that is not pinned must be refused");
    }
}
