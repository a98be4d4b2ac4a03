//! Configuration management for Lanshare.
//!
//! This module handles loading, saving, and validating Lanshare configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/lanshare/config.toml` |
//! | macOS | `~/Library/Application Support/Lanshare/config.toml` |
//! | Windows | `%APPDATA%\Lanshare\config.toml` |
//!
//! The provisioned TLS material lives next to it in a `tls/` directory unless
//! the `[tls]` section points elsewhere.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanshare_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Device name: {}", config.general.device_name);
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Lanshare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
    /// TLS material settings
    pub tls: TlsSettings,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Display name sent in the handshake
    pub device_name: String,
    /// Directory received files are written to
    pub output_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            output_dir: None,
        }
    }
}

impl GeneralConfig {
    /// Output directory, falling back to the platform download directory.
    #[must_use]
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            directories::UserDirs::new()
                .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lanshare")
        })
    }
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the listener binds to
    pub bind_address: IpAddr,
    /// Listening port
    pub port: u16,
    /// Socket send/receive buffer cap in bytes
    pub socket_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: crate::DEFAULT_PORT,
            socket_buffer_size: crate::MAX_FRAME_SIZE,
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size for transfers
    pub chunk_size: usize,
    /// How long an active transfer may wait for the peer's next frame
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Tear the connection down on protocol violations instead of dropping
    /// the offending message
    pub strict_protocol: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_secs(crate::DEFAULT_REQUEST_TIMEOUT_SECS),
            strict_protocol: true,
        }
    }
}

/// Locations of the provisioned TLS material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Server certificate chain (PEM)
    pub cert_path: Option<PathBuf>,
    /// Server private key (PEM)
    pub key_path: Option<PathBuf>,
    /// Pinned certificate clients trust (PEM), defaults to the server cert
    pub ca_path: Option<PathBuf>,
    /// Name the certificate is issued for and verified against
    pub server_name: String,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            ca_path: None,
            server_name: crate::DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

impl TlsSettings {
    /// Server certificate path.
    #[must_use]
    pub fn resolved_cert_path(&self) -> PathBuf {
        self.cert_path
            .clone()
            .unwrap_or_else(|| Config::tls_dir().join("server-cert.pem"))
    }

    /// Server private key path.
    #[must_use]
    pub fn resolved_key_path(&self) -> PathBuf {
        self.key_path
            .clone()
            .unwrap_or_else(|| Config::tls_dir().join("server-key.pem"))
    }

    /// Pinned certificate path.
    #[must_use]
    pub fn resolved_ca_path(&self) -> PathBuf {
        self.ca_path
            .clone()
            .unwrap_or_else(|| self.resolved_cert_path())
    }
}

fn default_device_name() -> String {
    hostname::get().map_or_else(
        |_| "Lanshare Device".to_string(),
        |h| h.to_string_lossy().to_string(),
    )
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would break the transfer protocol.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        // base64 inflates a chunk by 4/3, plus the JSON envelope
        let max_chunk = crate::MAX_FRAME_SIZE / 4 * 3 - 1024;

        if self.transfer.chunk_size == 0 {
            return Err(Error::InvalidConfig {
                key: "transfer.chunk_size".to_string(),
                reason: "must be at least 1 byte".to_string(),
            });
        }
        if self.transfer.chunk_size > max_chunk {
            return Err(Error::InvalidConfig {
                key: "transfer.chunk_size".to_string(),
                reason: format!("must not exceed {max_chunk} bytes"),
            });
        }
        if self.transfer.request_timeout.is_zero() {
            return Err(Error::InvalidConfig {
                key: "transfer.request_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.general.device_name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                key: "general.device_name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "lanshare", "Lanshare")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Directory holding the provisioned TLS material.
    #[must_use]
    pub fn tls_dir() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tls")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.strip_suffix('s')
            .map(|secs| {
                secs.parse()
                    .map(Duration::from_secs)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.network.port, crate::DEFAULT_PORT);
        assert_eq!(config.network.bind_address.to_string(), "0.0.0.0");
        assert_eq!(config.transfer.chunk_size, 8 * 1024);
        assert_eq!(config.transfer.request_timeout, Duration::from_secs(30));
        assert!(config.transfer.strict_protocol);
        assert_eq!(config.tls.server_name, crate::DEFAULT_SERVER_NAME);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.general.device_name = "Test Device".to_string();
        original.network.port = 4100;
        original.transfer.chunk_size = 16 * 1024;
        original.transfer.request_timeout = Duration::from_secs(120);
        original.tls.server_name = "pinned.example".to_string();

        original.save_to(&path).expect("save");
        let loaded = Config::load_from(&path).expect("load");

        assert_eq!(loaded.general.device_name, "Test Device");
        assert_eq!(loaded.network.port, 4100);
        assert_eq!(loaded.transfer.chunk_size, 16 * 1024);
        assert_eq!(loaded.transfer.request_timeout, Duration::from_secs(120));
        assert_eq!(loaded.tls.server_name, "pinned.example");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.network.port, crate::DEFAULT_PORT);
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[general]
device_name = "Pixel"

[transfer]
request_timeout = "2m"
"#;

        let config: Config = toml::from_str(partial_toml).expect("parse partial config");

        assert_eq!(config.general.device_name, "Pixel");
        assert_eq!(config.transfer.request_timeout, Duration::from_secs(120));
        assert_eq!(config.transfer.chunk_size, crate::DEFAULT_CHUNK_SIZE);
        assert_eq!(config.network.port, crate::DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[transfer]\nchunk_size = 0\n").unwrap();

        match Config::load_from(&path) {
            Err(Error::InvalidConfig { key, .. }) => assert_eq!(key, "transfer.chunk_size"),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }

        let mut config = Config::default();
        config.transfer.chunk_size = crate::MAX_FRAME_SIZE;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[transfer]\nrequest_timeout = \"soon\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_tls_paths_default_to_tls_dir() {
        let tls = TlsSettings::default();
        assert!(tls.resolved_cert_path().ends_with("tls/server-cert.pem"));
        assert!(tls.resolved_key_path().ends_with("tls/server-key.pem"));
        assert_eq!(tls.resolved_ca_path(), tls.resolved_cert_path());

        let pinned = TlsSettings {
            ca_path: Some(PathBuf::from("/etc/lanshare/ca.pem")),
            ..TlsSettings::default()
        };
        assert_eq!(pinned.resolved_ca_path(), PathBuf::from("/etc/lanshare/ca.pem"));
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with("config.toml"));
    }
}
