//! CLI command definitions and handlers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use lanshare_core::config::Config;
use lanshare_core::file::FileSource;

pub mod certs;
pub mod config;
pub mod connect;
pub mod listen;
pub mod session;

/// Load and validate the configuration, falling back to defaults when no
/// file exists yet.
pub fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Describe the files and images queued with `--send` / `--image`.
pub fn collect_sources(files: &[PathBuf], images: &[PathBuf]) -> Result<Vec<FileSource>> {
    let mut sources = Vec::with_capacity(files.len() + images.len());
    for path in files {
        sources.push(FileSource::file(path).with_context(|| format!("Cannot send {}", path.display()))?);
    }
    for path in images {
        sources.push(FileSource::image(path).with_context(|| format!("Cannot send {}", path.display()))?);
    }
    Ok(sources)
}

/// Lanshare - peer-to-peer file transfer on the local network
#[derive(Parser)]
#[command(name = "lanshare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Wait for a peer to connect and exchange files with it
    Listen(ListenArgs),

    /// Connect to a listening peer and exchange files with it
    Connect(ConnectArgs),

    /// Manage the provisioned TLS certificate
    Certs(CertsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Options shared by `listen` and `connect`.
#[derive(Parser)]
pub struct SessionArgs {
    /// Files to send once connected
    #[arg(short, long = "send", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Images to send once connected
    #[arg(short, long = "image", value_name = "PATH")]
    pub images: Vec<PathBuf>,

    /// Display name for this session
    #[arg(long)]
    pub name: Option<String>,

    /// Directory for received files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the final status as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the listen command
#[derive(Parser)]
pub struct ListenArgs {
    /// Port to listen on (defaults to the configured port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not print the QR code
    #[arg(long)]
    pub no_qr: bool,

    /// Print the QR code with ASCII characters only
    #[arg(long)]
    pub ascii: bool,

    /// Stop after the first peer disconnects
    #[arg(long)]
    pub once: bool,

    #[command(flatten)]
    pub session: SessionArgs,
}

/// Arguments for the connect command
#[derive(Parser)]
pub struct ConnectArgs {
    /// Connection ticket (tcp://IP:PORT|NAME) or HOST[:PORT]
    pub target: String,

    /// Stay connected after the queued files are sent
    #[arg(long)]
    pub stay: bool,

    #[command(flatten)]
    pub session: SessionArgs,
}

/// Arguments for the certs command
#[derive(Parser)]
pub struct CertsArgs {
    /// Certificate action
    #[command(subcommand)]
    pub action: CertsAction,
}

/// Certificate actions
#[derive(Subcommand)]
pub enum CertsAction {
    /// Generate a self-signed certificate and key to share between devices
    Generate {
        /// Output directory (defaults to the configured TLS directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Name the certificate is issued for
        #[arg(long)]
        server_name: Option<String>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },
    /// Show the configured certificate paths and fingerprint
    Show,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Configuration action
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Value to set
        value: String,
    },
    /// Show all configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Reset configuration to defaults
    Reset,
}
