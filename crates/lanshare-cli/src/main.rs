//! Lanshare CLI - peer-to-peer file transfer on the local network
//!
//! One device listens and shows a connection ticket, the other connects to
//! it. Both can then send files over a pinned-certificate TLS connection.
//!
//! ## Quick Start
//!
//! ```bash
//! # Once, on one device; copy the two files to the other device's TLS dir
//! lanshare certs generate
//!
//! # Device A
//! lanshare listen
//!
//! # Device B
//! lanshare connect "tcp://192.168.1.20:4000|Desktop" --send ./photo.jpg
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Listen(args) => commands::listen::run(args).await,
        Command::Connect(args) => commands::connect::run(args).await,
        Command::Certs(args) => commands::certs::run(args),
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,lanshare=info,lanshare_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
