//! Connect command implementation.
//!
//! Connects to a listening peer given a ticket or `HOST[:PORT]`, sends the
//! queued files, and optionally stays connected to receive.

use anyhow::{Context, Result};

use lanshare_core::connection::{parse_endpoint, Endpoint};
use lanshare_core::peer::Peer;
use lanshare_core::ticket::{ConnectionTicket, SCHEME};

use super::session::{self, StopWhen};
use super::ConnectArgs;
use crate::ui;

/// Run the connect command.
pub async fn run(args: ConnectArgs) -> Result<()> {
    let mut config = super::load_config()?;
    if let Some(name) = &args.session.name {
        config.general.device_name.clone_from(name);
    }
    if let Some(output) = &args.session.output {
        config.general.output_dir = Some(output.clone());
    }

    let (endpoint, listener_name) = resolve_target(&args.target)?;
    let queue = super::collect_sources(&args.session.files, &args.session.images)?;
    let quiet = args.session.quiet;

    if !quiet {
        ui::print_header();
        match &listener_name {
            Some(name) => println!("  Connecting to {name} at {endpoint}..."),
            None => println!("  Connecting to {endpoint}..."),
        }
    }

    let peer = Peer::from_config(&config).context("Failed to load TLS material")?;
    if let Err(e) = peer
        .connect(&endpoint.host, endpoint.port, &config.general.device_name)
        .await
    {
        if let Some(hint) = e.suggestion() {
            eprintln!();
            eprintln!("  {hint}");
        }
        return Err(e).with_context(|| format!("Failed to connect to {endpoint}"));
    }

    let stop = StopWhen {
        queue_done: !args.stay && !queue.is_empty(),
        peer_left: true,
    };
    let status = session::run(&peer, queue, stop, quiet).await?;

    if args.session.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    peer.shutdown().await;
    Ok(())
}

/// Accept either a full ticket or a bare `HOST[:PORT]`.
fn resolve_target(target: &str) -> Result<(Endpoint, Option<String>)> {
    if target.trim_start().starts_with(SCHEME) {
        let ticket: ConnectionTicket = target.parse().context("Invalid connection ticket")?;
        return Ok((ticket.endpoint, Some(ticket.device_name)));
    }
    Ok((parse_endpoint(target)?, None))
}
