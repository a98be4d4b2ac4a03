//! Listen command implementation.
//!
//! Starts the listener, shows the connection ticket (box and QR code), and
//! exchanges files with whichever peer connects.

use anyhow::{Context, Result};

use lanshare_core::peer::Peer;
use lanshare_core::qr;
use lanshare_core::ticket::ConnectionTicket;

use super::session::{self, StopWhen};
use super::ListenArgs;
use crate::ui;

/// Run the listen command.
pub async fn run(args: ListenArgs) -> Result<()> {
    let mut config = super::load_config()?;
    if let Some(name) = &args.session.name {
        config.general.device_name.clone_from(name);
    }
    if let Some(output) = &args.session.output {
        config.general.output_dir = Some(output.clone());
    }
    let port = args.port.unwrap_or(config.network.port);

    let queue = super::collect_sources(&args.session.files, &args.session.images)?;

    let peer = Peer::from_config(&config).context("Failed to load TLS material")?;
    let addr = peer
        .start_listening(port)
        .await
        .with_context(|| format!("Failed to listen on port {port}"))?;

    let ticket = ConnectionTicket::for_listener(addr, &config.general.device_name);
    let quiet = args.session.quiet;

    if !quiet {
        ui::print_header();
        ui::TicketBox::new(&ticket).display();
        println!();

        if !args.no_qr {
            let rendered = if args.ascii {
                qr::render_ascii(&ticket)
            } else {
                qr::render_unicode(&ticket)
            };
            match rendered {
                Ok(code) => {
                    for line in code.lines() {
                        println!("  {line}");
                    }
                    println!();
                }
                Err(e) => tracing::warn!("Could not render QR code: {e}"),
            }
        }

        println!(
            "  Saving received files to {}",
            config.general.resolved_output_dir().display()
        );
        println!("  Waiting for a peer... (Ctrl+C to stop)");
        println!();
    } else {
        println!("{ticket}");
    }

    let stop = StopWhen {
        queue_done: false,
        peer_left: args.once,
    };
    let status = session::run(&peer, queue, stop, quiet).await?;

    if args.session.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    peer.shutdown().await;
    Ok(())
}
