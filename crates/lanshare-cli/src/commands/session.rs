//! Shared connected-session loop for `listen` and `connect`.
//!
//! Sends the queued files one at a time, reports received files as they
//! land, and ends on Ctrl+C, when the peer leaves (if asked to), or when the
//! queue is done (if asked to).

use std::collections::{HashSet, VecDeque};
use std::io::{self, Write};

use anyhow::Result;
use uuid::Uuid;

use lanshare_core::file::{format_size, FileSource};
use lanshare_core::peer::{Peer, PeerStatus};
use lanshare_core::Error;

use crate::ui;

/// When the loop should end on its own.
#[derive(Debug, Clone, Copy)]
pub struct StopWhen {
    /// After the queue has been sent
    pub queue_done: bool,
    /// After a connected peer goes away
    pub peer_left: bool,
}

/// The file currently being sent.
struct InFlight {
    id: Uuid,
    source: FileSource,
    /// Connection byte counter when the send started
    baseline: u64,
}

impl InFlight {
    /// Bytes of this file delivered so far.
    fn sent(&self, status: &PeerStatus) -> u64 {
        status.total_sent.saturating_sub(self.baseline)
    }
}

/// Run until stopped, then disconnect. Returns the final status.
pub async fn run(
    peer: &Peer,
    queue: Vec<FileSource>,
    stop: StopWhen,
    quiet: bool,
) -> Result<PeerStatus> {
    let mut queue: VecDeque<FileSource> = queue.into();
    let mut rx = peer.status();
    let mut in_flight: Option<InFlight> = None;
    let mut reported: HashSet<Uuid> = HashSet::new();
    let mut was_connected = false;
    let mut progress_shown = false;

    loop {
        let status = rx.borrow_and_update().clone();
        let newly_connected = status.connected && !was_connected;
        let just_left = was_connected && !status.connected;
        was_connected = status.connected;

        if newly_connected && !quiet {
            ui::clear_progress(&mut progress_shown);
            println!(
                "  Connected to {}",
                status.remote_device_name.as_deref().unwrap_or("peer")
            );
        }

        report_received(&status, &mut reported, quiet, &mut progress_shown);

        if let Some(current) = &in_flight {
            let source = &current.source;
            match status.sent_files.iter().find(|r| r.id == current.id) {
                Some(record) if record.available => {
                    if !quiet {
                        ui::clear_progress(&mut progress_shown);
                        println!("  Sent     {} ({})", source.name, format_size(record.size));
                    }
                    in_flight = None;
                }
                _ if !status.outbound_active => {
                    ui::clear_progress(&mut progress_shown);
                    eprintln!("  Failed to send {}", source.name);
                    in_flight = None;
                }
                _ => {
                    if !quiet {
                        ui::show_progress(&source.name, current.sent(&status), source.size);
                        progress_shown = true;
                    }
                }
            }
        }

        if status.connected && in_flight.is_none() {
            if let Some(source) = queue.pop_front() {
                match peer.send_file(source.clone()).await {
                    Ok(id) => {
                        in_flight = Some(InFlight {
                            id,
                            source,
                            baseline: status.total_sent,
                        });
                    }
                    Err(Error::Busy(_)) => queue.push_front(source),
                    Err(e) => eprintln!("  Cannot send {}: {e}", source.name),
                }
                continue;
            }
        }

        if stop.queue_done && status.connected && queue.is_empty() && in_flight.is_none() {
            break;
        }

        if just_left {
            ui::clear_progress(&mut progress_shown);
            match &status.last_error {
                Some(reason) => println!("  Peer disconnected: {reason}"),
                None => println!("  Peer disconnected"),
            }
            if stop.peer_left {
                break;
            }
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                ui::clear_progress(&mut progress_shown);
                println!();
                println!("  Interrupted.");
                break;
            }
        }
    }

    let final_status = peer.snapshot();
    peer.disconnect().await?;
    Ok(final_status)
}

fn report_received(
    status: &PeerStatus,
    reported: &mut HashSet<Uuid>,
    quiet: bool,
    progress_shown: &mut bool,
) {
    for record in &status.received_files {
        if reported.contains(&record.id) {
            continue;
        }
        if let Some(path) = record.source_ref.as_ref().filter(|_| record.available) {
            reported.insert(record.id);
            if !quiet {
                ui::clear_progress(progress_shown);
                println!(
                    "  Received {} ({}) -> {}",
                    record.name,
                    format_size(record.size),
                    path.display()
                );
                let _ = io::stdout().flush();
            }
        }
    }
}
