//! UI utilities for the Lanshare CLI.

use std::io::{self, Write};

use lanshare_core::file::format_size;
use lanshare_core::ticket::ConnectionTicket;

const BOX_WIDTH: usize = 41;

/// A formatted box for displaying a connection ticket.
pub struct TicketBox<'a> {
    ticket: &'a ConnectionTicket,
}

impl<'a> TicketBox<'a> {
    /// Create a new ticket box.
    #[must_use]
    pub const fn new(ticket: &'a ConnectionTicket) -> Self {
        Self { ticket }
    }

    /// Display the ticket box to stdout.
    pub fn display(&self) {
        let address = format!("Address:  {}", self.ticket.endpoint);
        let device = format!("Device:   {}", self.ticket.device_name);

        println!("  ┌{}┐", "─".repeat(BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));
        println!("  │{}│", center_in_box(&address, BOX_WIDTH));
        println!("  │{}│", center_in_box(&device, BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));
        println!("  └{}┘", "─".repeat(BOX_WIDTH));
        println!();
        println!("  Ticket: {}", self.ticket);
    }
}

fn center_in_box(content: &str, width: usize) -> String {
    let content_len = content.chars().count();
    let padding = width.saturating_sub(content_len);
    let left = padding / 2;
    let right = padding - left;
    format!("{}{}{}", " ".repeat(left), content, " ".repeat(right))
}

/// Print the banner shown at the top of interactive commands.
pub fn print_header() {
    println!();
    println!("Lanshare v{}", lanshare_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
}

/// Redraw the single-line send progress indicator.
pub fn show_progress(name: &str, sent: u64, total: u64) {
    let percent = if total == 0 {
        100.0
    } else {
        (sent as f64 / total as f64 * 100.0).min(100.0)
    };
    print!(
        "\r  Sending  {} {} / {} ({:.0}%)   ",
        name,
        format_size(sent),
        format_size(total),
        percent
    );
    let _ = io::stdout().flush();
}

/// Finish the progress line, if one is showing, so the next message starts
/// on a fresh line.
pub fn clear_progress(shown: &mut bool) {
    if *shown {
        println!();
        *shown = false;
    }
}
