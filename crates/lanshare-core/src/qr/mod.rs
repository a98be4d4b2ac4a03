//! QR codes for connection tickets.
//!
//! The listening device renders its [`ConnectionTicket`] so the other device
//! can scan it instead of typing an address.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lanshare_core::{qr, ticket::ConnectionTicket};
//!
//! let ticket = ConnectionTicket::for_listener(addr, "Desktop");
//! println!("{}", qr::render_unicode(&ticket)?);
//! ```

use qrcode::render::unicode;
use qrcode::{EcLevel, QrCode};

use crate::error::{Error, Result};
use crate::ticket::ConnectionTicket;

fn encode(ticket: &ConnectionTicket) -> Result<QrCode> {
    QrCode::with_error_correction_level(ticket.to_string(), EcLevel::M)
        .map_err(|e| Error::Internal(format!("Failed to generate QR code: {e}")))
}

/// Render a ticket with Unicode half blocks, two modules per character row.
///
/// Colors are inverted for dark terminal backgrounds.
///
/// # Errors
///
/// Returns an error if the ticket is too long for a QR code.
pub fn render_unicode(ticket: &ConnectionTicket) -> Result<String> {
    Ok(encode(ticket)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

/// Render a ticket with plain `#` characters for terminals without Unicode.
///
/// # Errors
///
/// Returns an error if the ticket is too long for a QR code.
pub fn render_ascii(ticket: &ConnectionTicket) -> Result<String> {
    Ok(encode(ticket)?
        .render::<char>()
        .dark_color('#')
        .light_color(' ')
        .module_dimensions(2, 1)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> ConnectionTicket {
        "tcp://192.168.1.20:4000|Desktop".parse().unwrap()
    }

    #[test]
    fn test_render_unicode() {
        let rendered = render_unicode(&ticket()).unwrap();
        assert!(rendered.lines().count() > 10);
        assert!(rendered.contains('█') || rendered.contains('▀') || rendered.contains('▄'));
    }

    #[test]
    fn test_render_ascii() {
        let rendered = render_ascii(&ticket()).unwrap();
        assert!(rendered.contains('#'));
        let widths: Vec<usize> = rendered.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_oversized_ticket_is_an_error() {
        let mut ticket = ticket();
        ticket.device_name = "x".repeat(5000);
        assert!(render_unicode(&ticket).is_err());
    }
}
