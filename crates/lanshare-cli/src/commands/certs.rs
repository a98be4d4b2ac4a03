//! Certs command implementation.
//!
//! Both devices need the same certificate: the listener presents it and the
//! connecting side pins it. `generate` creates the pair once, and the files
//! are then copied to the other device.

use std::path::Path;

use anyhow::{bail, Context, Result};

use lanshare_core::config::Config;
use lanshare_core::crypto::{self, CertificateBundle, CERT_FILE_NAME, KEY_FILE_NAME};

use super::{CertsAction, CertsArgs};

/// Run the certs command.
pub fn run(args: CertsArgs) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match args.action {
        CertsAction::Generate {
            dir,
            server_name,
            force,
        } => {
            let dir = dir.unwrap_or_else(Config::tls_dir);
            let server_name = server_name.unwrap_or_else(|| config.tls.server_name.clone());
            generate(&dir, &server_name, force)?;
        }
        CertsAction::Show => show(&config)?,
    }

    Ok(())
}

fn generate(dir: &Path, server_name: &str, force: bool) -> Result<()> {
    let existing: Vec<_> = [CERT_FILE_NAME, KEY_FILE_NAME]
        .iter()
        .map(|name| dir.join(name))
        .filter(|path| path.exists())
        .collect();
    if !force && !existing.is_empty() {
        bail!(
            "{} already exists (use --force to overwrite)",
            existing[0].display()
        );
    }

    let bundle = CertificateBundle::generate(server_name)?;
    let (cert_path, key_path) = bundle
        .write_to_dir(dir)
        .with_context(|| format!("Failed to write certificate to {}", dir.display()))?;

    println!();
    println!("  Generated a self-signed certificate for \"{server_name}\"");
    println!();
    println!("  Certificate: {}", cert_path.display());
    println!("  Private key: {}", key_path.display());
    println!("  Fingerprint: {}", bundle.fingerprint()?);
    println!();
    println!("  Copy both files to the same location on the other device.");
    println!("  Devices that only connect need just the certificate.");
    println!();

    Ok(())
}

fn show(config: &Config) -> Result<()> {
    let cert_path = config.tls.resolved_cert_path();
    let key_path = config.tls.resolved_key_path();
    let ca_path = config.tls.resolved_ca_path();

    let state = |path: &Path| if path.exists() { "" } else { " (missing)" };

    println!();
    println!("  Server name: {}", config.tls.server_name);
    println!("  Certificate: {}{}", cert_path.display(), state(&cert_path));
    println!("  Private key: {}{}", key_path.display(), state(&key_path));
    println!("  Pinned cert: {}{}", ca_path.display(), state(&ca_path));

    if ca_path.exists() {
        let pem = std::fs::read(&ca_path)
            .with_context(|| format!("Failed to read {}", ca_path.display()))?;
        let certs = crypto::parse_certs(&pem)?;
        for cert in &certs {
            println!("  Fingerprint: {}", crypto::fingerprint(cert));
        }
    } else {
        println!();
        println!("  No certificate yet. Run `lanshare certs generate` on one device");
        println!("  and copy the files to the other.");
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();

        generate(dir.path(), "lanshare.local", false).unwrap();
        let first = std::fs::read(dir.path().join(CERT_FILE_NAME)).unwrap();

        assert!(generate(dir.path(), "lanshare.local", false).is_err());
        assert_eq!(
            std::fs::read(dir.path().join(CERT_FILE_NAME)).unwrap(),
            first
        );

        generate(dir.path(), "lanshare.local", true).unwrap();
        assert_ne!(
            std::fs::read(dir.path().join(CERT_FILE_NAME)).unwrap(),
            first
        );
    }
}
