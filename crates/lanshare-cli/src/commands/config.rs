//! Config command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use lanshare_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Keys accepted by `config get` and `config set`.
const KEYS: &[&str] = &[
    "device_name",
    "output_dir",
    "bind_address",
    "port",
    "socket_buffer_size",
    "chunk_size",
    "request_timeout",
    "strict_protocol",
    "cert_path",
    "key_path",
    "ca_path",
    "server_name",
];

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Get { key } => {
            let config = Config::load().context("Failed to load configuration")?;
            match get_config_value(&config, &key) {
                Some(v) => println!("{}: {}", key, v),
                None => unknown_key(&key),
            }
        }

        ConfigAction::Set { key, value } => {
            let mut config = Config::load().context("Failed to load configuration")?;
            if set_config_value(&mut config, &key, &value)? {
                config
                    .validate()
                    .with_context(|| format!("Refusing to set {key} = {value}"))?;
                config.save()?;
                println!("Set {} = {}", key, value);
            } else {
                unknown_key(&key);
            }
        }

        ConfigAction::Show => {
            let config = Config::load().context("Failed to load configuration")?;
            show(&config);
        }

        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }

        ConfigAction::Reset => {
            Config::default().save()?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}

fn unknown_key(key: &str) {
    println!("Unknown configuration key: {}", key);
    println!("Known keys: {}", KEYS.join(", "));
}

fn show(config: &Config) {
    let or_default = |path: &Option<PathBuf>, resolved: PathBuf| match path {
        Some(p) => format!("\"{}\"", p.display()),
        None => format!("(default: {})", resolved.display()),
    };

    println!();
    println!("Lanshare Configuration");
    println!("{}", "─".repeat(50));
    println!();
    println!("[general]");
    println!("  device_name = \"{}\"", config.general.device_name);
    println!(
        "  output_dir = {}",
        or_default(
            &config.general.output_dir,
            config.general.resolved_output_dir()
        )
    );
    println!();
    println!("[network]");
    println!("  bind_address = \"{}\"", config.network.bind_address);
    println!("  port = {}", config.network.port);
    println!("  socket_buffer_size = {}", config.network.socket_buffer_size);
    println!();
    println!("[transfer]");
    println!("  chunk_size = {}", config.transfer.chunk_size);
    println!(
        "  request_timeout = \"{}s\"",
        config.transfer.request_timeout.as_secs()
    );
    println!("  strict_protocol = {}", config.transfer.strict_protocol);
    println!();
    println!("[tls]");
    println!(
        "  cert_path = {}",
        or_default(&config.tls.cert_path, config.tls.resolved_cert_path())
    );
    println!(
        "  key_path = {}",
        or_default(&config.tls.key_path, config.tls.resolved_key_path())
    );
    println!(
        "  ca_path = {}",
        or_default(&config.tls.ca_path, config.tls.resolved_ca_path())
    );
    println!("  server_name = \"{}\"", config.tls.server_name);
    println!();
}

fn get_config_value(config: &Config, key: &str) -> Option<String> {
    let path = |p: &Option<PathBuf>| {
        p.as_ref()
            .map_or_else(String::new, |p| p.display().to_string())
    };

    match key {
        "device_name" => Some(config.general.device_name.clone()),
        "output_dir" => Some(config.general.resolved_output_dir().display().to_string()),
        "bind_address" => Some(config.network.bind_address.to_string()),
        "port" => Some(config.network.port.to_string()),
        "socket_buffer_size" => Some(config.network.socket_buffer_size.to_string()),
        "chunk_size" => Some(config.transfer.chunk_size.to_string()),
        "request_timeout" => Some(format!("{}s", config.transfer.request_timeout.as_secs())),
        "strict_protocol" => Some(config.transfer.strict_protocol.to_string()),
        "cert_path" => Some(path(&config.tls.cert_path)),
        "key_path" => Some(path(&config.tls.key_path)),
        "ca_path" => Some(path(&config.tls.ca_path)),
        "server_name" => Some(config.tls.server_name.clone()),
        _ => None,
    }
}

fn set_config_value(config: &mut Config, key: &str, value: &str) -> Result<bool> {
    // An empty value clears optional paths back to their defaults
    let optional_path = |value: &str| (!value.is_empty()).then(|| PathBuf::from(value));

    match key {
        "device_name" => config.general.device_name = value.to_string(),
        "output_dir" => config.general.output_dir = optional_path(value),
        "bind_address" => {
            config.network.bind_address = value
                .parse()
                .with_context(|| format!("Invalid IP address: {value}"))?;
        }
        "port" => config.network.port = value.parse()?,
        "socket_buffer_size" => config.network.socket_buffer_size = value.parse()?,
        "chunk_size" => config.transfer.chunk_size = value.parse()?,
        "request_timeout" => config.transfer.request_timeout = parse_duration(value)?,
        "strict_protocol" => config.transfer.strict_protocol = value.parse()?,
        "cert_path" => config.tls.cert_path = optional_path(value),
        "key_path" => config.tls.key_path = optional_path(value),
        "ca_path" => config.tls.ca_path = optional_path(value),
        "server_name" => config.tls.server_name = value.to_string(),
        _ => return Ok(false),
    }
    Ok(true)
}

/// Parse `30`, `30s`, or `2m`.
fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let (digits, multiplier) = if let Some(mins) = value.strip_suffix('m') {
        (mins, 60)
    } else if let Some(secs) = value.strip_suffix('s') {
        (secs, 1)
    } else {
        (value, 1)
    };

    let Ok(amount) = digits.trim().parse::<u64>() else {
        bail!("Invalid duration '{value}' (expected e.g. 30s or 2m)");
    };
    Ok(Duration::from_secs(amount * multiplier))
}
