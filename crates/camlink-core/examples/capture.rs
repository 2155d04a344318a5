//! Camera capture tool
//!
//! Opens a camera session, runs the full acquisition sequence and saves the
//! image.
//!
//! Usage:
//!   cargo run --example capture -- [OPTIONS] [PORT]
//!
//! Options:
//!   --config FILE     Load session settings from a JSON file
//!   --save-config F   Write the effective settings to a JSON file and exit
//!   --family NAME     packet (default) or framebuffer
//!   --baud RATE       Transfer baud rate
//!   --packet SIZE     Upload packet size (256/512/1024/2048)
//!   --timeout MS      Read timeout in ms
//!   --retries N       Re-requests per timed-out packet
//!   --abort           Abort on the first failed packet instead of skipping it
//!   --out DIR         Output directory (default: .)
//!   --name FILE       Output file name (default: timestamped)
//!   --demo            Use the simulated camera
//!   --list-ports      List serial ports and exit

use anyhow::{bail, Context, Result};
use camlink_core::prelude::*;
use camlink_core::protocol::list_ports;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config = SessionConfig::default();
    let mut out_dir = PathBuf::from(".");
    let mut name: Option<String> = None;
    let mut save_config: Option<PathBuf> = None;
    let mut demo = false;

    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| -> Result<&str> {
            args.get(i + 1)
                .map(String::as_str)
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--config" => {
                let path = PathBuf::from(value(i)?);
                let port = std::mem::take(&mut config.port_name);
                config = SessionConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?;
                if config.port_name.is_empty() {
                    config.port_name = port;
                }
                i += 1;
            }
            "--save-config" => {
                save_config = Some(PathBuf::from(value(i)?));
                i += 1;
            }
            "--family" => {
                let port = std::mem::take(&mut config.port_name);
                config = match value(i)? {
                    "packet" => SessionConfig::packet(port),
                    "framebuffer" => SessionConfig::framebuffer(port),
                    other => bail!("unknown family '{}'", other),
                };
                i += 1;
            }
            "--baud" => {
                let rate: u32 = value(i)?.parse().context("baud rate")?;
                config.target_baud = BaudRate::from_rate(rate)?;
                i += 1;
            }
            "--packet" => {
                let size: u32 = value(i)?.parse().context("packet size")?;
                config.packet_size = PacketSize::from_bytes(size)?;
                i += 1;
            }
            "--timeout" => {
                config.timeout_ms = value(i)?.parse().context("timeout")?;
                i += 1;
            }
            "--retries" => {
                config.upload_retries = value(i)?.parse().context("retries")?;
                i += 1;
            }
            "--abort" => config.failure_policy = PacketFailurePolicy::Abort,
            "--out" => {
                out_dir = PathBuf::from(value(i)?);
                i += 1;
            }
            "--name" => {
                name = Some(value(i)?.to_string());
                i += 1;
            }
            "--demo" => demo = true,
            "--list-ports" => {
                for port in list_ports() {
                    println!("{}\t{}", port.name, port.product.unwrap_or_default());
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => config.port_name = arg.to_string(),
            other => bail!("unknown option: {}", other),
        }
        i += 1;
    }

    if let Some(path) = save_config {
        config.save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Saved settings to {}", path.display());
        return Ok(());
    }

    if !demo && config.port_name.is_empty() {
        bail!("no serial port given (see --list-ports, or use --demo)");
    }

    let extension = match config.family {
        DeviceFamily::Packet => config.capture.format.extension(),
        DeviceFamily::Framebuffer => "jpg",
    };
    let target = name.unwrap_or_else(|| default_image_name(extension));

    let mut session = if demo {
        demo_session(config)?
    } else {
        open_session(config).context("opening camera session")?
    };

    let outcome = session.acquire().context("acquiring image")?;
    session.close();

    if let Some(warning) = &outcome.incomplete {
        eprintln!("warning: {}", warning);
    }

    let path = FileSink::new(out_dir)
        .persist(outcome.buffer, &target)
        .context("saving image")?;
    println!("Saved {}", path.display());
    Ok(())
}

fn print_help() {
    println!("Camera capture tool");
    println!();
    println!("Usage: capture [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --config FILE     Load session settings from a JSON file");
    println!("  --save-config F   Write the effective settings to a JSON file and exit");
    println!("  --family NAME     packet (default) or framebuffer");
    println!("  --baud RATE       Transfer baud rate");
    println!("  --packet SIZE     Upload packet size (256/512/1024/2048)");
    println!("  --timeout MS      Read timeout in ms");
    println!("  --retries N       Re-requests per timed-out packet");
    println!("  --abort           Abort on the first failed packet");
    println!("  --out DIR         Output directory (default: .)");
    println!("  --name FILE       Output file name (default: timestamped)");
    println!("  --demo            Use the simulated camera");
    println!("  --list-ports      List serial ports and exit");
}
