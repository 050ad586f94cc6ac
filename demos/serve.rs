//! Serve disk images to a host on a serial device.
//!
//! This example demonstrates:
//! - Opening a serial device node as a reader/link pair
//! - Binding raw sector images to drive slots with the session builder
//! - Reporting the drive table as JSON on stdout
//! - Running the session until the device closes
//!
//! # Running
//!
//! ```text
//! cargo run --example serve -- /dev/ttyUSB0 dos.raw games.raw
//! ```
//!
//! Images are bound to D1:, D2:, ... in order (at most eight). Pass
//! `--config` (or set `SIO_DRIVE_CONFIG`) to a JSON file to override timing
//! and response policy, e.g.
//!
//! ```json
//! { "timing": { "ack_delay_micros": 1200 }, "policy": { "nak_on_error": true } }
//! ```
//!
//! The port is opened at 19200 baud, 8N1, raw mode.

use std::path::PathBuf;

use clap::Parser;
use sio_drive::control::write_status_report;
use sio_drive::transport::open_device;
use sio_drive::{DriveSession, MemoryImage, SessionConfig};

/// Serve raw sector images as SIO drives D1: to D8:.
#[derive(Parser, Debug)]
#[command(name = "serve")]
struct Args {
    /// Serial device the host is connected to
    device: String,

    /// Raw sector images, bound to D1:, D2:, ... in order
    #[arg(num_args = 0..=8)]
    images: Vec<PathBuf>,

    /// JSON file with timing and response policy overrides
    #[arg(long, env = "SIO_DRIVE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SessionConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };

    let mut builder = DriveSession::builder().config(config);
    for (index, path) in args.images.iter().enumerate() {
        builder = builder.drive(index, Box::new(MemoryImage::open(path)?))?;
    }

    let (reader, link) = open_device(&args.device).await?;
    let mut session = builder.build(link)?;

    write_status_report(&session.registry().status_report())?;

    session.run(reader).await?;

    Ok(())
}
