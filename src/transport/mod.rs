//! Transport module - the byte channel to the host.
//!
//! Provides:
//! - [`SerialLink`] - the outbound side the writer task drives
//! - [`StreamLink`] - a `SerialLink` over any tokio `AsyncWrite`
//! - [`CaptureLink`] - an in-memory `SerialLink` that records its traffic
//! - [`open_device`] - open a serial device node as a reader/link pair

mod capture;
mod serial;

pub use capture::{CaptureLink, LinkEvent};
pub use serial::{
    open_device, BoxFuture, DeviceLink, DeviceReader, SerialLink, StreamLink, DEFAULT_BAUD_RATE,
};
