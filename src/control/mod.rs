//! Management output - drive status as JSON lines on stdout.
//!
//! The emulator reports its drive table on stdout, one JSON document per
//! line, so a front end can follow along without parsing log output.
//! Logs go through `tracing` and never to stdout.
//!
//! # Example
//!
//! ```ignore
//! use sio_drive::control::write_status_report;
//!
//! write_status_report(&session.registry().status_report())?;
//! ```

mod stdio;

pub use stdio::{write_status_report, write_stdout_json, write_stdout_line};
