//! Line-oriented stdout writer.
//!
//! - **stdout**: JSON documents, one per line
//! - **stderr**: logs (whatever subscriber the binary installs)
//! - **Never use `println!`**: it may add `\r\n` on Windows

use std::io::Write;

use crate::drive::StatusReport;

/// Write a line to stdout.
///
/// Writes the string followed by a single `\n` and flushes.
///
/// # Errors
///
/// Returns IO error if write or flush fails.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_line(&mut handle, line)
}

/// Write a JSON value to stdout as a single line.
pub fn write_stdout_json<T: serde::Serialize>(value: &T) -> crate::error::Result<()> {
    let json = serde_json::to_string(value)?;
    write_stdout_line(&json)?;
    Ok(())
}

/// Report the drive table.
pub fn write_status_report(report: &StatusReport) -> crate::error::Result<()> {
    tracing::debug!("Reporting status for {} bound drives", report.bound());
    write_stdout_json(report)
}

fn write_line<W: Write>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}
