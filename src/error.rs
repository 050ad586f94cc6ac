//! Error types for sio-drive.

use thiserror::Error;

/// Main error type for all drive emulation operations.
#[derive(Debug, Error)]
pub enum SioError {
    /// I/O error on the serial link or an image file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured.
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// JSON serialization/deserialization error (config and status output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Command frame checksum did not match its first four bytes.
    #[error("Command frame checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    ChecksumMismatch { expected: u8, found: u8 },

    /// More bytes arrived than fit in a command frame.
    #[error("Command frame overrun: {0} bytes buffered")]
    FrameOverrun(usize),

    /// Command byte is recognized but not dispatched, or unknown.
    #[error("Unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    /// Device id outside the supported drive range.
    #[error("Unknown drive device id: {0:#04x}")]
    UnknownDrive(u8),

    /// Drive index outside 0..8.
    #[error("Invalid drive number: {0}")]
    InvalidDriveIndex(usize),

    /// No image bound to the drive slot.
    #[error("No drive image in slot {0}")]
    NoDriveImage(usize),

    /// A response sequence was started while another one is still on the wire.
    #[error("Concurrent write violation: a response is already being transmitted")]
    ConcurrentWriteViolation,

    /// Inter-byte gap exceeded the abort threshold.
    #[error("Timed out waiting for data")]
    Timeout,

    /// Failure reported by a disk image (bad sector number, read-only, ...).
    #[error("Disk image error: {0}")]
    Image(String),

    /// A session was built outside a tokio runtime.
    #[error("No tokio runtime: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// Writer task is gone.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using SioError.
pub type Result<T> = std::result::Result<T, SioError>;
