//! Wire format of SIO command frames.
//!
//! A command frame is exactly 5 bytes:
//! ```text
//! ┌───────────┬─────────┬────────┬────────┬──────────┐
//! │ Device ID │ Command │ Aux 1  │ Aux 2  │ Checksum │
//! │ 1 byte    │ 1 byte  │ 1 byte │ 1 byte │ 1 byte   │
//! └───────────┴─────────┴────────┴────────┴──────────┘
//! ```
//!
//! Aux 1 / Aux 2 form a little-endian 16-bit sector number for read and
//! write commands. The checksum covers the first four bytes.

use super::checksum::checksum;
use crate::error::{Result, SioError};

/// Command frame size in bytes (fixed, exactly 5).
pub const FRAME_SIZE: usize = 5;

/// Number of bytes covered by the frame checksum.
pub const FRAME_CHECKSUM_LEN: usize = 4;

/// First disk drive device id (drive 1).
pub const FIRST_DRIVE_ID: u8 = 0x31;

/// Last disk drive device id (drive 8).
pub const LAST_DRIVE_ID: u8 = 0x38;

/// Maximum number of emulated drives.
pub const MAX_DRIVES: usize = 8;

/// Command byte values.
pub mod commands {
    /// Format the disk.
    pub const FORMAT: u8 = 0x21;
    /// Format in medium (enhanced) density. Recognized, never dispatched.
    pub const FORMAT_MD: u8 = 0x22;
    /// Poll. Recognized, never dispatched.
    pub const POLL: u8 = 0x3F;
    /// Write sector.
    pub const WRITE: u8 = 0x50;
    /// Read sector.
    pub const READ: u8 = 0x52;
    /// Get drive status.
    pub const STATUS: u8 = 0x53;
    /// Write sector with verify.
    pub const WRITE_VERIFY: u8 = 0x57;
    /// Idle / reset.
    pub const IDLE: u8 = 0x00;
}

/// Single-byte handshake codes sent by the drive.
pub mod responses {
    /// Acknowledge.
    pub const ACK: u8 = 0x41;
    /// Negative acknowledge.
    pub const NAK: u8 = 0x4E;
    /// Operation complete.
    pub const COMPLETE: u8 = 0x43;
    /// Operation error.
    pub const ERR: u8 = 0x45;
}

/// Decoded command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Idle,
    Format,
    FormatMedium,
    Poll,
    Write,
    Read,
    Status,
    WriteVerify,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        match byte {
            commands::IDLE => Command::Idle,
            commands::FORMAT => Command::Format,
            commands::FORMAT_MD => Command::FormatMedium,
            commands::POLL => Command::Poll,
            commands::WRITE => Command::Write,
            commands::READ => Command::Read,
            commands::STATUS => Command::Status,
            commands::WRITE_VERIFY => Command::WriteVerify,
            other => Command::Unknown(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::Idle => commands::IDLE,
            Command::Format => commands::FORMAT,
            Command::FormatMedium => commands::FORMAT_MD,
            Command::Poll => commands::POLL,
            Command::Write => commands::WRITE,
            Command::Read => commands::READ,
            Command::Status => commands::STATUS,
            Command::WriteVerify => commands::WRITE_VERIFY,
            Command::Unknown(byte) => byte,
        }
    }
}

/// A validated command frame.
///
/// Only produced by [`CommandFrame::decode`] when the checksum matches, or
/// built with a freshly computed checksum by [`CommandFrame::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Raw device id (0x31-0x38 for drives 1-8).
    pub device_id: u8,
    /// Raw command byte.
    pub command: u8,
    pub aux1: u8,
    pub aux2: u8,
    /// Checksum over the first four bytes.
    pub checksum: u8,
}

impl CommandFrame {
    /// Build a frame, computing its checksum.
    ///
    /// # Example
    ///
    /// ```
    /// use sio_drive::protocol::{commands, CommandFrame};
    ///
    /// let frame = CommandFrame::new(0x31, commands::STATUS, 0, 0);
    /// assert_eq!(frame.encode(), [0x31, 0x53, 0x00, 0x00, 0x84]);
    /// ```
    pub fn new(device_id: u8, command: u8, aux1: u8, aux2: u8) -> Self {
        let checksum = checksum(&[device_id, command, aux1, aux2], FRAME_CHECKSUM_LEN);
        Self {
            device_id,
            command,
            aux1,
            aux2,
            checksum,
        }
    }

    /// Build a frame addressing a sector (aux bytes little-endian).
    pub fn with_sector(device_id: u8, command: u8, sector: u16) -> Self {
        let [aux1, aux2] = sector.to_le_bytes();
        Self::new(device_id, command, aux1, aux2)
    }

    /// Decode and validate a 5-byte frame.
    ///
    /// Fails with `FrameOverrun` if `buf` is not exactly [`FRAME_SIZE`] bytes
    /// and with `ChecksumMismatch` if the checksum does not match.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != FRAME_SIZE {
            return Err(SioError::FrameOverrun(buf.len()));
        }

        let expected = checksum(buf, FRAME_CHECKSUM_LEN);
        if expected != buf[4] {
            return Err(SioError::ChecksumMismatch {
                expected,
                found: buf[4],
            });
        }

        Ok(Self {
            device_id: buf[0],
            command: buf[1],
            aux1: buf[2],
            aux2: buf[3],
            checksum: buf[4],
        })
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        [
            self.device_id,
            self.command,
            self.aux1,
            self.aux2,
            self.checksum,
        ]
    }

    /// Decoded command.
    #[inline]
    pub fn command(&self) -> Command {
        Command::from(self.command)
    }

    /// Low nibble of the device id (1-based drive number for drives).
    #[inline]
    pub fn drive_number(&self) -> u8 {
        self.device_id & 0x0F
    }

    /// 0-based drive index, or `None` if the device id is not a disk drive.
    #[inline]
    pub fn drive_index(&self) -> Option<usize> {
        if (FIRST_DRIVE_ID..=LAST_DRIVE_ID).contains(&self.device_id) {
            Some(self.drive_number() as usize - 1)
        } else {
            None
        }
    }

    /// Sector number carried in aux1 (low) and aux2 (high).
    #[inline]
    pub fn sector_number(&self) -> u16 {
        u16::from_le_bytes([self.aux1, self.aux2])
    }
}
