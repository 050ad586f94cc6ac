//! Protocol module - wire format, framing, and response segments.
//!
//! This module implements the drive side of the SIO bus:
//! - 5-byte command frame encoding/decoding and the additive checksum
//! - Frame decoder for accumulating command bytes with resync on idle gaps
//! - Sector receiver for write payloads
//! - Timed response segments

mod checksum;
mod frame_buffer;
mod response;
mod sector_buffer;
mod wire_format;

pub use checksum::{block_checksum, checksum};
pub use frame_buffer::FrameDecoder;
pub use response::{ResponseBuilder, ResponseSegment, ResponseSequence};
pub use sector_buffer::{PendingWrite, SectorWriteReceiver};
pub use wire_format::{
    commands, responses, Command, CommandFrame, FIRST_DRIVE_ID, FRAME_CHECKSUM_LEN, FRAME_SIZE,
    LAST_DRIVE_ID, MAX_DRIVES,
};
