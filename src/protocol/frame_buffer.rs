//! Frame decoder for accumulating command frame bytes.
//!
//! Uses `bytes::BytesMut` as the accumulation buffer. Bytes arrive in
//! arbitrarily small chunks (usually one byte per read) and each chunk is
//! stamped with its arrival time:
//! - a gap longer than the maximum inter-byte delay drops whatever was
//!   buffered and starts a new frame with the incoming bytes
//! - at exactly 5 bytes the frame is validated and the buffer cleared
//! - more than 5 bytes means we lost sync; the buffer is dropped
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sio_drive::protocol::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new(Duration::from_millis(10));
//! let now = Duration::ZERO;
//!
//! assert!(decoder.push(&[0x31, 0x53], now).unwrap().is_none());
//! let frame = decoder.push(&[0x00, 0x00, 0x84], now).unwrap().unwrap();
//! assert_eq!(frame.drive_index(), Some(0));
//! ```

use std::time::Duration;

use bytes::BytesMut;

use super::wire_format::{CommandFrame, FRAME_SIZE};
use crate::error::{Result, SioError};

/// Accumulates bytes into command frames.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Bytes of the frame being assembled.
    buffer: BytesMut,
    /// Arrival time of the previous chunk.
    last_arrival: Option<Duration>,
    /// Maximum allowed gap between chunks of one frame.
    max_gap: Duration,
}

impl FrameDecoder {
    /// Create a decoder with the given maximum inter-byte gap.
    pub fn new(max_gap: Duration) -> Self {
        Self {
            buffer: BytesMut::with_capacity(FRAME_SIZE * 2),
            last_arrival: None,
            max_gap,
        }
    }

    /// Push a chunk that arrived at `now`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(frame))` when the chunk completes a valid frame
    /// - `Ok(None)` when more bytes are needed
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` for a complete frame with a bad checksum and
    /// `FrameOverrun` when the buffer grows past 5 bytes. The buffer is
    /// cleared in both cases.
    pub fn push(&mut self, data: &[u8], now: Duration) -> Result<Option<CommandFrame>> {
        let stale = match self.last_arrival {
            Some(prev) => now.saturating_sub(prev) > self.max_gap,
            None => true,
        };
        self.last_arrival = Some(now);

        if stale && !self.buffer.is_empty() {
            tracing::debug!(
                "Discarding {} stale command bytes after idle gap",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        self.buffer.extend_from_slice(data);

        match self.buffer.len() {
            n if n < FRAME_SIZE => Ok(None),
            FRAME_SIZE => {
                let result = CommandFrame::decode(&self.buffer);
                self.buffer.clear();
                result.map(Some)
            }
            n => {
                self.buffer.clear();
                Err(SioError::FrameOverrun(n))
            }
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
