//! Timed response segments.
//!
//! A drive answers a command with a short ordered script: ACK, COMPLETE,
//! a data block and its checksum, each preceded by a fixed delay. The
//! [`ResponseBuilder`] assembles that script from the configured latencies;
//! the writer task plays it back in order.

use bytes::Bytes;

use super::checksum::block_checksum;
use super::wire_format::responses;
use crate::timing::TimingConfig;

/// One timed piece of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSegment {
    /// Bytes to put on the wire.
    pub bytes: Bytes,
    /// Minimum wait before sending, from the last timing reference.
    pub delay_micros: u64,
    /// Wait for the link to fully drain before moving on.
    pub must_drain: bool,
}

impl ResponseSegment {
    pub fn new(bytes: Bytes, delay_micros: u64) -> Self {
        Self {
            bytes,
            delay_micros,
            must_drain: false,
        }
    }

    /// Single-byte segment.
    pub fn byte(byte: u8, delay_micros: u64) -> Self {
        Self::new(Bytes::copy_from_slice(&[byte]), delay_micros)
    }

    /// Mark this segment as draining.
    pub fn drained(mut self) -> Self {
        self.must_drain = true;
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Ordered list of segments sent as one uninterrupted transmission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseSequence {
    segments: Vec<ResponseSegment>,
}

impl ResponseSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: ResponseSegment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[ResponseSegment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<ResponseSegment> {
        self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total bytes across all segments.
    pub fn total_bytes(&self) -> usize {
        self.segments.iter().map(ResponseSegment::len).sum()
    }
}

impl From<Vec<ResponseSegment>> for ResponseSequence {
    fn from(segments: Vec<ResponseSegment>) -> Self {
        Self { segments }
    }
}

/// Builds drive responses using the configured latencies.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use sio_drive::protocol::ResponseBuilder;
/// use sio_drive::timing::TimingConfig;
///
/// let timing = TimingConfig::default();
/// let sequence = ResponseBuilder::new(&timing)
///     .ack()
///     .complete()
///     .data_block(Bytes::from_static(&[0x10, 0xFF, 0xE0, 0x00]))
///     .drain_last()
///     .build();
///
/// assert_eq!(sequence.len(), 4);
/// assert_eq!(sequence.total_bytes(), 7);
/// assert_eq!(&sequence.segments()[3].bytes[..], &[0xF0]);
/// assert!(sequence.segments()[3].must_drain);
/// ```
#[derive(Debug)]
pub struct ResponseBuilder<'a> {
    timing: &'a TimingConfig,
    sequence: ResponseSequence,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(timing: &'a TimingConfig) -> Self {
        Self {
            timing,
            sequence: ResponseSequence::new(),
        }
    }

    /// ACK byte.
    pub fn ack(mut self) -> Self {
        self.sequence
            .push(ResponseSegment::byte(responses::ACK, self.timing.ack_delay_micros));
        self
    }

    /// NAK byte (same latency as ACK).
    pub fn nak(mut self) -> Self {
        self.sequence
            .push(ResponseSegment::byte(responses::NAK, self.timing.ack_delay_micros));
        self
    }

    /// COMPLETE byte.
    pub fn complete(mut self) -> Self {
        self.sequence.push(ResponseSegment::byte(
            responses::COMPLETE,
            self.timing.complete_delay_micros,
        ));
        self
    }

    /// ERR byte (same latency as COMPLETE).
    pub fn error(mut self) -> Self {
        self.sequence.push(ResponseSegment::byte(
            responses::ERR,
            self.timing.complete_delay_micros,
        ));
        self
    }

    /// Data block followed by its checksum byte.
    pub fn data_block(mut self, data: Bytes) -> Self {
        let sum = block_checksum(&data);
        self.sequence
            .push(ResponseSegment::new(data, self.timing.data_delay_micros));
        self.sequence
            .push(ResponseSegment::byte(sum, self.timing.checksum_delay_micros));
        self
    }

    /// Mark the most recently added segment as draining.
    pub fn drain_last(mut self) -> Self {
        if let Some(last) = self.sequence.segments.last_mut() {
            last.must_drain = true;
        }
        self
    }

    /// Mark the most recently added segment as draining if `drain` is set.
    pub fn drain_last_if(self, drain: bool) -> Self {
        if drain {
            self.drain_last()
        } else {
            self
        }
    }

    pub fn build(self) -> ResponseSequence {
        self.sequence
    }
}
