//! Sector payload receiver for write commands.
//!
//! Armed with a [`PendingWrite`] once a write command has been acknowledged,
//! then accumulates exactly `length` payload bytes across any number of
//! chunks. A gap longer than the abort threshold abandons the payload.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{Result, SioError};

/// Write command waiting for its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    /// Target drive index (0-7).
    pub drive: usize,
    /// Target sector number.
    pub sector: u16,
    /// Expected payload length (the sector's size).
    pub length: usize,
}

/// Accumulates a sector payload.
#[derive(Debug)]
pub struct SectorWriteReceiver {
    buffer: BytesMut,
    pending: Option<PendingWrite>,
    /// Arrival of the last byte, or the arming time.
    last_arrival: Duration,
    abort_after: Duration,
}

impl SectorWriteReceiver {
    pub fn new(abort_after: Duration) -> Self {
        Self {
            buffer: BytesMut::new(),
            pending: None,
            last_arrival: Duration::ZERO,
            abort_after,
        }
    }

    /// Start waiting for the payload of `pending`.
    pub fn arm(&mut self, pending: PendingWrite, now: Duration) {
        self.buffer.clear();
        self.buffer.reserve(pending.length);
        self.pending = Some(pending);
        self.last_arrival = now;
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingWrite> {
        self.pending.as_ref()
    }

    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Push a chunk that arrived at `now`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some((pending, payload)))` once `length` bytes are in; the
    ///   receiver is disarmed and bytes past `length` are dropped
    /// - `Ok(None)` while more bytes are needed, or if not armed
    ///
    /// # Errors
    ///
    /// `Timeout` if the gap since the previous byte exceeded the abort
    /// threshold. The partial payload is discarded and the receiver disarmed.
    pub fn push(&mut self, data: &[u8], now: Duration) -> Result<Option<(PendingWrite, Bytes)>> {
        let length = match &self.pending {
            Some(pending) => pending.length,
            None => return Ok(None),
        };

        if self.is_expired(now) {
            self.abort();
            return Err(SioError::Timeout);
        }

        self.last_arrival = now;
        self.buffer.extend_from_slice(data);

        if self.buffer.len() < length {
            return Ok(None);
        }

        let payload = self.buffer.split_to(length).freeze();
        if !self.buffer.is_empty() {
            tracing::debug!(
                "Dropping {} bytes past end of sector payload",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        Ok(self.pending.take().map(|pending| (pending, payload)))
    }

    /// True if armed and the abort threshold has passed since the last byte.
    pub fn is_expired(&self, now: Duration) -> bool {
        self.pending.is_some() && now.saturating_sub(self.last_arrival) > self.abort_after
    }

    /// Time left at `now` until [`is_expired`](Self::is_expired) turns true,
    /// or `None` if not armed. Zero once expired.
    pub fn time_remaining(&self, now: Duration) -> Option<Duration> {
        self.pending.as_ref()?;
        let expires_at = self.last_arrival + self.abort_after + Duration::from_nanos(1);
        Some(expires_at.saturating_sub(now))
    }

    /// Abandon the payload, returning what was pending.
    pub fn abort(&mut self) -> Option<PendingWrite> {
        self.buffer.clear();
        self.pending.take()
    }
}
