//! In-memory link that records everything written to it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::serial::{BoxFuture, SerialLink};
use crate::error::Result;
use crate::timing::Clock;

/// Something that happened on a [`CaptureLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Bytes written, with the clock time of the write.
    Write { bytes: Vec<u8>, at: Duration },
    /// Drain requested.
    Drain { at: Duration },
}

/// [`SerialLink`] that captures writes and drains.
///
/// Clones share the same log, so a test can keep one clone while the
/// writer task owns another.
#[derive(Clone)]
pub struct CaptureLink {
    events: Arc<Mutex<Vec<LinkEvent>>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CaptureLink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            clock: None,
        }
    }

    /// Stamp events with times from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            clock: Some(clock),
        }
    }

    fn now(&self) -> Duration {
        self.clock.as_ref().map(|c| c.now()).unwrap_or_default()
    }

    fn log(&self) -> MutexGuard<'_, Vec<LinkEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of every event so far.
    pub fn events(&self) -> Vec<LinkEvent> {
        self.log().clone()
    }

    /// All written bytes in order.
    pub fn written(&self) -> Vec<u8> {
        self.log()
            .iter()
            .filter_map(|event| match event {
                LinkEvent::Write { bytes, .. } => Some(bytes.as_slice()),
                LinkEvent::Drain { .. } => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    /// Number of drains requested.
    pub fn drain_count(&self) -> usize {
        self.log()
            .iter()
            .filter(|event| matches!(event, LinkEvent::Drain { .. }))
            .count()
    }

    pub fn clear(&self) {
        self.log().clear();
    }
}

impl Default for CaptureLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLink for CaptureLink {
    fn write<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        let at = self.now();
        self.log().push(LinkEvent::Write {
            bytes: bytes.to_vec(),
            at,
        });
        Box::pin(async { Ok(()) })
    }

    fn drain(&mut self) -> BoxFuture<'_, Result<()>> {
        let at = self.now();
        self.log().push(LinkEvent::Drain { at });
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;

    #[tokio::test]
    async fn test_capture_records_in_order() {
        let clock = ManualClock::new();
        let link = CaptureLink::with_clock(Arc::new(clock.clone()));
        let mut writer = link.clone();

        writer.write(&[1, 2]).await.unwrap();
        clock.advance(Duration::from_micros(5));
        writer.drain().await.unwrap();
        writer.write(&[3]).await.unwrap();

        assert_eq!(link.written(), vec![1, 2, 3]);
        assert_eq!(link.drain_count(), 1);
        assert_eq!(
            link.events()[1],
            LinkEvent::Drain {
                at: Duration::from_micros(5)
            }
        );

        link.clear();
        assert!(link.events().is_empty());
    }
}
