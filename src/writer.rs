//! Dedicated writer task for timed response transmission.
//!
//! The session never writes to the link itself. Each response is handed to
//! the writer task as a [`ResponseSequence`] through an mpsc channel, and the
//! task plays the segments back in order, honoring each segment's delay and
//! drain flag.
//!
//! # Architecture
//!
//! ```text
//! Session ─► WriterHandle::start ─► mpsc ─► Writer Task ─► TimingGate ─► SerialLink
//!                  │                            │
//!                  └──── Transmission ◄─ oneshot┘
//! ```
//!
//! Only one sequence may be on the wire at a time. `start` claims a busy
//! flag that the task releases after the last segment (and its drain); a
//! second `start` while the flag is held fails with
//! `ConcurrentWriteViolation` and nothing from it is sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, SioError};
use crate::protocol::ResponseSequence;
use crate::timing::{Clock, TimingGate};
use crate::transport::SerialLink;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for queued sequences.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A sequence queued for the writer task.
struct OutboundSequence {
    sequence: ResponseSequence,
    /// Timing reference for the first segment's delay.
    started_at: Duration,
    done: oneshot::Sender<Result<()>>,
}

/// Completion of a started transmission.
#[must_use = "a transmission should be awaited to observe link errors"]
pub struct Transmission {
    rx: oneshot::Receiver<Result<()>>,
}

impl Transmission {
    /// Wait until the last segment has been written (and drained if flagged).
    pub async fn finished(self) -> Result<()> {
        self.rx.await.map_err(|_| SioError::ConnectionClosed)?
    }
}

/// Handle for submitting responses to the writer task.
///
/// Cheaply cloneable; every clone shares the single-writer flag.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundSequence>,
    busy: Arc<AtomicBool>,
    gate: TimingGate,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundSequence>, busy: Arc<AtomicBool>, gate: TimingGate) -> Self {
        Self { tx, busy, gate }
    }

    /// Start transmitting a sequence without waiting for it.
    ///
    /// Fails immediately with `ConcurrentWriteViolation` if another sequence
    /// is still in flight, or `ConnectionClosed` if the task has stopped.
    pub fn start(&self, sequence: ResponseSequence) -> Result<Transmission> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Rejecting response: another transmission is in progress");
            return Err(SioError::ConcurrentWriteViolation);
        }

        let (done, rx) = oneshot::channel();
        let outbound = OutboundSequence {
            sequence,
            started_at: self.gate.now(),
            done,
        };

        self.tx.try_send(outbound).map_err(|e| {
            self.busy.store(false, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => SioError::ConcurrentWriteViolation,
                mpsc::error::TrySendError::Closed(_) => SioError::ConnectionClosed,
            }
        })?;

        Ok(Transmission { rx })
    }

    /// Transmit a sequence and wait for it to finish.
    pub async fn transmit(&self, sequence: ResponseSequence) -> Result<()> {
        self.start(sequence)?.finished().await
    }

    /// Check if a sequence is currently in flight.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for submitting responses.
///
/// # Arguments
///
/// * `link` - Outbound side of the serial channel
/// * `clock` - Clock used for segment delays
/// * `config` - Writer configuration
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)`. The task ends once every handle
/// has been dropped.
pub fn spawn_writer_task<L>(
    link: L,
    clock: Arc<dyn Clock>,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<()>)
where
    L: SerialLink,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let busy = Arc::new(AtomicBool::new(false));
    let gate = TimingGate::new(clock);

    let handle = WriterHandle::new(tx, busy.clone(), gate.clone());
    let task = tokio::spawn(writer_loop(rx, link, gate, busy));

    (handle, task)
}

/// Main writer loop - plays queued sequences one at a time.
async fn writer_loop<L>(
    mut rx: mpsc::Receiver<OutboundSequence>,
    mut link: L,
    gate: TimingGate,
    busy: Arc<AtomicBool>,
) where
    L: SerialLink,
{
    while let Some(outbound) = rx.recv().await {
        let result = play_sequence(&mut link, &gate, outbound.sequence, outbound.started_at).await;
        if let Err(e) = &result {
            tracing::error!("Response transmission failed: {}", e);
        }

        // Release before signalling so the caller can start the next one
        busy.store(false, Ordering::Release);
        let _ = outbound.done.send(result);
    }

    tracing::debug!("Writer task stopped");
}

/// Write each segment after its delay, draining where flagged.
async fn play_sequence<L>(
    link: &mut L,
    gate: &TimingGate,
    sequence: ResponseSequence,
    started_at: Duration,
) -> Result<()>
where
    L: SerialLink,
{
    let mut reference = started_at;

    for segment in sequence.into_segments() {
        gate.wait_since(reference, segment.delay_micros);
        link.write(&segment.bytes).await?;
        if segment.must_drain {
            link.drain().await?;
        }
        reference = gate.now();
    }

    Ok(())
}
