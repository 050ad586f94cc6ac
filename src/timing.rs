//! Timing gate and clocks.
//!
//! Host software times the drive's responses, so every outbound segment is
//! held back until a minimum delay has elapsed since the last timing
//! reference. Waiting is an active spin on a monotonic clock: yielding to the
//! scheduler adds jitter well above the sub-millisecond delays involved.
//!
//! The clock sits behind the [`Clock`] trait so tests can use a
//! [`ManualClock`] whose waits complete instantly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default delay before the ACK byte (microseconds).
pub const DEFAULT_ACK_DELAY_MICROS: u64 = 1000;

/// Default delay before the COMPLETE byte (microseconds).
pub const DEFAULT_COMPLETE_DELAY_MICROS: u64 = 200;

/// Default delay before a data block (microseconds).
pub const DEFAULT_DATA_DELAY_MICROS: u64 = 400;

/// Default delay before the data checksum byte (microseconds).
pub const DEFAULT_CHECKSUM_DELAY_MICROS: u64 = 400;

/// Maximum gap between bytes of one command frame (nanoseconds).
pub const DEFAULT_FRAME_GAP_NANOS: u64 = 10_000_000;

/// Gap after which a partial sector payload is abandoned (nanoseconds).
pub const DEFAULT_ABORT_NANOS: u64 = 1_000_000_000;

/// Source of monotonic time, measured from an arbitrary origin.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Block until `now() >= deadline`.
    fn wait_until(&self, deadline: Duration);
}

/// Real monotonic clock with a spinning wait.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wait_until(&self, deadline: Duration) {
        while self.now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Virtual clock for tests.
///
/// Time only moves through [`ManualClock::advance`] or a wait, which jumps
/// straight to its deadline. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }

    fn wait_until(&self, deadline: Duration) {
        self.nanos
            .fetch_max(deadline.as_nanos() as u64, Ordering::AcqRel);
    }
}

/// Deadline-wait primitive guaranteeing a minimum elapsed time.
#[derive(Clone)]
pub struct TimingGate {
    clock: Arc<dyn Clock>,
}

impl TimingGate {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Current time on the gate's clock.
    #[inline]
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Wait until at least `micros` have elapsed since `reference`.
    ///
    /// Returns the time at which the wait ended, which becomes the next
    /// reference point. A zero delay returns immediately.
    pub fn wait_since(&self, reference: Duration, micros: u64) -> Duration {
        if micros > 0 {
            self.clock
                .wait_until(reference + Duration::from_micros(micros));
        }
        self.clock.now()
    }
}

impl std::fmt::Debug for TimingGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingGate")
            .field("now", &self.clock.now())
            .finish()
    }
}

/// Response latencies and receive timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay before ACK (microseconds).
    pub ack_delay_micros: u64,
    /// Delay before COMPLETE (microseconds).
    pub complete_delay_micros: u64,
    /// Delay before a data block (microseconds).
    pub data_delay_micros: u64,
    /// Delay before the data checksum (microseconds).
    pub checksum_delay_micros: u64,
    /// A command frame restarts if bytes are further apart (nanoseconds).
    pub frame_gap_nanos: u64,
    /// A sector payload is abandoned if bytes are further apart (nanoseconds).
    pub abort_nanos: u64,
}

impl TimingConfig {
    #[inline]
    pub fn frame_gap(&self) -> Duration {
        Duration::from_nanos(self.frame_gap_nanos)
    }

    #[inline]
    pub fn abort_after(&self) -> Duration {
        Duration::from_nanos(self.abort_nanos)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ack_delay_micros: DEFAULT_ACK_DELAY_MICROS,
            complete_delay_micros: DEFAULT_COMPLETE_DELAY_MICROS,
            data_delay_micros: DEFAULT_DATA_DELAY_MICROS,
            checksum_delay_micros: DEFAULT_CHECKSUM_DELAY_MICROS,
            frame_gap_nanos: DEFAULT_FRAME_GAP_NANOS,
            abort_nanos: DEFAULT_ABORT_NANOS,
        }
    }
}
