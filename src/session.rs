//! Session builder and protocol state machine.
//!
//! The [`SessionBuilder`] configures timing, response policy and the drive
//! slots. The [`DriveSession`] then owns the whole protocol state:
//! 1. Read bytes from the host, one small chunk at a time
//! 2. Assemble and validate command frames
//! 3. Dispatch to the addressed drive
//! 4. Hand timed responses to the writer task
//! 5. Collect sector payloads for write commands
//!
//! Bytes are processed strictly in arrival order and one command runs to
//! completion before the next byte is looked at.
//!
//! # Example
//!
//! ```ignore
//! use sio_drive::drive::MemoryImage;
//! use sio_drive::transport::open_device;
//! use sio_drive::DriveSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (reader, link) = open_device("/dev/ttyUSB0").await?;
//!     let mut session = DriveSession::builder()
//!         .drive(0, Box::new(MemoryImage::open("dos.atr.raw")?))?
//!         .build(link)?;
//!
//!     session.run(reader).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::drive::{DiskImage, DriveRegistry};
use crate::error::{Result, SioError};
use crate::protocol::{
    Command, CommandFrame, FrameDecoder, PendingWrite, ResponseBuilder, SectorWriteReceiver,
};
use crate::timing::{Clock, MonotonicClock, TimingConfig};
use crate::transport::SerialLink;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// Default number of bytes requested per read.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1;

/// Where the session is in the command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Assembling a command frame.
    AwaitingCommand,
    /// Running a decoded command.
    ProcessingCommand,
    /// Collecting the payload of an acknowledged write.
    AwaitingSectorData,
    /// Persisting a received payload.
    ProcessingData,
}

/// Choices where drive behavior is not fully pinned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsePolicy {
    /// Drain the link after READ's ACK before continuing.
    pub read_ack_drains: bool,
    /// Answer NAK to unsupported commands and unreadable sectors on bound
    /// drives instead of staying silent.
    pub nak_on_error: bool,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self {
            read_ack_drains: true,
            nak_on_error: false,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timing: TimingConfig,
    pub policy: ResponsePolicy,
    /// Bytes requested per read; 1 keeps per-byte arrival times.
    pub read_chunk_size: usize,
    /// Writer channel capacity.
    pub channel_capacity: usize,
}

impl SessionConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            policy: ResponsePolicy::default(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Builder for configuring and creating a drive session.
pub struct SessionBuilder {
    config: SessionConfig,
    registry: DriveRegistry,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionBuilder {
    /// Create a new session builder.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            registry: DriveRegistry::new(),
            clock: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    pub fn policy(mut self, policy: ResponsePolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Set the number of bytes requested per read.
    ///
    /// Default: 1
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 4
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Use a specific clock (default: [`MonotonicClock`]).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a prepared registry.
    pub fn registry(mut self, registry: DriveRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Bind an image to drive slot `index` (0-7).
    pub fn drive(mut self, index: usize, image: Box<dyn DiskImage>) -> Result<Self> {
        self.registry.bind(index, image)?;
        Ok(self)
    }

    /// Build the session, spawning its writer task on `link`.
    ///
    /// Fails with `NoRuntime` outside a tokio runtime.
    pub fn build<L: SerialLink>(self, link: L) -> Result<DriveSession> {
        tokio::runtime::Handle::try_current()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        let writer_config = WriterConfig {
            channel_capacity: self.config.channel_capacity,
        };
        let (writer, writer_task) = spawn_writer_task(link, clock.clone(), writer_config);

        Ok(DriveSession {
            state: ProtocolState::AwaitingCommand,
            decoder: FrameDecoder::new(self.config.timing.frame_gap()),
            receiver: SectorWriteReceiver::new(self.config.timing.abort_after()),
            registry: self.registry,
            writer,
            clock,
            config: self.config,
            _writer_task: writer_task,
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running drive emulation session.
///
/// Owns the protocol state, the drive registry and the writer handle.
/// Sessions share nothing, so several can run side by side.
pub struct DriveSession {
    state: ProtocolState,
    decoder: FrameDecoder,
    receiver: SectorWriteReceiver,
    registry: DriveRegistry,
    writer: WriterHandle,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    _writer_task: JoinHandle<()>,
}

impl DriveSession {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    #[inline]
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &DriveRegistry {
        &self.registry
    }

    /// Mutable access for management operations between commands.
    pub fn registry_mut(&mut self) -> &mut DriveRegistry {
        &mut self.registry
    }

    /// Handle to the writer task (shares the single-writer flag).
    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    /// Write command currently waiting for its payload.
    pub fn pending_write(&self) -> Option<&PendingWrite> {
        self.receiver.pending()
    }

    /// Process a chunk of bytes that just arrived from the host.
    ///
    /// Framing errors, unknown drives and unsupported commands are logged
    /// and swallowed. Link failures are returned after the session has been
    /// reset to `AwaitingCommand`.
    pub async fn handle_input(&mut self, data: &[u8]) -> Result<()> {
        let now = self.clock.now();

        match self.state {
            ProtocolState::AwaitingCommand => self.feed_command(data, now).await,
            ProtocolState::AwaitingSectorData => self.feed_sector_data(data, now).await,
            ProtocolState::ProcessingCommand | ProtocolState::ProcessingData => {
                tracing::warn!("Unexpected data while {:?}: {}", self.state, hex(data));
                Ok(())
            }
        }
    }

    /// How much longer the host may stay silent before the pending sector
    /// payload is dropped, on the session clock. `None` outside a write.
    pub fn sector_wait(&self) -> Option<Duration> {
        if self.state != ProtocolState::AwaitingSectorData {
            return None;
        }
        self.receiver.time_remaining(self.clock.now())
    }

    /// Abandon a sector payload whose abort threshold has passed.
    ///
    /// Returns true if a pending write was dropped.
    pub fn check_timeout(&mut self) -> bool {
        let now = self.clock.now();
        if self.state != ProtocolState::AwaitingSectorData || !self.receiver.is_expired(now) {
            return false;
        }

        let received = self.receiver.received();
        if let Some(pending) = self.receiver.abort() {
            tracing::warn!(
                "Write to drive {} sector {} timed out after {} of {} bytes",
                pending.drive + 1,
                pending.sector,
                received,
                pending.length
            );
        }
        self.reset();
        true
    }

    /// Read from the host until the input closes.
    ///
    /// While a sector payload is outstanding, silence longer than the abort
    /// threshold drops it. The silence is measured on the session clock and
    /// waited out with a tokio timer, so a `ManualClock` that is never
    /// advanced keeps the payload pending for as long as the input stays
    /// quiet. Link errors during a response abandon that command only; a
    /// stopped writer task ends the loop.
    pub async fn run<R>(&mut self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];
        tracing::info!("Drive session started");

        loop {
            let read = match self.sector_wait() {
                Some(wait) => match tokio::time::timeout(wait, reader.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        self.check_timeout();
                        continue;
                    }
                },
                None => reader.read(&mut buf).await,
            };

            let n = match read {
                Ok(0) => {
                    tracing::info!("Serial input closed");
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("Serial read failed: {}", e);
                    return Err(SioError::Io(e));
                }
            };

            match self.handle_input(&buf[..n]).await {
                Ok(()) => {}
                Err(SioError::ConnectionClosed) => return Err(SioError::ConnectionClosed),
                Err(e) => tracing::error!("Command abandoned: {}", e),
            }
        }
    }

    async fn feed_command(&mut self, data: &[u8], now: Duration) -> Result<()> {
        match self.decoder.push(data, now) {
            Ok(Some(frame)) => self.dispatch(frame).await,
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!("Command frame rejected: {}", e);
                self.reset();
                Ok(())
            }
        }
    }

    async fn feed_sector_data(&mut self, data: &[u8], now: Duration) -> Result<()> {
        match self.receiver.push(data, now) {
            Ok(Some((pending, payload))) => self.complete_write(pending, payload).await,
            Ok(None) => Ok(()),
            Err(SioError::Timeout) => {
                tracing::warn!("Sector payload timed out, treating new bytes as a command");
                self.reset();
                self.feed_command(data, now).await
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Run one validated command frame.
    async fn dispatch(&mut self, frame: CommandFrame) -> Result<()> {
        self.state = ProtocolState::ProcessingCommand;

        let command = frame.command();
        let result = match command {
            Command::Idle => Ok(()),
            Command::Status => match self.addressed(&frame) {
                Some(index) => self.status_command(index).await,
                None => Ok(()),
            },
            Command::Read => match self.addressed(&frame) {
                Some(index) => self.read_command(index, frame.sector_number()).await,
                None => Ok(()),
            },
            Command::Write | Command::WriteVerify => match self.addressed(&frame) {
                Some(index) => self.write_command(index, frame.sector_number()).await,
                None => Ok(()),
            },
            Command::Format => match self.addressed(&frame) {
                Some(index) => self.format_command(index).await,
                None => Ok(()),
            },
            Command::FormatMedium | Command::Poll | Command::Unknown(_) => {
                self.unsupported_command(&frame).await
            }
        };

        match recover(result) {
            Ok(()) => {
                if self.state == ProtocolState::ProcessingCommand {
                    self.reset();
                }
                Ok(())
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    /// Drive index for a frame, or `None` if it addresses another device.
    fn addressed(&self, frame: &CommandFrame) -> Option<usize> {
        let index = frame.drive_index();
        if index.is_none() {
            tracing::debug!(
                "Ignoring {:?}: {}",
                frame.command(),
                SioError::UnknownDrive(frame.device_id)
            );
        }
        index
    }

    async fn status_command(&mut self, index: usize) -> Result<()> {
        let status = self.registry.status(index)?;

        let sequence = ResponseBuilder::new(&self.config.timing)
            .ack()
            .complete()
            .data_block(Bytes::copy_from_slice(&status))
            .drain_last()
            .build();
        self.writer.transmit(sequence).await
    }

    async fn read_command(&mut self, index: usize, sector: u16) -> Result<()> {
        let data = match self.registry.read_sector(index, sector) {
            Ok(data) => data,
            Err(SioError::Image(msg)) => {
                tracing::warn!("Drive {} cannot read sector {}: {}", index + 1, sector, msg);
                return self.nak_if_enabled().await;
            }
            Err(e) => return Err(e),
        };

        let sequence = ResponseBuilder::new(&self.config.timing)
            .ack()
            .drain_last_if(self.config.policy.read_ack_drains)
            .complete()
            .data_block(data)
            .build();
        self.writer.transmit(sequence).await
    }

    async fn write_command(&mut self, index: usize, sector: u16) -> Result<()> {
        let length = self.registry.sector_size(index, Some(sector))?;

        let sequence = ResponseBuilder::new(&self.config.timing).ack().build();
        self.writer.transmit(sequence).await?;

        let pending = PendingWrite {
            drive: index,
            sector,
            length,
        };
        self.receiver.arm(pending, self.clock.now());
        self.state = ProtocolState::AwaitingSectorData;
        Ok(())
    }

    async fn format_command(&mut self, index: usize) -> Result<()> {
        let builder = ResponseBuilder::new(&self.config.timing).ack();

        let sequence = match self.registry.format(index) {
            Ok(block) => builder.complete().data_block(block).drain_last().build(),
            Err(SioError::Image(msg)) => {
                tracing::warn!("Drive {} format failed: {}", index + 1, msg);
                builder.error().drain_last().build()
            }
            Err(e) => return Err(e),
        };
        self.writer.transmit(sequence).await
    }

    async fn unsupported_command(&mut self, frame: &CommandFrame) -> Result<()> {
        tracing::warn!(
            "Dropping command for device {:#04x}: {}",
            frame.device_id,
            SioError::UnsupportedCommand(frame.command)
        );

        match frame.drive_index() {
            Some(index) if self.registry.is_bound(index) => self.nak_if_enabled().await,
            _ => Ok(()),
        }
    }

    async fn nak_if_enabled(&mut self) -> Result<()> {
        if !self.config.policy.nak_on_error {
            return Ok(());
        }
        let sequence = ResponseBuilder::new(&self.config.timing).nak().build();
        self.writer.transmit(sequence).await
    }

    /// Persist a completed payload and answer the host.
    async fn complete_write(&mut self, pending: PendingWrite, payload: Bytes) -> Result<()> {
        self.state = ProtocolState::ProcessingData;

        let builder = ResponseBuilder::new(&self.config.timing).ack();
        let sequence = match self
            .registry
            .write_sector(pending.drive, pending.sector, &payload)
        {
            Ok(()) => builder.complete().build(),
            Err(e) => {
                tracing::warn!(
                    "Write to drive {} sector {} failed: {}",
                    pending.drive + 1,
                    pending.sector,
                    e
                );
                builder.error().build()
            }
        };

        let result = self.writer.transmit(sequence).await;
        self.reset();
        result
    }

    /// Back to `AwaitingCommand` with no partial state.
    fn reset(&mut self) {
        self.state = ProtocolState::AwaitingCommand;
        self.decoder.clear();
        self.receiver.abort();
    }
}

/// Swallow the errors a drive answers by staying silent.
fn recover(result: Result<()>) -> Result<()> {
    match result {
        Err(SioError::NoDriveImage(index)) => {
            tracing::debug!("No image in drive {}, ignoring command", index + 1);
            Ok(())
        }
        Err(SioError::Image(msg)) => {
            tracing::warn!("Disk image error, ignoring command: {}", msg);
            Ok(())
        }
        other => other,
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}
