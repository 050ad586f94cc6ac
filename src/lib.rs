//! # sio-drive
//!
//! Peripheral-side emulation of floppy drives on the Atari SIO serial bus.
//!
//! The host computer sends 5-byte command frames over a serial line; this
//! crate plays the part of up to eight drives (device ids `0x31`-`0x38`),
//! answering STATUS, READ, WRITE, WRITE-with-verify and FORMAT with the
//! inter-byte timing a real drive would use.
//!
//! ## Architecture
//!
//! ```text
//! serial in ─► DriveSession ─► FrameDecoder ─► dispatch ─► DriveRegistry
//!                   │                              │
//!                   │            ResponseSequence ◄┘
//!                   ▼
//!              WriterHandle ─► writer task ─► TimingGate ─► SerialLink ─► serial out
//! ```
//!
//! - **protocol**: wire format, checksum, frame and payload assembly
//! - **timing**: clocks and the deadline wait used between response segments
//! - **writer**: the single task allowed to write to the link
//! - **drive**: disk image trait, in-memory images and the slot table
//! - **session**: the protocol state machine and its builder
//!
//! ## Example
//!
//! ```ignore
//! use sio_drive::drive::MemoryImage;
//! use sio_drive::transport::open_device;
//! use sio_drive::DriveSession;
//!
//! #[tokio::main]
//! async fn main() -> sio_drive::Result<()> {
//!     let (reader, link) = open_device("/dev/ttyUSB0").await?;
//!     let mut session = DriveSession::builder()
//!         .drive(0, Box::new(MemoryImage::open("dos.raw")?))?
//!         .build(link)?;
//!
//!     session.run(reader).await
//! }
//! ```

pub mod control;
pub mod drive;
pub mod error;
pub mod protocol;
pub mod session;
pub mod timing;
pub mod transport;
pub mod writer;

pub use drive::{DiskImage, DriveRegistry, MemoryImage};
pub use error::{Result, SioError};
pub use session::{DriveSession, ProtocolState, ResponsePolicy, SessionBuilder, SessionConfig};
pub use timing::{Clock, ManualClock, MonotonicClock, TimingConfig};
pub use transport::{CaptureLink, SerialLink, StreamLink};
