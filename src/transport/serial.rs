//! Serial link abstraction.
//!
//! The inbound side is any `AsyncRead`; the session reads it in small chunks
//! so each byte surfaces with its own arrival time. The outbound side is a
//! [`SerialLink`], which separates "bytes accepted" (`write`) from "bytes
//! physically gone" (`drain`).
//!
//! [`open_device`] opens a real serial port through `tokio-serial` at
//! 19200 baud, 8N1, raw mode, no flow control. Flushing that port waits in
//! `tcdrain` until the UART has shifted every queued byte out, which is what
//! a drained response segment requires.
//!
//! # Example
//!
//! ```ignore
//! use sio_drive::transport::open_device;
//!
//! let (reader, link) = open_device("/dev/ttyUSB0").await?;
//! ```

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::Result;

/// Bus speed of the emulated drives.
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Inbound half of an opened serial device.
pub type DeviceReader = ReadHalf<SerialStream>;

/// Outbound half of an opened serial device.
pub type DeviceLink = StreamLink<WriteHalf<SerialStream>>;

/// Boxed future for link operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outbound half of the serial channel.
pub trait SerialLink: Send + 'static {
    /// Hand bytes to the link. Resolves once they are queued.
    fn write<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Resolves once every queued byte has been flushed out of the link.
    fn drain(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// [`SerialLink`] over a tokio writer.
///
/// `write` is `write_all`; `drain` is `flush`, so `drain` only means
/// "physically sent" if the writer's flush does (as a serial port's does).
pub struct StreamLink<W> {
    writer: W,
}

impl<W> StreamLink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W> SerialLink for StreamLink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn write<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.writer.write_all(bytes).await?;
            Ok(())
        })
    }

    fn drain(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.writer.flush().await?;
            Ok(())
        })
    }
}

/// Open a serial device at the bus speed with SIO line settings.
///
/// The port is split so a pending read never holds up a response; the
/// link's `drain` blocks in `tcdrain` until the output queue is empty.
pub async fn open_device(path: &str) -> Result<(DeviceReader, DeviceLink)> {
    let port = tokio_serial::new(path, DEFAULT_BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()?;

    tracing::info!("Opened serial device {} at {} baud", path, DEFAULT_BAUD_RATE);

    let (reader, writer) = tokio::io::split(port);
    Ok((reader, StreamLink::new(writer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncReadExt};

    /// Writer that counts flushes.
    struct FlushCounter {
        flushes: Arc<AtomicUsize>,
    }

    impl AsyncWrite for FlushCounter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_stream_link_drain_flushes_writer() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let mut link = StreamLink::new(FlushCounter {
            flushes: flushes.clone(),
        });

        link.write(&[0x41, 0x43]).await.unwrap();
        assert_eq!(flushes.load(Ordering::SeqCst), 0);

        link.drain().await.unwrap();
        assert_eq!(flushes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_link_write_and_drain() {
        let (client, mut server) = duplex(64);
        let mut link = StreamLink::new(client);

        link.write(&[0x41]).await.unwrap();
        link.write(&[0x43, 0x10]).await.unwrap();
        link.drain().await.unwrap();

        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x41, 0x43, 0x10]);
    }

    #[tokio::test]
    async fn test_stream_link_write_fails_when_closed() {
        let (client, server) = duplex(64);
        drop(server);

        let mut link = StreamLink::new(client);
        assert!(link.write(&[0x41]).await.is_err());
    }

    #[tokio::test]
    async fn test_open_device_missing_path() {
        let result = open_device("/nonexistent/sio-drive-test-device").await;
        assert!(matches!(result, Err(crate::error::SioError::Serial(_))));
    }
}
