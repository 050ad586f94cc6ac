//! Integration tests for sio-drive.
//!
//! These drive whole sessions through the public API: bytes in through
//! `handle_input` or `run`, bytes out captured by a `CaptureLink`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

use sio_drive::drive::{DiskImage, DriveRegistry, MemoryImage, STATUS_LEN};
use sio_drive::protocol::{
    block_checksum, checksum, commands, responses, CommandFrame, ResponseBuilder,
};
use sio_drive::transport::{BoxFuture, CaptureLink, LinkEvent, SerialLink};
use sio_drive::writer::{spawn_writer_task, WriterConfig};
use sio_drive::{
    Clock, DriveSession, ManualClock, MonotonicClock, ProtocolState, SioError, TimingConfig,
};

fn frame(device: u8, command: u8, sector: u16) -> [u8; 5] {
    CommandFrame::with_sector(device, command, sector).encode()
}

fn manual_session(clock: &ManualClock, drive0: Box<dyn DiskImage>) -> (DriveSession, CaptureLink) {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let link = CaptureLink::with_clock(clock.clone());
    let session = DriveSession::builder()
        .clock(clock)
        .drive(0, drive0)
        .unwrap()
        .build(link.clone())
        .unwrap();
    (session, link)
}

/// Image that records every `put_sector` call.
struct RecordingImage {
    inner: MemoryImage,
    puts: Arc<Mutex<Vec<(u16, Vec<u8>)>>>,
}

impl DiskImage for RecordingImage {
    fn sector_size(&self, sector: Option<u16>) -> usize {
        self.inner.sector_size(sector)
    }

    fn sector_count(&self) -> usize {
        self.inner.sector_count()
    }

    fn sector(&self, sector: u16) -> sio_drive::Result<Bytes> {
        self.inner.sector(sector)
    }

    fn put_sector(&mut self, sector: u16, data: &[u8]) -> sio_drive::Result<()> {
        self.puts.lock().unwrap().push((sector, data.to_vec()));
        self.inner.put_sector(sector, data)
    }

    fn status_bytes(&self) -> [u8; STATUS_LEN] {
        self.inner.status_bytes()
    }

    fn format(&mut self, sector_size: usize, sector_count: usize) -> sio_drive::Result<()> {
        self.inner.format(sector_size, sector_count)
    }

    fn filename(&self) -> Option<String> {
        self.inner.filename()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn export_image(&self) -> sio_drive::Result<Bytes> {
        self.inner.export_image()
    }

    fn import_image(&mut self, data: &[u8], path: Option<&Path>) -> sio_drive::Result<()> {
        self.inner.import_image(data, path)
    }

    fn save_image(&mut self, path: Option<&Path>) -> sio_drive::Result<()> {
        self.inner.save_image(path)
    }

    fn unload_image(&mut self) -> sio_drive::Result<()> {
        self.inner.unload_image()
    }
}

/// Link whose drain only completes once the gate is opened.
#[derive(Clone, Default)]
struct GatedLink {
    written: Arc<Mutex<Vec<u8>>>,
    drain_started: Arc<Notify>,
    gate: Arc<Notify>,
}

impl GatedLink {
    fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

impl SerialLink for GatedLink {
    fn write<'a>(&'a mut self, bytes: &'a [u8]) -> BoxFuture<'a, sio_drive::Result<()>> {
        self.written.lock().unwrap().extend_from_slice(bytes);
        Box::pin(async { Ok(()) })
    }

    fn drain(&mut self) -> BoxFuture<'_, sio_drive::Result<()>> {
        let started = self.drain_started.clone();
        let gate = self.gate.clone();
        Box::pin(async move {
            started.notify_one();
            gate.notified().await;
            Ok(())
        })
    }
}

/// READ's ACK must be on the wire before COMPLETE follows.
#[tokio::test]
async fn test_read_ack_drain_holds_complete() {
    let link = GatedLink::default();
    let mut session = DriveSession::builder()
        .clock(Arc::new(ManualClock::new()))
        .drive(0, Box::new(MemoryImage::default()))
        .unwrap()
        .build(link.clone())
        .unwrap();
    let writer = session.writer().clone();

    let task = tokio::spawn(async move {
        session
            .handle_input(&frame(0x31, commands::READ, 1))
            .await
            .unwrap();
        session
    });

    link.drain_started.notified().await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(link.written(), vec![responses::ACK]);
    assert!(writer.is_busy());

    link.gate.notify_one();
    let session = task.await.unwrap();

    let written = link.written();
    assert_eq!(written.len(), 2 + 128 + 1);
    assert_eq!(written[1], responses::COMPLETE);
    assert!(!writer.is_busy());
    assert_eq!(session.state(), ProtocolState::AwaitingCommand);
}

/// STATUS to a bound drive: ACK, COMPLETE, status block, checksum, drained.
#[tokio::test]
async fn test_status_command_sequence() {
    let clock = ManualClock::new();
    let (mut session, link) = manual_session(&clock, Box::new(MemoryImage::default()));

    session
        .handle_input(&[0x31, 0x53, 0x00, 0x00, 0x84])
        .await
        .unwrap();

    let status = [0x10, 0xFF, 0xE0, 0x00];
    let events = link.events();
    let writes: Vec<Vec<u8>> = events
        .iter()
        .filter_map(|e| match e {
            LinkEvent::Write { bytes, .. } => Some(bytes.clone()),
            LinkEvent::Drain { .. } => None,
        })
        .collect();

    assert_eq!(
        writes,
        vec![
            vec![responses::ACK],
            vec![responses::COMPLETE],
            status.to_vec(),
            vec![block_checksum(&status)],
        ]
    );
    assert!(matches!(events.last(), Some(LinkEvent::Drain { .. })));
    assert_eq!(session.state(), ProtocolState::AwaitingCommand);
}

/// Segment delays are measured from the previous segment.
#[tokio::test]
async fn test_status_segment_timing() {
    let clock = ManualClock::new();
    let (mut session, link) = manual_session(&clock, Box::new(MemoryImage::default()));

    session
        .handle_input(&frame(0x31, commands::STATUS, 0))
        .await
        .unwrap();

    let times: Vec<Duration> = link
        .events()
        .iter()
        .filter_map(|e| match e {
            LinkEvent::Write { at, .. } => Some(*at),
            LinkEvent::Drain { .. } => None,
        })
        .collect();

    assert_eq!(times.len(), 4);
    assert!(times[0] >= Duration::from_micros(1000));
    assert!(times[1] - times[0] >= Duration::from_micros(200));
    assert!(times[2] - times[1] >= Duration::from_micros(400));
    assert!(times[3] - times[2] >= Duration::from_micros(400));
}

/// READ addressed to an empty slot is ignored.
#[tokio::test]
async fn test_read_unbound_drive_is_silent() {
    let clock = ManualClock::new();
    let (mut session, link) = manual_session(&clock, Box::new(MemoryImage::default()));

    session
        .handle_input(&frame(0x33, commands::READ, 1))
        .await
        .unwrap();

    assert!(link.events().is_empty());
    assert_eq!(session.state(), ProtocolState::AwaitingCommand);
}

/// WRITE followed by a full payload persists it and answers ACK, COMPLETE.
#[tokio::test]
async fn test_write_command_persists_payload() {
    let clock = ManualClock::new();
    let puts = Arc::new(Mutex::new(Vec::new()));
    let image = RecordingImage {
        inner: MemoryImage::new(256, 720),
        puts: puts.clone(),
    };
    let (mut session, link) = manual_session(&clock, Box::new(image));

    session
        .handle_input(&frame(0x31, commands::WRITE, 10))
        .await
        .unwrap();
    assert_eq!(link.written(), vec![responses::ACK]);
    link.clear();

    let payload: Vec<u8> = (0..=255u8).collect();
    for byte in &payload {
        clock.advance(Duration::from_micros(520));
        session.handle_input(std::slice::from_ref(byte)).await.unwrap();
    }

    assert_eq!(*puts.lock().unwrap(), vec![(10, payload.clone())]);
    assert_eq!(
        link.written(),
        vec![responses::ACK, responses::COMPLETE]
    );
    assert_eq!(session.state(), ProtocolState::AwaitingCommand);
}

/// WRITE acknowledged, then silence: nothing persisted.
#[tokio::test]
async fn test_write_abandoned_after_silence() {
    let clock = ManualClock::new();
    let puts = Arc::new(Mutex::new(Vec::new()));
    let image = RecordingImage {
        inner: MemoryImage::default(),
        puts: puts.clone(),
    };
    let (mut session, link) = manual_session(&clock, Box::new(image));

    session
        .handle_input(&frame(0x31, commands::WRITE, 10))
        .await
        .unwrap();
    session.handle_input(&[0x99; 64]).await.unwrap();

    clock.advance(Duration::from_millis(1001));
    assert!(session.check_timeout());

    assert!(puts.lock().unwrap().is_empty());
    assert_eq!(link.written(), vec![responses::ACK]);
    assert_eq!(session.state(), ProtocolState::AwaitingCommand);
    assert!(session.pending_write().is_none());
}

/// Frame bytes spread over more than the frame gap are dropped.
#[tokio::test]
async fn test_split_frame_across_gap_is_discarded() {
    let clock = ManualClock::new();
    let (mut session, link) = manual_session(&clock, Box::new(MemoryImage::default()));
    let bytes = frame(0x31, commands::STATUS, 0);

    session.handle_input(&bytes[..3]).await.unwrap();
    clock.advance(Duration::from_millis(20));
    session.handle_input(&bytes[3..]).await.unwrap();
    assert!(link.events().is_empty());

    // A byte at a time within the gap is fine
    for byte in &bytes {
        clock.advance(Duration::from_micros(500));
        session.handle_input(std::slice::from_ref(byte)).await.unwrap();
    }
    assert_eq!(link.written()[0], responses::ACK);
}

#[test]
fn test_frame_decode_matches_checksum() {
    for device in [0x00u8, 0x31, 0x38, 0xFF] {
        for command in [0x00u8, 0x21, 0x50, 0x52, 0x53, 0x57, 0xFF] {
            for aux in [0x00u8, 0x01, 0x80, 0xFF] {
                let head = [device, command, aux, aux.wrapping_mul(3)];
                let sum = checksum(&head, 4);

                let good = [head[0], head[1], head[2], head[3], sum];
                let decoded = CommandFrame::decode(&good).unwrap();
                assert_eq!(decoded.device_id, device);
                assert_eq!(decoded.command, command);
                assert_eq!(decoded.aux1, aux);
                assert_eq!(decoded.aux2, aux.wrapping_mul(3));

                let bad = [head[0], head[1], head[2], head[3], sum.wrapping_add(1)];
                assert!(matches!(
                    CommandFrame::decode(&bad),
                    Err(SioError::ChecksumMismatch { .. })
                ));
            }
        }
    }
}

#[test]
fn test_format_then_read_is_all_ff() {
    for (size, count) in [(128, 720), (128, 1040), (256, 720)] {
        let mut registry = DriveRegistry::new();
        registry
            .bind(1, Box::new(MemoryImage::new(size, count)))
            .unwrap();

        let block = registry.format(1).unwrap();
        assert_eq!(block.len(), size);

        for sector in [1u16, 3, 4, 360, count as u16] {
            let data = registry.read_sector(1, sector).unwrap();
            assert_eq!(data.len(), registry.sector_size(1, Some(sector)).unwrap());
            assert!(data.iter().all(|&b| b == 0xFF));
        }
    }
}

#[test]
fn test_write_then_read_is_clipped_to_sector_size() {
    let mut registry = DriveRegistry::new();
    registry
        .bind(0, Box::new(MemoryImage::new(256, 720)))
        .unwrap();
    let data: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();

    // Boot sectors are 128 bytes even on a 256-byte image
    registry.write_sector(0, 2, &data).unwrap();
    assert_eq!(registry.read_sector(0, 2).unwrap().as_ref(), &data[..128]);

    registry.write_sector(0, 100, &data).unwrap();
    assert_eq!(registry.read_sector(0, 100).unwrap().as_ref(), &data[..256]);
}

#[tokio::test]
async fn test_second_sequence_rejected_while_busy() {
    let clock = ManualClock::new();
    let link = CaptureLink::with_clock(Arc::new(clock.clone()));
    let (writer, _task) =
        spawn_writer_task(link.clone(), Arc::new(clock.clone()), WriterConfig::default());
    let timing = TimingConfig::default();

    let first = writer
        .start(
            ResponseBuilder::new(&timing)
                .ack()
                .complete()
                .data_block(Bytes::from_static(&[1, 2, 3]))
                .build(),
        )
        .unwrap();
    let second = writer.start(ResponseBuilder::new(&timing).nak().build());
    assert!(matches!(second, Err(SioError::ConcurrentWriteViolation)));

    first.finished().await.unwrap();
    assert_eq!(
        link.written(),
        vec![responses::ACK, responses::COMPLETE, 1, 2, 3, block_checksum(&[1, 2, 3])]
    );
    assert!(!writer.is_busy());
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let clock = ManualClock::new();
    let (mut one, link_one) = manual_session(&clock, Box::new(MemoryImage::default()));
    let (mut two, link_two) = manual_session(&clock, Box::new(MemoryImage::new(256, 720)));

    one.registry_mut().write_sector(0, 5, &[0xAB; 128]).unwrap();
    one.handle_input(&frame(0x31, commands::WRITE, 6)).await.unwrap();

    assert_eq!(one.state(), ProtocolState::AwaitingSectorData);
    assert_eq!(two.state(), ProtocolState::AwaitingCommand);
    assert_eq!(two.registry().read_sector(0, 5).unwrap()[0], 0);

    two.handle_input(&frame(0x31, commands::STATUS, 0)).await.unwrap();
    assert_eq!(link_one.written(), vec![responses::ACK]);
    assert_eq!(link_two.written()[2], 0x30);
}

#[tokio::test]
async fn test_format_unbound_drive_creates_image() {
    let clock = ManualClock::new();
    let (mut session, link) = manual_session(&clock, Box::new(MemoryImage::default()));
    assert!(!session.registry().is_bound(4));

    session
        .handle_input(&frame(0x35, commands::FORMAT, 0))
        .await
        .unwrap();

    assert!(session.registry().is_bound(4));
    assert_eq!(session.registry().sector_count(4).unwrap(), 720);
    assert_eq!(link.written().len(), 2 + 128 + 1);
}

#[tokio::test]
async fn test_run_serves_until_input_closes() {
    let link = CaptureLink::new();
    let mut session = DriveSession::builder()
        .clock(Arc::new(MonotonicClock::new()))
        .drive(0, Box::new(MemoryImage::default()))
        .unwrap()
        .build(link.clone())
        .unwrap();

    let (mut host, device) = tokio::io::duplex(64);
    let host_task = tokio::spawn(async move {
        host.write_all(&frame(0x31, commands::STATUS, 0)).await.unwrap();
        host.write_all(&frame(0x31, commands::READ, 1)).await.unwrap();
        host.shutdown().await.unwrap();
        // Keep the stream open until the session has read everything
        tokio::time::sleep(Duration::from_millis(50)).await;
    });

    session.run(device).await.unwrap();
    host_task.await.unwrap();

    let written = link.written();
    assert_eq!(written.len(), 7 + 131);
    assert_eq!(&written[..2], &[responses::ACK, responses::COMPLETE]);
    assert_eq!(&written[7..9], &[responses::ACK, responses::COMPLETE]);
}

#[tokio::test]
async fn test_run_abandons_payload_during_silence() {
    let link = CaptureLink::new();
    let timing = TimingConfig {
        abort_nanos: 50_000_000,
        ..TimingConfig::default()
    };
    let mut session = DriveSession::builder()
        .timing(timing)
        .drive(0, Box::new(MemoryImage::default()))
        .unwrap()
        .build(link.clone())
        .unwrap();

    let (mut host, device) = tokio::io::duplex(64);
    let host_task = tokio::spawn(async move {
        host.write_all(&frame(0x31, commands::WRITE, 9)).await.unwrap();
        host.write_all(&[0x42; 20]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        host.write_all(&frame(0x31, commands::STATUS, 0)).await.unwrap();
        host.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    });

    session.run(device).await.unwrap();
    host_task.await.unwrap();

    let written = link.written();
    assert_eq!(written[0], responses::ACK);
    assert_eq!(&written[1..3], &[responses::ACK, responses::COMPLETE]);
    assert_eq!(written.len(), 1 + 7);
    assert_eq!(session.registry().read_sector(0, 9).unwrap()[0], 0);
    assert_eq!(session.state(), ProtocolState::AwaitingCommand);
}
