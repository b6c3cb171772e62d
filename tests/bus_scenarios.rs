use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use twobus_parser::timing::FRAME_WINDOW_RUNS;
use twobus_parser::*;

/// Replays pulse chunks, then reports the port as gone
struct ReplayPort {
    chunks: VecDeque<Vec<u8>>,
    wire: Vec<u8>,
}

impl ReplayPort {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        ReplayPort {
            chunks: chunks.into(),
            wire: Vec::new(),
        }
    }
}

impl Read for ReplayPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.chunks.pop_front() {
            Some(mut chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.chunks.push_front(chunk.split_off(n));
                }
                Ok(n)
            }
            None => Err(std::io::Error::new(ErrorKind::BrokenPipe, "capture ended")),
        }
    }
}

impl Write for ReplayPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.wire.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn trivial_ping() -> Frame {
    Frame::decode(&[0x01, 0x00, 0x04, 0x00, 0x40, 0xBB])
}

#[test]
fn test_end_to_end_ping() {
    let pulses = PulseEncoder::default().encode_bytes(&[0x01, 0x00, 0x04, 0x00, 0x40, 0xBB]);

    let mut decoder = SymbolDecoder::new();
    let mut frames = Vec::new();
    decoder.push_pulses(&pulses, |f| frames.push(f));

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].command.name(), Some("ping"));
    assert_eq!(frames[0].checksum_status(), ChecksumStatus::Valid);
    assert_eq!(frames[0].destination, MASTER);
}

#[test]
fn test_idle_reset_recovers_after_garbage() {
    let encoder = PulseEncoder {
        idle_pulses: 0,
        ..PulseEncoder::default()
    };

    // half a frame, then a 45-pulse separator run, then a full frame
    let mut pulses = encoder.encode_bytes(&[0xFF, 0x00, 0xAA]);
    pulses.extend(std::iter::repeat(100).take(45));
    pulses.extend(encoder.encode_frame(&trivial_ping()));

    let mut decoder = SymbolDecoder::new();
    let mut frames = Vec::new();
    decoder.push_pulses(&pulses, |f| frames.push(f));

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].encode(), trivial_ping().encode());
    assert!(frames[0].is_checksum_valid());
    assert_eq!(decoder.stats().idle_resets, 1);
}

#[test]
fn test_without_idle_reset_partial_frame_corrupts_next() {
    let encoder = PulseEncoder {
        idle_pulses: 0,
        ..PulseEncoder::default()
    };

    // same garbage, but the gap is too short to count as idle
    let mut pulses = encoder.encode_bytes(&[0xFF, 0x00, 0xAA]);
    pulses.extend(std::iter::repeat(100).take(30));
    pulses.extend(encoder.encode_frame(&trivial_ping()));

    let mut decoder = SymbolDecoder::new();
    let mut frames = Vec::new();
    decoder.push_pulses(&pulses, |f| frames.push(f));

    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0].encode()[..3], &[0xFF, 0x00, 0xAA]);
    assert!(!frames[0].is_checksum_valid());
}

#[test]
fn test_window_counts_runs_not_pulses() {
    // long data runs: each bit is 20 pulses but still one run
    let encoder = PulseEncoder {
        pulses_per_bit: 20,
        pulses_per_separator: 5,
        ..PulseEncoder::default()
    };
    let mut decoder = SymbolDecoder::new();
    let mut frames = Vec::new();
    decoder.push_pulses(&encoder.encode_frame(&trivial_ping()), |f| frames.push(f));

    assert_eq!(frames.len(), 1);
    assert!(decoder.buffered_runs().len() < FRAME_WINDOW_RUNS);
}

#[test]
fn test_every_address_and_command_survives_the_wire() -> Result<()> {
    let encoder = PulseEncoder::default();
    let mut decoder = SymbolDecoder::new();

    for code in [0x00u8, 0x0E, 0x40, 0x41, 0xE3, 0xFF] {
        for slot in [0u16, 1, 63, 512, 1023] {
            for module in 0..4 {
                let src = DeviceAddress::new(slot, module, slot == 0)?;
                let dst = DeviceAddress::new(1023 - slot, 3 - module, slot != 0)?;
                let frame = Frame::new(src, dst, CommandCode::decode(code));

                let mut frames = Vec::new();
                decoder.push_pulses(&encoder.encode_frame(&frame), |f| frames.push(f));
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].source, src);
                assert_eq!(frames[0].destination, dst);
                assert_eq!(frames[0].command.encode(), code);
                assert!(frames[0].is_checksum_valid());
            }
        }
    }
    Ok(())
}

#[test]
fn test_arbitration_one_frame_per_idle_gap() -> Result<()> {
    let (mut bus, handle) = BusBuilder::new()
        .with_idle_gap(Duration::from_millis(1))
        .build(ReplayPort::new(Vec::new()));
    let t0 = Instant::now();
    bus.set_last_activity(t0);

    handle.send_frame(trivial_ping())?;
    handle.send_frame(Frame::new(MASTER, MASTER, CommandCode::OK))?;

    let mut now = t0;
    for _ in 0..20 {
        now += Duration::from_micros(800);
        bus.get_mut().chunks.push_back(vec![125]);
        assert_eq!(bus.poll_once(now)?, Activity::Pulse);
    }
    assert_eq!(bus.frames_sent(), 0);

    // bus goes quiet; an empty chunk reads as "no data"
    bus.get_mut().chunks.push_back(Vec::new());
    now += Duration::from_micros(1100);
    assert_eq!(bus.poll_once(now)?, Activity::Transmitted);
    bus.get_mut().chunks.push_back(Vec::new());
    assert_eq!(bus.poll_once(now)?, Activity::Waiting);
    assert_eq!(bus.frames_sent(), 1);

    bus.get_mut().chunks.push_back(Vec::new());
    now += Duration::from_micros(1100);
    assert_eq!(bus.poll_once(now)?, Activity::Transmitted);
    assert_eq!(bus.frames_sent(), 2);
    assert_eq!(bus.get_ref().wire.len(), 12);
    assert_eq!(&bus.get_ref().wire[..6], &trivial_ping().encode());
    Ok(())
}

#[test]
fn test_spawned_arbiter_delivers_and_stops_on_io_failure() {
    let encoder = PulseEncoder::default();
    let mut pulses = encoder.encode_frame(&trivial_ping());
    pulses.extend(encoder.encode_frame(&Frame::new(MASTER, MASTER, CommandCode::OPEN_AUDIO)));
    let chunks = pulses.chunks(100).map(|c| c.to_vec()).collect();

    let (builder, frames) = BusBuilder::new().frame_channel(8);
    let (handle, join) = builder.spawn(ReplayPort::new(chunks)).unwrap();

    let result = join.join().expect("arbiter thread panicked");
    assert!(matches!(result, Err(BusError::Io(_))));

    let received: Vec<Frame> = frames.try_iter().collect();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].command, CommandCode::PING);
    assert_eq!(received[1].command, CommandCode::OPEN_AUDIO);

    assert!(matches!(
        handle.send_frame(trivial_ping()),
        Err(BusError::Disconnected)
    ));
}
