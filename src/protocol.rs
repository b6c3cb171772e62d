//! Bus arbitration: continuous decoding and idle-gated transmission
//!
//! The arbiter is the single owner of the physical interface. It alternates
//! between draining pulses through the [`SymbolDecoder`] and, once the bus
//! has been quiet for longer than the idle gap, writing one queued frame.
//!
//! ```text
//! BusHandle ─┐
//! BusHandle ─┼─► mpsc::Sender<Frame> ─► BusArbiter ─► port.write
//!            │                             │
//!            └──────── frame sink ◄────────┴── port.read ─► SymbolDecoder
//! ```

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{BusError, Result};
use crate::message::Frame;
use crate::parser::{DecoderStats, SymbolDecoder};
use crate::timing::{IDLE_GAP, IDLE_RESET_RUNS, READ_CHUNK_SIZE};

/// Default sleep between polls when the bus has nothing for us
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Receiver of decoded frames
///
/// Called on the arbiter thread; a slow sink stalls decoding and transmission.
pub type FrameSink = Box<dyn FnMut(Frame) + Send>;

/// What a single poll of the bus did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// A pulse was consumed
    Pulse,
    /// A queued frame was written
    Transmitted,
    /// Frames are queued but the bus was active too recently
    Waiting,
    /// Nothing to read and nothing to send
    Idle,
}

/// Arbiter settings
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Quiet time required before a queued frame is written
    pub idle_gap: Duration,
    /// Maximum bytes fetched per read
    pub read_chunk_size: usize,
    /// Sleep between polls when idle or waiting
    pub poll_interval: Duration,
    /// Separator run length that resynchronizes the decoder
    pub idle_reset_runs: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            idle_gap: IDLE_GAP,
            read_chunk_size: READ_CHUNK_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_reset_runs: IDLE_RESET_RUNS,
        }
    }
}

/// Cloneable handle for queueing outgoing frames
#[derive(Debug, Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<Frame>,
}

impl BusHandle {
    /// Queue a frame for transmission without blocking
    ///
    /// Frames go out in the order they were queued. Nothing confirms that a
    /// frame reached the wire intact.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        self.tx.send(frame).map_err(|_| BusError::Disconnected)
    }
}

/// Owner of the bus loop
pub struct BusArbiter<P> {
    port: P,
    config: BusConfig,
    decoder: SymbolDecoder,
    pulses: VecDeque<u8>,
    read_buf: Vec<u8>,
    last_activity: Instant,
    outgoing: mpsc::Receiver<Frame>,
    queue: VecDeque<Frame>,
    sink: Option<FrameSink>,
    frames_sent: u64,
}

impl<P: Read + Write> BusArbiter<P> {
    /// Run one iteration of the bus loop at time `now`
    ///
    /// A pulse is consumed if one is available. Otherwise, if the last bus
    /// activity is older than the idle gap, one queued frame is written and
    /// flushed; the write itself counts as bus activity.
    pub fn poll_once(&mut self, now: Instant) -> Result<Activity> {
        if let Some(pulse) = self.next_pulse(now)? {
            if let Some(frame) = self.decoder.push_pulse(pulse) {
                self.deliver(frame);
            }
            return Ok(Activity::Pulse);
        }

        self.queue.extend(self.outgoing.try_iter());
        if self.queue.is_empty() {
            return Ok(Activity::Idle);
        }
        if now.saturating_duration_since(self.last_activity) <= self.config.idle_gap {
            return Ok(Activity::Waiting);
        }

        if let Some(frame) = self.queue.pop_front() {
            self.transmit(&frame, now)?;
        }
        Ok(Activity::Transmitted)
    }

    /// Poll forever on wall-clock time; returns only on an I/O failure
    pub fn run(mut self) -> Result<()> {
        tracing::debug!(idle_gap = ?self.config.idle_gap, "bus loop started");
        loop {
            match self.poll_once(Instant::now()) {
                Ok(Activity::Pulse) | Ok(Activity::Transmitted) => {}
                Ok(Activity::Waiting) | Ok(Activity::Idle) => {
                    thread::sleep(self.config.poll_interval)
                }
                Err(err) => {
                    tracing::error!(error = %err, "bus loop stopped");
                    return Err(err);
                }
            }
        }
    }

    fn next_pulse(&mut self, now: Instant) -> Result<Option<u8>> {
        if self.pulses.is_empty() && !self.fill_pulse_buffer(now)? {
            return Ok(None);
        }
        Ok(self.pulses.pop_front())
    }

    fn fill_pulse_buffer(&mut self, now: Instant) -> Result<bool> {
        let read = match self.port.read(&mut self.read_buf) {
            Ok(n) => n,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(err) => return Err(BusError::Io(err)),
        };

        if read == 0 {
            return Ok(false);
        }

        self.pulses.extend(&self.read_buf[..read]);
        self.last_activity = now;
        Ok(true)
    }

    fn transmit(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        tracing::debug!(%frame, "writing frame");
        self.port.write_all(&frame.encode())?;
        self.port.flush()?;
        self.last_activity = now;
        self.frames_sent += 1;
        Ok(())
    }
}

impl<P> BusArbiter<P> {
    /// Mark the bus as active at `now`
    pub fn set_last_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Time of the last received pulse or transmitted frame
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Counters of the receive decoder
    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Frames taken off the handle channel but not yet written
    pub fn pending_frames(&self) -> usize {
        self.queue.len()
    }

    /// Frames written to the port so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Settings the arbiter was built with
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Borrow the underlying port.
    pub fn get_ref(&self) -> &P {
        &self.port
    }

    /// Mutably borrow the underlying port.
    pub fn get_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn deliver(&mut self, frame: Frame) {
        if let Some(sink) = self.sink.as_mut() {
            sink(frame);
        }
    }
}

/// Builder for a [`BusArbiter`]
pub struct BusBuilder {
    config: BusConfig,
    sink: Option<FrameSink>,
}

impl BusBuilder {
    /// Builder with default settings and no frame sink
    pub fn new() -> Self {
        BusBuilder {
            config: BusConfig::default(),
            sink: None,
        }
    }

    /// Set the quiet time required before transmitting
    pub fn with_idle_gap(mut self, idle_gap: Duration) -> Self {
        self.config.idle_gap = idle_gap;
        self
    }

    /// Set the maximum bytes fetched per read
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    /// Set the sleep between idle polls
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the separator run length that resynchronizes the decoder
    pub fn with_idle_reset_runs(mut self, runs: u32) -> Self {
        self.config.idle_reset_runs = runs;
        self
    }

    /// Call `callback` for every decoded frame, on the arbiter thread
    pub fn on_frame<F>(mut self, callback: F) -> Self
    where
        F: FnMut(Frame) + Send + 'static,
    {
        let sink: FrameSink = Box::new(callback);
        self.sink = Some(sink);
        self
    }

    /// Deliver decoded frames through a bounded channel
    ///
    /// Frames arriving while the channel is full are dropped with a warning
    /// so a slow consumer never stalls the bus.
    pub fn frame_channel(mut self, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let sink: FrameSink = Box::new(move |frame: Frame| match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(frame)) => {
                tracing::warn!(%frame, "frame channel full, dropping frame");
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {}
        });
        self.sink = Some(sink);
        (self, rx)
    }

    /// Build the arbiter and its transmit handle
    pub fn build<P: Read + Write>(self, port: P) -> (BusArbiter<P>, BusHandle) {
        let (tx, rx) = mpsc::channel();
        let arbiter = BusArbiter {
            port,
            decoder: SymbolDecoder::with_idle_reset_runs(self.config.idle_reset_runs),
            pulses: VecDeque::with_capacity(self.config.read_chunk_size),
            read_buf: vec![0u8; self.config.read_chunk_size],
            last_activity: Instant::now(),
            outgoing: rx,
            queue: VecDeque::new(),
            sink: self.sink,
            frames_sent: 0,
            config: self.config,
        };
        (arbiter, BusHandle { tx })
    }

    /// Build the arbiter and run it on a dedicated thread
    pub fn spawn<P>(self, port: P) -> Result<(BusHandle, JoinHandle<Result<()>>)>
    where
        P: Read + Write + Send + 'static,
    {
        let (arbiter, handle) = self.build(port);
        let join = thread::Builder::new()
            .name("twobus-arbiter".into())
            .spawn(move || arbiter.run())?;
        Ok((handle, join))
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
