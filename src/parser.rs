//! Run-length symbol decoder turning a pulse stream into frames

use std::collections::VecDeque;

use crate::encoding::{pack_bits, Symbol};
use crate::message::Frame;
use crate::timing::{FRAME_LENGTH, FRAME_WINDOW_RUNS, IDLE_RESET_RUNS};

/// Data runs needed for one frame
const FRAME_BITS: usize = FRAME_LENGTH * 8;

/// A maximal sequence of identical symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Run {
    pub symbol: Symbol,
    pub count: u32,
}

impl Run {
    /// Start a run with a single symbol
    pub fn new(symbol: Symbol) -> Self {
        Run { symbol, count: 1 }
    }

    /// Whether this run is a separator run long enough to mean the bus went idle
    pub fn is_idle(&self, threshold: u32) -> bool {
        self.symbol == Symbol::Separator && self.count > threshold
    }
}

impl std::fmt::Display for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.symbol, self.count)
    }
}

/// State of the run currently being accumulated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// No pulse seen since the decoder was created or reset
    #[default]
    Idle,
    /// Counting repeats of the current symbol
    Accumulating(Run),
}

/// Closed runs of the current session
///
/// Keeps a running count of data runs inside the leading frame window so a
/// frame check costs O(1) per closed run.
#[derive(Debug, Clone, Default)]
pub struct RunBuffer {
    runs: VecDeque<Run>,
    window_data_runs: usize,
}

impl RunBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a closed run, counting it if it lands inside the window
    pub fn push(&mut self, run: Run) {
        if self.runs.len() < FRAME_WINDOW_RUNS && run.symbol.is_data() {
            self.window_data_runs += 1;
        }
        self.runs.push_back(run);
    }

    /// Drop every run
    pub fn clear(&mut self) {
        self.runs.clear();
        self.window_data_runs = 0;
    }

    /// Number of buffered runs
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// True when no run is buffered
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Buffered runs, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Run> {
        self.runs.iter()
    }

    /// Data runs among the first [`FRAME_WINDOW_RUNS`] runs
    pub fn window_data_runs(&self) -> usize {
        self.window_data_runs
    }

    /// Bits carried by the leading window, stuffing removed
    pub fn window_bits(&self) -> impl Iterator<Item = bool> + '_ {
        self.runs
            .iter()
            .take(FRAME_WINDOW_RUNS)
            .filter_map(|run| run.symbol.bit())
    }

    /// Drop the leading window and recount the next one
    pub fn consume_window(&mut self) {
        let n = self.runs.len().min(FRAME_WINDOW_RUNS);
        self.runs.drain(..n);
        self.window_data_runs = self
            .runs
            .iter()
            .take(FRAME_WINDOW_RUNS)
            .filter(|run| run.symbol.is_data())
            .count();
    }
}

/// Counters kept by the decoder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecoderStats {
    pub pulses: u64,
    pub runs: u64,
    /// Times the run buffer was discarded after an idle bus
    pub idle_resets: u64,
    pub frames: u64,
    pub checksum_mismatches: u64,
}

/// Decodes frames from a stream of pulse durations
///
/// Pulses are classified into symbols and run-length encoded. Every time a
/// run closes, the first [`FRAME_WINDOW_RUNS`] buffered runs are checked for
/// enough data runs to make a frame; separator and unknown runs are stuffing.
/// A separator run longer than the idle threshold discards the buffer so a
/// partial frame cannot corrupt the next one.
#[derive(Debug, Clone)]
pub struct SymbolDecoder {
    state: DecoderState,
    runs: RunBuffer,
    idle_reset_runs: u32,
    stats: DecoderStats,
}

impl Default for SymbolDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolDecoder {
    /// Create a decoder with the standard idle threshold
    pub fn new() -> Self {
        Self::with_idle_reset_runs(IDLE_RESET_RUNS)
    }

    /// Create a decoder with a custom idle separator threshold
    pub fn with_idle_reset_runs(idle_reset_runs: u32) -> Self {
        SymbolDecoder {
            state: DecoderState::Idle,
            runs: RunBuffer::new(),
            idle_reset_runs,
            stats: DecoderStats::default(),
        }
    }

    /// Feed one pulse duration, returning a frame if one completed
    pub fn push_pulse(&mut self, pulse: u8) -> Option<Frame> {
        self.stats.pulses += 1;
        let symbol = Symbol::from_pulse(pulse);

        if let DecoderState::Accumulating(run) = &mut self.state {
            if run.symbol == symbol {
                run.count = run.count.saturating_add(1);
                return None;
            }
        }

        match std::mem::replace(&mut self.state, DecoderState::Accumulating(Run::new(symbol))) {
            DecoderState::Idle => None,
            DecoderState::Accumulating(closed) => self.close_run(closed),
        }
    }

    /// Feed a batch of pulses, calling `on_frame` for every completed frame
    pub fn push_pulses<F>(&mut self, pulses: &[u8], mut on_frame: F)
    where
        F: FnMut(Frame),
    {
        for &pulse in pulses {
            if let Some(frame) = self.push_pulse(pulse) {
                on_frame(frame);
            }
        }
    }

    /// Close the open run, e.g. at the end of a capture
    pub fn finish(&mut self) -> Option<Frame> {
        match std::mem::take(&mut self.state) {
            DecoderState::Idle => None,
            DecoderState::Accumulating(run) => self.close_run(run),
        }
    }

    /// Drop all buffered state; counters are kept
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.runs.clear();
    }

    /// Run currently being accumulated
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Closed runs waiting to be framed
    pub fn buffered_runs(&self) -> &RunBuffer {
        &self.runs
    }

    /// Counters since creation; [`SymbolDecoder::reset`] keeps them
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn close_run(&mut self, run: Run) -> Option<Frame> {
        self.stats.runs += 1;

        if run.is_idle(self.idle_reset_runs) {
            if !self.runs.is_empty() {
                tracing::debug!(discarded = self.runs.len(), "bus idle, resynchronizing");
            }
            self.runs.clear();
            self.stats.idle_resets += 1;
        }

        self.runs.push(run);
        self.identify_frame()
    }

    fn identify_frame(&mut self) -> Option<Frame> {
        if self.runs.window_data_runs() < FRAME_BITS {
            return None;
        }

        let bytes = pack_bits(self.runs.window_bits().take(FRAME_BITS));
        self.runs.consume_window();

        let window: [u8; FRAME_LENGTH] = bytes.try_into().ok()?;
        let frame = Frame::decode(&window);

        self.stats.frames += 1;
        if !frame.is_checksum_valid() {
            self.stats.checksum_mismatches += 1;
        }
        tracing::trace!(%frame, "frame decoded");
        Some(frame)
    }
}
