//! # 2-bus Protocol Parser
//!
//! Decoder and encoder for the pulse-width-modulated two-wire bus used by
//! intercom and phone modules.
//!
//! Capture hardware reports the duration of every pulse on the bus as a
//! single byte. This library provides:
//!
//! - Pulse classification into bit and separator symbols
//! - Run-length reassembly of symbols into bytes and frames
//! - Frame encoding with the additive checksum
//! - A bus arbiter that decodes continuously and transmits only when the bus is idle
//!
//! ## Features
//!
//! - `serde`: Enable serialization/deserialization support
//! - `cli`: Build the `twobus-replay` capture replay tool
//!
//! ## Example
//!
//! ```
//! use twobus_parser::{CommandCode, DeviceAddress, Frame, PulseEncoder, SymbolDecoder, MASTER};
//!
//! let phone = DeviceAddress::new(1, 0, true)?;
//! let frame = Frame::new(phone, MASTER, CommandCode::PING);
//!
//! let pulses = PulseEncoder::default().encode_frame(&frame);
//! let mut decoder = SymbolDecoder::new();
//! let mut decoded = Vec::new();
//! decoder.push_pulses(&pulses, |f| decoded.push(f));
//!
//! assert_eq!(decoded.len(), 1);
//! assert_eq!(decoded[0].command.name(), Some("ping"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod address;
pub mod encoding;
pub mod error;
pub mod message;
pub mod parser;
pub mod protocol;

pub use address::{DeviceAddress, MASTER};
pub use encoding::{PulseEncoder, Symbol};
pub use error::{BusError, Result};
pub use message::{ChecksumStatus, CommandCode, Frame};
pub use parser::{DecoderState, DecoderStats, Run, RunBuffer, SymbolDecoder};
pub use protocol::{Activity, BusArbiter, BusBuilder, BusConfig, BusHandle};

/// Wire timing and framing constants
pub mod timing {
    use std::time::Duration;

    /// Frame length in bytes
    pub const FRAME_LENGTH: usize = 6;

    /// Each bit is a data run followed by a separator run
    pub const RUNS_PER_BIT: usize = 2;

    /// Number of runs inspected when looking for a frame
    pub const FRAME_WINDOW_RUNS: usize = FRAME_LENGTH * 8 * RUNS_PER_BIT;

    /// Separator runs longer than this mark an idle bus
    pub const IDLE_RESET_RUNS: u32 = 40;

    /// Quiet time required before transmitting
    pub const IDLE_GAP: Duration = Duration::from_millis(1);

    /// Maximum pulse bytes fetched per read
    pub const READ_CHUNK_SIZE: usize = 1024;
}
