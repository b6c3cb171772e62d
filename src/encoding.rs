//! Pulse-width symbol coding for the 2-bus physical layer
//!
//! The capture hardware reports the duration of every pulse as one byte.
//! Durations fall into three bands: short pulses are ones, long pulses are
//! zeros, and the band between them separates consecutive bits.

use crate::message::Frame;

/// Shortest pulse classified as a one
pub const ONE_MIN: u8 = 57;
/// Longest pulse classified as a one
pub const ONE_MAX: u8 = 86;
/// Shortest pulse classified as a separator
pub const SEPARATOR_MIN: u8 = 87;
/// Longest pulse classified as a separator
pub const SEPARATOR_MAX: u8 = 112;
/// Shortest pulse classified as a zero
pub const ZERO_MIN: u8 = 113;
/// Longest pulse classified as a zero
pub const ZERO_MAX: u8 = 137;

/// Classification of a single pulse duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Symbol {
    One,
    Zero,
    /// Gap between bits; a long run of these means the bus is idle
    Separator,
    /// Duration outside every band
    Unknown,
}

impl Symbol {
    /// Classify a pulse duration
    pub fn from_pulse(duration: u8) -> Self {
        match duration {
            ONE_MIN..=ONE_MAX => Symbol::One,
            SEPARATOR_MIN..=SEPARATOR_MAX => Symbol::Separator,
            ZERO_MIN..=ZERO_MAX => Symbol::Zero,
            _ => Symbol::Unknown,
        }
    }

    /// Whether the symbol carries a bit
    pub fn is_data(&self) -> bool {
        matches!(self, Symbol::One | Symbol::Zero)
    }

    /// Bit value of a data symbol
    pub fn bit(&self) -> Option<bool> {
        match self {
            Symbol::One => Some(true),
            Symbol::Zero => Some(false),
            _ => None,
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = match self {
            Symbol::One => '1',
            Symbol::Zero => '0',
            Symbol::Separator => '-',
            Symbol::Unknown => '?',
        };
        write!(f, "{}", c)
    }
}

/// Pack bits into bytes, least significant bit first
///
/// Trailing bits that do not fill a whole byte are dropped.
pub fn pack_bits<I>(bits: I) -> Vec<u8>
where
    I: IntoIterator<Item = bool>,
{
    let mut result = Vec::new();
    let mut byte = 0u8;
    let mut bit_pos = 0;

    for bit in bits {
        if bit {
            byte |= 1 << bit_pos;
        }
        bit_pos += 1;

        if bit_pos == 8 {
            result.push(byte);
            byte = 0;
            bit_pos = 0;
        }
    }

    result
}

/// Reassemble bytes from a symbol sequence, dropping separator and unknown stuffing
pub fn bytes_from_symbols<I>(symbols: I) -> Vec<u8>
where
    I: IntoIterator<Item = Symbol>,
{
    pack_bits(symbols.into_iter().filter_map(|s| s.bit()))
}

/// Synthesizes pulse durations for a byte sequence
///
/// Each bit becomes a run of one or zero pulses followed by a run of
/// separator pulses, least significant bit first. Used to simulate a bus
/// participant and to drive the decoder in tests.
#[derive(Debug, Clone)]
pub struct PulseEncoder {
    /// Duration emitted for a one
    pub one: u8,
    /// Duration emitted for a zero
    pub zero: u8,
    /// Duration emitted for a separator
    pub separator: u8,
    /// Pulses per data run
    pub pulses_per_bit: usize,
    /// Pulses per separator run between bits
    pub pulses_per_separator: usize,
    /// Separator pulses emitted before each frame to mark an idle bus
    pub idle_pulses: usize,
}

impl Default for PulseEncoder {
    fn default() -> Self {
        PulseEncoder {
            one: 72,
            zero: 125,
            separator: 100,
            pulses_per_bit: 2,
            pulses_per_separator: 2,
            idle_pulses: 45,
        }
    }
}

impl PulseEncoder {
    /// Encode a single bit and its trailing separator
    pub fn encode_bit(&self, bit: bool, out: &mut Vec<u8>) {
        let duration = if bit { self.one } else { self.zero };
        out.extend(std::iter::repeat(duration).take(self.pulses_per_bit));
        out.extend(std::iter::repeat(self.separator).take(self.pulses_per_separator));
    }

    /// Encode bytes, preceded by the idle marker
    pub fn encode_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        let per_bit = self.pulses_per_bit + self.pulses_per_separator;
        let mut out = Vec::with_capacity(self.idle_pulses + bytes.len() * 8 * per_bit);
        out.extend(std::iter::repeat(self.separator).take(self.idle_pulses));

        for &byte in bytes {
            for i in 0..8 {
                self.encode_bit((byte >> i) & 1 != 0, &mut out);
            }
        }

        out
    }

    /// Encode a frame's six wire bytes
    pub fn encode_frame(&self, frame: &Frame) -> Vec<u8> {
        self.encode_bytes(&frame.encode())
    }
}
