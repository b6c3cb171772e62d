//! Error types for 2-bus decoding and transmission

use thiserror::Error;

/// Result type for 2-bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by the 2-bus codec and arbiter.
///
/// Checksum mismatches and unclassifiable pulses are not errors: they are
/// reported as data on the decoded frame or dropped as stuffing.
#[derive(Error, Debug)]
pub enum BusError {
    /// Device address field out of range
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Not enough bytes to build a frame
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Command name or literal not understood
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// The bus arbiter is no longer running
    #[error("Bus arbiter disconnected")]
    Disconnected,

    /// Physical interface failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// Create a new InvalidAddress error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        BusError::InvalidAddress(msg.into())
    }

    /// Create a new InsufficientData error
    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        BusError::InsufficientData(msg.into())
    }

    /// Create a new UnknownCommand error
    pub fn unknown_command(msg: impl Into<String>) -> Self {
        BusError::UnknownCommand(msg.into())
    }

    /// Whether this error ends the bus loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Io(_) | BusError::Disconnected)
    }
}
