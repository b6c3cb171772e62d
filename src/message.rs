//! Command codes and frames for the 2-bus protocol

use crate::address::DeviceAddress;
use crate::error::{BusError, Result};
use crate::timing::FRAME_LENGTH;

/// Known command codes and their diagnostic names
static COMMAND_TABLE: [(u8, &str); 17] = [
    (0x00, "OK"),
    (0x08, "overtake_accepted?line_busy?FAIL"),
    (0x0A, "call_from_eg"),
    (0x0C, "accepted_call_from_eg"),
    (0x0E, "open_lock"),
    (0x10, "hangup_from_eg"),
    (0x12, "ping_phone"),
    (0x16, "request_line"),
    (0x18, "invite_from_phone"),
    (0x1A, "accepted_call_from_phone"),
    (0x1E, "hangup"),
    (0x23, "overtake_call"),
    (0x36, "open_audio"),
    (0x40, "ping"),
    (0xE1, "configure_as_slave_1"),
    (0xE2, "configure_as_slave_2"),
    (0xE3, "configure_as_slave_3"),
];

/// Name of a command code, if it is in the table
pub fn command_name(code: u8) -> Option<&'static str> {
    COMMAND_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Code of the first table entry with the given name
pub fn command_code(name: &str) -> Option<u8> {
    COMMAND_TABLE
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
}

/// All named commands, in code order
pub fn known_commands() -> impl Iterator<Item = CommandCode> {
    COMMAND_TABLE.iter().map(|(code, _)| CommandCode(*code))
}

/// A 1-byte command opcode
///
/// Every byte value is a valid command; only some have names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CommandCode(u8);

impl CommandCode {
    /// Acknowledge
    pub const OK: CommandCode = CommandCode(0x00);
    /// Overtake accepted, line busy or failure; the meaning is not settled
    pub const LINE_BUSY: CommandCode = CommandCode(0x08);
    /// Incoming call from the door station
    pub const CALL_FROM_EG: CommandCode = CommandCode(0x0A);
    /// Door station call was accepted
    pub const ACCEPTED_CALL_FROM_EG: CommandCode = CommandCode(0x0C);
    /// Release the door lock
    pub const OPEN_LOCK: CommandCode = CommandCode(0x0E);
    /// Door station hung up
    pub const HANGUP_FROM_EG: CommandCode = CommandCode(0x10);
    /// Ring a phone
    pub const PING_PHONE: CommandCode = CommandCode(0x12);
    /// Ask for the audio line
    pub const REQUEST_LINE: CommandCode = CommandCode(0x16);
    /// Call initiated by a phone
    pub const INVITE_FROM_PHONE: CommandCode = CommandCode(0x18);
    /// Phone call was accepted
    pub const ACCEPTED_CALL_FROM_PHONE: CommandCode = CommandCode(0x1A);
    /// End the call
    pub const HANGUP: CommandCode = CommandCode(0x1E);
    /// Take over a call from another phone
    pub const OVERTAKE_CALL: CommandCode = CommandCode(0x23);
    /// Open the audio channel
    pub const OPEN_AUDIO: CommandCode = CommandCode(0x36);
    /// Presence check
    pub const PING: CommandCode = CommandCode(0x40);
    /// Configure the addressee as slave 1
    pub const CONFIGURE_AS_SLAVE_1: CommandCode = CommandCode(0xE1);
    /// Configure the addressee as slave 2
    pub const CONFIGURE_AS_SLAVE_2: CommandCode = CommandCode(0xE2);
    /// Configure the addressee as slave 3
    pub const CONFIGURE_AS_SLAVE_3: CommandCode = CommandCode(0xE3);

    /// Any byte is a command
    pub fn decode(byte: u8) -> Self {
        CommandCode(byte)
    }

    /// Wire byte of the command
    pub fn encode(&self) -> u8 {
        self.0
    }

    /// Diagnostic name, if the code is known
    pub fn name(&self) -> Option<&'static str> {
        command_name(self.0)
    }

    /// Look up a command by its diagnostic name
    pub fn lookup_by_name(name: &str) -> Option<Self> {
        command_code(name).map(CommandCode)
    }
}

impl From<u8> for CommandCode {
    fn from(byte: u8) -> Self {
        CommandCode(byte)
    }
}

impl std::str::FromStr for CommandCode {
    type Err = BusError;

    /// Accepts a table name, a decimal byte or a `0x` hex byte
    fn from_str(s: &str) -> Result<Self> {
        if let Some(code) = Self::lookup_by_name(s) {
            return Ok(code);
        }
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => s.parse::<u8>(),
        };
        parsed
            .map(CommandCode)
            .map_err(|_| BusError::unknown_command(s))
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name().unwrap_or("UNKNOWN"), self.0)
    }
}

/// Outcome of comparing a received checksum with the computed one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChecksumStatus {
    /// Received checksum matches
    Valid,
    /// Received checksum differs from the computed one
    Mismatch { expected: u8, received: u8 },
    /// Frame was built locally, nothing was received
    NotReceived,
}

/// A 2-bus frame
///
/// Wire format (6 bytes):
/// - Bytes 0-1: destination address
/// - Bytes 2-3: source address
/// - Byte 4: command code
/// - Byte 5: checksum, so that all six bytes sum to 0 mod 256
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
    pub source: DeviceAddress,
    pub destination: DeviceAddress,
    pub command: CommandCode,
    /// Checksum byte as received; `None` for frames built locally
    pub received_checksum: Option<u8>,
    /// First five wire bytes as received, including bits the address layout ignores
    #[cfg_attr(feature = "serde", serde(skip))]
    received_body: Option<[u8; FRAME_LENGTH - 1]>,
}

/// Two's complement of the byte sum, so that body plus checksum sums to 0 mod 256
fn checksum_of(body: &[u8]) -> u8 {
    let sum = body.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

impl Frame {
    /// Create a frame for transmission
    pub fn new(source: DeviceAddress, destination: DeviceAddress, command: CommandCode) -> Self {
        Frame {
            source,
            destination,
            command,
            received_checksum: None,
            received_body: None,
        }
    }

    /// Decode a frame from its 6 wire bytes
    ///
    /// The checksum is verified against the raw wire bytes, so corruption of
    /// bits that the decoded fields drop is still caught. A mismatch is logged
    /// and reported through [`Frame::checksum_status`]; the frame is still
    /// returned.
    pub fn decode(bytes: &[u8; FRAME_LENGTH]) -> Self {
        let frame = Frame {
            destination: DeviceAddress::decode([bytes[0], bytes[1]]),
            source: DeviceAddress::decode([bytes[2], bytes[3]]),
            command: CommandCode::decode(bytes[4]),
            received_checksum: Some(bytes[5]),
            received_body: Some([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]),
        };

        if let ChecksumStatus::Mismatch { expected, received } = frame.checksum_status() {
            tracing::warn!(expected, received, "checksum mismatch");
        }

        frame
    }

    /// Destination, source and command bytes, in wire order
    pub fn encode_without_checksum(&self) -> [u8; FRAME_LENGTH - 1] {
        let dst = self.destination.encode();
        let src = self.source.encode();
        [dst[0], dst[1], src[0], src[1], self.command.encode()]
    }

    /// Two's complement of the byte sum of the first five wire bytes
    pub fn checksum(&self) -> u8 {
        checksum_of(&self.encode_without_checksum())
    }

    /// Full 6-byte wire encoding
    pub fn encode(&self) -> [u8; FRAME_LENGTH] {
        let body = self.encode_without_checksum();
        [body[0], body[1], body[2], body[3], body[4], self.checksum()]
    }

    /// Six bytes exactly as received; `None` for frames built locally
    pub fn received_bytes(&self) -> Option<[u8; FRAME_LENGTH]> {
        let body = self.received_body?;
        let cs = self.received_checksum?;
        Some([body[0], body[1], body[2], body[3], body[4], cs])
    }

    /// Compare the received checksum with the sum of the received bytes
    ///
    /// Frames deserialized without their wire bytes fall back to the
    /// checksum of the decoded fields.
    pub fn checksum_status(&self) -> ChecksumStatus {
        match self.received_checksum {
            None => ChecksumStatus::NotReceived,
            Some(received) => {
                let expected = self
                    .received_body
                    .map(|body| checksum_of(&body))
                    .unwrap_or_else(|| self.checksum());
                if expected == received {
                    ChecksumStatus::Valid
                } else {
                    ChecksumStatus::Mismatch { expected, received }
                }
            }
        }
    }

    /// False only when a received checksum disagrees with the contents
    pub fn is_checksum_valid(&self) -> bool {
        !matches!(self.checksum_status(), ChecksumStatus::Mismatch { .. })
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = BusError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let window: &[u8; FRAME_LENGTH] = bytes
            .get(..FRAME_LENGTH)
            .and_then(|head| head.try_into().ok())
            .ok_or_else(|| {
                BusError::insufficient_data(format!(
                    "Expected {} bytes for frame, got {}",
                    FRAME_LENGTH,
                    bytes.len()
                ))
            })?;
        Ok(Frame::decode(window))
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "src:{{{}}} dst:{{{}}} cmd:{} cs:{}",
            self.source,
            self.destination,
            self.command,
            self.checksum()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MASTER;

    fn phone() -> DeviceAddress {
        DeviceAddress::new(1, 0, false).unwrap()
    }

    #[test]
    fn test_command_roundtrip_all_bytes() {
        for byte in 0..=u8::MAX {
            assert_eq!(CommandCode::decode(CommandCode::decode(byte).encode()).encode(), byte);
        }
    }

    #[test]
    fn test_command_lookup_by_name() {
        assert_eq!(CommandCode::lookup_by_name("ping").map(|c| c.encode()), Some(0x40));
        assert_eq!(CommandCode::lookup_by_name("open_lock"), Some(CommandCode::OPEN_LOCK));
        assert_eq!(
            CommandCode::lookup_by_name("configure_as_slave_3").map(|c| c.encode()),
            Some(0xE3)
        );
        assert_eq!(CommandCode::lookup_by_name("PING"), None);
        assert_eq!(CommandCode::lookup_by_name(""), None);
    }

    #[test]
    fn test_command_table_is_bijective() {
        for cmd in known_commands() {
            let name = cmd.name().unwrap();
            assert_eq!(CommandCode::lookup_by_name(name), Some(cmd));
        }
        assert_eq!(known_commands().count(), 17);
    }

    #[test]
    fn test_command_display() {
        assert_eq!(CommandCode::PING.to_string(), "ping(64)");
        assert_eq!(CommandCode::decode(0x41).to_string(), "UNKNOWN(65)");
    }

    #[test]
    fn test_command_from_str() {
        assert_eq!("hangup".parse::<CommandCode>().unwrap(), CommandCode::HANGUP);
        assert_eq!("0x36".parse::<CommandCode>().unwrap(), CommandCode::OPEN_AUDIO);
        assert_eq!("99".parse::<CommandCode>().unwrap().encode(), 99);
        assert!("dance".parse::<CommandCode>().is_err());
        assert!("300".parse::<CommandCode>().is_err());
    }

    #[test]
    fn test_checksum_sums_to_zero() -> Result<()> {
        for cmd in 0..=u8::MAX {
            let frame = Frame::new(MASTER, DeviceAddress::new(cmd as u16, cmd & 3, cmd % 2 == 0)?, cmd.into());
            let sum = frame.encode().iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            assert_eq!(sum, 0);
        }
        Ok(())
    }

    #[test]
    fn test_wire_order_destination_first() {
        let frame = Frame::new(MASTER, phone(), CommandCode::PING);
        let bytes = frame.encode();
        assert_eq!(&bytes[..2], &phone().encode());
        assert_eq!(&bytes[2..4], &MASTER.encode());
        assert_eq!(bytes[4], 0x40);
    }

    #[test]
    fn test_frame_decode_roundtrip() {
        let frame = Frame::new(MASTER, phone(), CommandCode::OPEN_LOCK);
        let decoded = Frame::decode(&frame.encode());

        assert_eq!(decoded.source, frame.source);
        assert_eq!(decoded.destination, frame.destination);
        assert_eq!(decoded.command, frame.command);
        assert_eq!(decoded.checksum_status(), ChecksumStatus::Valid);
        assert!(decoded.is_checksum_valid());
    }

    #[test]
    fn test_known_ping_bytes() {
        let bytes = [0x01, 0x00, 0x04, 0x00, 0x40, 0xBB];
        let frame = Frame::decode(&bytes);
        assert_eq!(frame.command.name(), Some("ping"));
        assert_eq!(frame.destination, MASTER);
        assert_eq!(frame.source.slot_number(), 1);
        assert!(frame.source.is_gatekeeper());
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn test_single_byte_corruption_detected() {
        let good = Frame::new(MASTER, phone(), CommandCode::HANGUP).encode();
        for idx in 0..FRAME_LENGTH {
            for flip in [0x01u8, 0x10, 0x80, 0xFF] {
                let mut bad = good;
                bad[idx] ^= flip;
                let frame = Frame::decode(&bad);
                assert!(
                    !frame.is_checksum_valid(),
                    "corruption of byte {idx} with {flip:#04x} not detected"
                );
            }
        }
    }

    #[test]
    fn test_every_single_bit_flip_detected() {
        let good = [0x01, 0x00, 0x04, 0x00, 0x40, 0xBB];
        for idx in 0..FRAME_LENGTH {
            for bit in 0..8 {
                let mut bad = good;
                bad[idx] ^= 1 << bit;
                let frame = Frame::decode(&bad);
                assert!(
                    !frame.is_checksum_valid(),
                    "flip of bit {bit} in byte {idx} not detected"
                );
            }
        }
    }

    #[test]
    fn test_ignored_address_bits_still_checked() {
        // bit 5 of the source high byte: fields decode the same, sum does not
        let frame = Frame::decode(&[0x01, 0x00, 0x04, 0x20, 0x40, 0xBB]);
        assert_eq!(frame.source, DeviceAddress::new(1, 0, true).unwrap());
        assert_eq!(
            frame.checksum_status(),
            ChecksumStatus::Mismatch {
                expected: 0x9B,
                received: 0xBB
            }
        );
        assert_eq!(frame.received_bytes(), Some([0x01, 0x00, 0x04, 0x20, 0x40, 0xBB]));
        // re-encoding drops the unused bits
        assert_eq!(frame.encode(), [0x01, 0x00, 0x04, 0x00, 0x40, 0xBB]);
    }

    #[test]
    fn test_local_frame_has_no_received_checksum() {
        let frame = Frame::new(MASTER, phone(), CommandCode::PING);
        assert_eq!(frame.checksum_status(), ChecksumStatus::NotReceived);
        assert!(frame.is_checksum_valid());
    }

    #[test]
    fn test_try_from_short_slice() {
        assert!(Frame::try_from(&[0x01u8, 0x00, 0x04][..]).is_err());
        let frame = Frame::try_from(&[0x01u8, 0x00, 0x04, 0x00, 0x40, 0xBB, 0xAA][..]).unwrap();
        assert!(frame.is_checksum_valid());
    }

    #[test]
    fn test_frame_display() {
        let frame = Frame::decode(&[0x01, 0x00, 0x04, 0x00, 0x40, 0xBB]);
        assert_eq!(
            frame.to_string(),
            "src:{sn:1 mn:0 is_gk:1} dst:{sn:0 mn:1 is_gk:1} cmd:ping(64) cs:187"
        );
    }
}
