//! Device addressing for 2-bus participants

use bitfield::bitfield;

use crate::error::{BusError, Result};

bitfield! {
    /// Raw 2-byte address field, byte 0 in the low half.
    #[derive(Clone, Copy)]
    struct AddressBits(u16);
    u8, module_number, set_module_number: 1, 0;
    u16, slot_number, set_slot_number: 11, 2;
    not_gatekeeper, set_not_gatekeeper: 12;
}

/// Address of a bus participant
///
/// Wire layout (2 bytes):
/// - Byte 0, bits 1-0: module number
/// - Byte 0, bits 7-2: slot number, low 6 bits
/// - Byte 1, bits 3-0: slot number, high 4 bits
/// - Byte 1, bit 4: cleared for the gatekeeper, set for everyone else
/// - Byte 1, bits 7-5: unused, ignored on decode and zero on encode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "AddressFields"))]
pub struct DeviceAddress {
    slot_number: u16,
    module_number: u8,
    is_gatekeeper: bool,
}

impl DeviceAddress {
    /// Maximum slot number (10 bits)
    pub const MAX_SLOT: u16 = 0x3FF;
    /// Maximum module number (2 bits)
    pub const MAX_MODULE: u8 = 0x3;

    /// Create a new address, validating slot and module ranges
    pub fn new(slot_number: u16, module_number: u8, is_gatekeeper: bool) -> Result<Self> {
        if slot_number > Self::MAX_SLOT {
            return Err(BusError::invalid_address(format!(
                "Slot number {} out of range [0, {}]",
                slot_number,
                Self::MAX_SLOT
            )));
        }
        if module_number > Self::MAX_MODULE {
            return Err(BusError::invalid_address(format!(
                "Module number {} out of range [0, {}]",
                module_number,
                Self::MAX_MODULE
            )));
        }
        Ok(DeviceAddress {
            slot_number,
            module_number,
            is_gatekeeper,
        })
    }

    /// Decode an address from its 2-byte wire field. Never fails.
    pub fn decode(bytes: [u8; 2]) -> Self {
        let bits = AddressBits(u16::from_le_bytes(bytes));
        DeviceAddress {
            slot_number: bits.slot_number(),
            module_number: bits.module_number(),
            is_gatekeeper: !bits.not_gatekeeper(),
        }
    }

    /// Encode the address into its 2-byte wire field
    pub fn encode(&self) -> [u8; 2] {
        let mut bits = AddressBits(0);
        bits.set_module_number(self.module_number);
        bits.set_slot_number(self.slot_number);
        bits.set_not_gatekeeper(!self.is_gatekeeper);
        bits.0.to_le_bytes()
    }

    /// Slot number, 0..=1023
    pub fn slot_number(&self) -> u16 {
        self.slot_number
    }

    /// Module number within the slot, 0..=3
    pub fn module_number(&self) -> u8 {
        self.module_number
    }

    /// Whether this participant is the gatekeeper
    pub fn is_gatekeeper(&self) -> bool {
        self.is_gatekeeper
    }
}

/// Unchecked field set; deserialized addresses go through [`DeviceAddress::new`]
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct AddressFields {
    slot_number: u16,
    module_number: u8,
    is_gatekeeper: bool,
}

#[cfg(feature = "serde")]
impl TryFrom<AddressFields> for DeviceAddress {
    type Error = BusError;

    fn try_from(fields: AddressFields) -> Result<Self> {
        DeviceAddress::new(fields.slot_number, fields.module_number, fields.is_gatekeeper)
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sn:{} mn:{} is_gk:{}",
            self.slot_number, self.module_number, self.is_gatekeeper as u8
        )
    }
}

/// The bus master: slot 0, module 1, gatekeeper
pub const MASTER: DeviceAddress = DeviceAddress {
    slot_number: 0,
    module_number: 1,
    is_gatekeeper: true,
};
