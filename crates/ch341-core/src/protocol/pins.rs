//! Bus/pin status word decoding.
//!
//! The `0x52` vendor read returns six bytes: a big-endian 32-bit flag word
//! followed by a 16-bit word of unknown purpose. The flag word carries the
//! parallel-port handshake flags, the I2C bus lines and the D0..D7 pin
//! levels in its top byte.

use std::fmt;
use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use super::command::ProtocolError;

// Flag word bits.
const PIN_ERR: u32 = 0x0000_0100;
const PIN_PEMP: u32 = 0x0000_0200;
const PIN_INT: u32 = 0x0000_0400;
const PIN_SLCT: u32 = 0x0000_0800;
const PIN_WAIT: u32 = 0x0000_2000;
const PIN_DATAS: u32 = 0x0000_4000;
const PIN_ADDRS: u32 = 0x0000_8000;
const PIN_RESET: u32 = 0x0001_0000;
const PIN_WRITE: u32 = 0x0002_0000;
const PIN_SCL: u32 = 0x0040_0000;
const PIN_SDA: u32 = 0x0080_0000;
const PIN_DATA_SHIFT: u32 = 24;

/// Decoded snapshot of the chip's pin state.
///
/// Always read fresh from hardware; external circuitry can change pin
/// levels at any time, so nothing in the driver caches one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinSnapshot {
    bits: u32,
}

impl PinSnapshot {
    /// Minimum response length for the `0x52` vendor read.
    pub const STATUS_LEN: usize = 6;

    pub fn from_status_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < Self::STATUS_LEN {
            return Err(ProtocolError::ShortResponse {
                expected: Self::STATUS_LEN,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let bits = cursor.read_u32::<BigEndian>().map_err(|_| {
            ProtocolError::ShortResponse {
                expected: Self::STATUS_LEN,
                actual: data.len(),
            }
        })?;
        // Trailing u16 is reserved; skipped.
        Ok(Self { bits })
    }

    /// Raw flag word.
    pub fn bits(self) -> u32 {
        self.bits
    }

    /// Level of data pin D0..D7.
    pub fn data_pin(self, index: u8) -> bool {
        debug_assert!(index < 8);
        self.bits & (1 << (PIN_DATA_SHIFT + u32::from(index))) != 0
    }

    /// All eight data pin levels as one byte, D0 in bit 0.
    pub fn data_byte(self) -> u8 {
        (self.bits >> PIN_DATA_SHIFT) as u8
    }

    /// I2C clock line level (read-only).
    pub fn scl(self) -> bool {
        self.bits & PIN_SCL != 0
    }

    /// I2C data line level (read-only).
    pub fn sda(self) -> bool {
        self.bits & PIN_SDA != 0
    }

    /// Names of all asserted flags/pins, for diagnostics.
    pub fn asserted(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        for (bit, name) in [
            (PIN_ERR, "ERR"),
            (PIN_PEMP, "PEMP"),
            (PIN_INT, "INT"),
            (PIN_SLCT, "SLCT"),
            (PIN_WAIT, "WAIT"),
            (PIN_DATAS, "DATAS"),
            (PIN_ADDRS, "ADDRS"),
            (PIN_RESET, "RESET"),
            (PIN_WRITE, "WRITE"),
            (PIN_SCL, "SCL"),
            (PIN_SDA, "SDA"),
        ] {
            if self.bits & bit != 0 {
                names.push(name);
            }
        }
        const DATA_NAMES: [&str; 8] = ["D0", "D1", "D2", "D3", "D4", "D5", "D6", "D7"];
        for (i, name) in DATA_NAMES.iter().enumerate() {
            if self.data_pin(i as u8) {
                names.push(name);
            }
        }
        names
    }
}

impl fmt::Display for PinSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pins[{}]", self.asserted().join(","))
    }
}
