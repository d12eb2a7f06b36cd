//! CH341 command table and protocol constants.
//!
//! Values recovered from the vendor driver and the various open
//! reimplementations of the chip's USB protocol; the chip has no public
//! datasheet for these.

// ============================================================================
// Device Identification
// ============================================================================

/// WinChipHead (WCH) Vendor ID
pub const CH341_VENDOR_ID: u16 = 0x1A86;

/// CH341A Product ID in EPP/MEM/I2C mode
pub const CH341_PRODUCT_ID: u16 = 0x5512;

/// All supported PIDs for device discovery
pub const SUPPORTED_PIDS: &[u16] = &[CH341_PRODUCT_ID];

// ============================================================================
// Endpoints and Sizes
// ============================================================================

/// Bulk OUT endpoint address (host -> chip command stream)
pub const BULK_OUT_ENDPOINT: u8 = 0x02;

/// Bulk IN endpoint address (chip -> host responses and read data)
pub const BULK_IN_ENDPOINT: u8 = 0x82;

/// One command packet: the chip consumes the stream in 32-byte units and
/// produces at most 32 bytes per response packet.
pub const CH341_PACKET_LENGTH: usize = 32;

/// Payload bytes carried by one write frame. Leaves room in the packet for
/// the stream prefix, the OUT opcode, START/address on the first frame and
/// STOP/END trailers on the last.
pub const MAX_WRITE_PER_FRAME: usize = 24;

/// Data bytes requested by one `IN | len` chunk. The final byte of a read
/// is always fetched by a bare `IN` so the master can NAK it.
pub const MAX_READ_PER_FRAME: usize = 31;

// ============================================================================
// Vendor Control Requests (EP0)
// ============================================================================

/// Read the two-byte chip version
pub const REQ_VENDOR_VERSION: u8 = 0x5F;

/// Read the 6-byte bus/pin status word
pub const REQ_I2C_STATUS: u8 = 0x52;

// ============================================================================
// Bulk Command Streams
// ============================================================================

/// I2C command stream lead-in; sub-opcodes follow until [`I2C_STM_END`]
pub const CMD_I2C_STREAM: u8 = 0xAA;

/// UIO (GPIO) command stream lead-in
pub const CMD_UIO_STREAM: u8 = 0xAB;

// I2C stream sub-opcodes
/// Generate a START (or repeated START) condition
pub const I2C_STM_STA: u8 = 0x74;
/// Generate a STOP condition
pub const I2C_STM_STO: u8 = 0x75;
/// Write bytes; low bits carry the count, bare opcode writes one byte
pub const I2C_STM_OUT: u8 = 0x80;
/// Read bytes; low bits carry the count, bare opcode reads one byte with NAK
pub const I2C_STM_IN: u8 = 0xC0;
/// Configure bus clock; low two bits select the speed tier
pub const I2C_STM_SET: u8 = 0x60;
/// Microsecond delay; low bits carry the count
pub const I2C_STM_US: u8 = 0x40;
/// Millisecond delay; low bits carry the count
pub const I2C_STM_MS: u8 = 0x50;
/// Terminate the command packet
pub const I2C_STM_END: u8 = 0x00;

// UIO stream sub-opcodes
/// Sample the input pins; chip answers with one level byte
pub const UIO_STM_IN: u8 = 0x00;
/// Set pin directions; low six bits, 1 = output
pub const UIO_STM_DIR: u8 = 0x40;
/// Drive output pins; low six bits carry the levels
pub const UIO_STM_OUT: u8 = 0x80;
/// Terminate the UIO packet
pub const UIO_STM_END: u8 = 0x20;

/// In an ack-status byte, bit 7 set means the addressed device did not ack
pub const ACK_STATUS_NAK: u8 = 0x80;

// ============================================================================
// GPIO Pins
// ============================================================================

/// Readable data pins D0..D7
pub const GPIO_PIN_COUNT: u8 = 8;

/// Only D0..D5 can be driven through the UIO stream
pub const GPIO_OUTPUT_PIN_COUNT: u8 = 6;

/// Direction/output mask covering the drivable pins
pub const GPIO_OUTPUT_MASK: u8 = 0x3F;
