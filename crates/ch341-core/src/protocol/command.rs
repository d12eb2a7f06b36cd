//! Command stream encoding and response decoding.
//!
//! Pure codec: turns logical I2C transactions and GPIO updates into the
//! chip's 32-byte command packets, and interprets the status bytes coming
//! back. No I/O happens here.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I2C address 0x{address:02X} outside the 7-bit range")]
    AddressOutOfRange { address: u8 },

    #[error("Empty response from device")]
    EmptyResponse,

    #[error("Short response: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
}

/// Validated 7-bit I2C target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct I2cAddress(u8);

impl I2cAddress {
    pub fn new(address: u8) -> Result<Self, ProtocolError> {
        if address > 0x7F {
            return Err(ProtocolError::AddressOutOfRange { address });
        }
        Ok(Self(address))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Address byte on the wire for a write transaction.
    pub(crate) fn write_byte(self) -> u8 {
        self.0 << 1
    }

    /// Address byte on the wire for a read transaction.
    pub(crate) fn read_byte(self) -> u8 {
        (self.0 << 1) | 1
    }
}

impl TryFrom<u8> for I2cAddress {
    type Error = ProtocolError;

    fn try_from(address: u8) -> Result<Self, Self::Error> {
        Self::new(address)
    }
}

impl fmt::Display for I2cAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Bus clock tiers supported by the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum I2cSpeed {
    /// 20 kHz
    Low,
    /// 100 kHz
    #[default]
    Standard,
    /// 400 kHz
    Fast,
    /// 750 kHz
    High,
}

impl I2cSpeed {
    /// Two-bit speed code for `I2C_STM_SET`.
    pub(crate) fn bits(self) -> u8 {
        match self {
            I2cSpeed::Low => 0,
            I2cSpeed::Standard => 1,
            I2cSpeed::Fast => 2,
            I2cSpeed::High => 3,
        }
    }

    pub fn khz(self) -> u32 {
        match self {
            I2cSpeed::Low => 20,
            I2cSpeed::Standard => 100,
            I2cSpeed::Fast => 400,
            I2cSpeed::High => 750,
        }
    }

    /// Round a requested frequency down to the nearest supported tier.
    pub fn from_khz(khz: u32) -> Self {
        if khz < 100 {
            I2cSpeed::Low
        } else if khz < 400 {
            I2cSpeed::Standard
        } else if khz < 750 {
            I2cSpeed::Fast
        } else {
            I2cSpeed::High
        }
    }
}

impl fmt::Display for I2cSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kHz", self.khz())
    }
}

/// What the chip sends back after a frame is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Nothing; the frame is fire-and-forget.
    None,
    /// One ack-status byte (bit 7 set = NAK).
    AckStatus,
    /// Exactly this many data bytes.
    Data(usize),
}

/// One encoded command packet.
///
/// Invariant: never longer than [`CH341_PACKET_LENGTH`]; the builders below
/// are the only way to construct one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: Vec<u8>,
    response: ResponseKind,
}

impl CommandFrame {
    fn new(response: ResponseKind) -> Self {
        Self {
            bytes: Vec::with_capacity(CH341_PACKET_LENGTH),
            response,
        }
    }

    fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
        debug_assert!(self.bytes.len() <= CH341_PACKET_LENGTH);
    }

    fn extend(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
        debug_assert!(self.bytes.len() <= CH341_PACKET_LENGTH);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn response(&self) -> ResponseKind {
        self.response
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Frame selecting the bus clock. No response.
pub fn set_speed_frame(speed: I2cSpeed) -> CommandFrame {
    let mut frame = CommandFrame::new(ResponseKind::None);
    frame.push(CMD_I2C_STREAM);
    frame.push(I2C_STM_SET | speed.bits());
    frame.push(I2C_STM_END);
    frame
}

/// Address-only write: START, address byte, STOP. The single status byte
/// tells whether anything acked the address.
pub fn probe_frames(address: I2cAddress) -> Vec<CommandFrame> {
    write_frames(address, &[])
}

/// Full write transaction: START on the first frame, STOP on the last,
/// payload split over [`MAX_WRITE_PER_FRAME`]-byte frames.
pub fn write_frames(address: I2cAddress, data: &[u8]) -> Vec<CommandFrame> {
    write_phase(address, data, true)
}

/// Full read transaction: address phase, then IN chunks with a bare final
/// IN (master NAK) and STOP.
pub fn read_frames(address: I2cAddress, len: usize) -> Vec<CommandFrame> {
    debug_assert!(len > 0, "zero-length read has no frame encoding");
    let mut frames = vec![read_address_frame(address)];
    frames.extend(read_phase(len));
    frames
}

/// Combined write-then-read: write phase without STOP, repeated START,
/// read phase. Used for register reads.
pub fn write_read_frames(address: I2cAddress, data: &[u8], read_len: usize) -> Vec<CommandFrame> {
    debug_assert!(read_len > 0, "zero-length read has no frame encoding");
    let mut frames = write_phase(address, data, false);
    frames.push(read_address_frame(address));
    frames.extend(read_phase(read_len));
    frames
}

/// UIO frame driving output levels and pin directions. The masks only
/// cover D0..D5; higher bits are stripped.
pub fn gpio_stream_frame(dir_mask: u8, out_bits: u8) -> CommandFrame {
    let mut frame = CommandFrame::new(ResponseKind::None);
    frame.push(CMD_UIO_STREAM);
    frame.push(UIO_STM_OUT | (out_bits & GPIO_OUTPUT_MASK));
    frame.push(UIO_STM_DIR | (dir_mask & GPIO_OUTPUT_MASK));
    frame.push(UIO_STM_END);
    frame
}

/// Interpret an ack-status response. `Ok(true)` means the target acked.
pub fn decode_ack_status(response: &[u8]) -> Result<bool, ProtocolError> {
    match response.first() {
        None => Err(ProtocolError::EmptyResponse),
        Some(&status) => Ok(status & ACK_STATUS_NAK == 0),
    }
}

fn write_phase(address: I2cAddress, data: &[u8], send_stop: bool) -> Vec<CommandFrame> {
    let mut frames = Vec::with_capacity(data.len() / MAX_WRITE_PER_FRAME + 1);
    let mut offset = 0;
    let mut first = true;

    loop {
        let take = (data.len() - offset).min(MAX_WRITE_PER_FRAME);
        let last = offset + take == data.len();

        let mut frame = CommandFrame::new(ResponseKind::AckStatus);
        frame.push(CMD_I2C_STREAM);
        if first {
            frame.push(I2C_STM_STA);
        }
        // The address byte rides in the first OUT and counts toward it.
        frame.push(I2C_STM_OUT | (take + usize::from(first)) as u8);
        if first {
            frame.push(address.write_byte());
        }
        frame.extend(&data[offset..offset + take]);
        if last && send_stop {
            frame.push(I2C_STM_STO);
        }
        frame.push(I2C_STM_END);
        frames.push(frame);

        offset += take;
        first = false;
        if last {
            break;
        }
    }

    frames
}

/// Repeated-START address phase of a read.
fn read_address_frame(address: I2cAddress) -> CommandFrame {
    let mut frame = CommandFrame::new(ResponseKind::AckStatus);
    frame.push(CMD_I2C_STREAM);
    frame.push(I2C_STM_STA);
    frame.push(I2C_STM_OUT | 1);
    frame.push(address.read_byte());
    frame.push(I2C_STM_END);
    frame
}

fn read_phase(len: usize) -> Vec<CommandFrame> {
    let mut frames = Vec::new();
    let mut remaining = len;

    while remaining > 1 {
        let take = (remaining - 1).min(MAX_READ_PER_FRAME);
        let mut frame = CommandFrame::new(ResponseKind::Data(take));
        frame.push(CMD_I2C_STREAM);
        frame.push(I2C_STM_IN | take as u8);
        frame.push(I2C_STM_END);
        frames.push(frame);
        remaining -= take;
    }

    // Last byte is read with a bare IN so the master NAKs it, then STOP.
    let mut frame = CommandFrame::new(ResponseKind::Data(1));
    frame.push(CMD_I2C_STREAM);
    frame.push(I2C_STM_IN);
    frame.push(I2C_STM_STO);
    frame.push(I2C_STM_END);
    frames.push(frame);

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: u8 = 0x50;

    fn addr() -> I2cAddress {
        I2cAddress::new(ADDR).unwrap()
    }

    /// Walk write frames and pull the payload bytes back out, checking the
    /// framing opcodes along the way.
    fn extract_write_payload(frames: &[CommandFrame]) -> Vec<u8> {
        let mut payload = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            let bytes = frame.bytes();
            assert_eq!(bytes[0], CMD_I2C_STREAM);
            let mut pos = 1;
            if i == 0 {
                assert_eq!(bytes[pos], I2C_STM_STA);
                pos += 1;
            }
            assert_eq!(bytes[pos] & 0xC0, I2C_STM_OUT);
            let mut count = (bytes[pos] & 0x3F) as usize;
            pos += 1;
            if i == 0 {
                assert_eq!(bytes[pos], ADDR << 1);
                pos += 1;
                count -= 1;
            }
            payload.extend_from_slice(&bytes[pos..pos + count]);
        }
        payload
    }

    #[test]
    fn test_probe_frame_shape() {
        let frames = probe_frames(addr());
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].bytes(),
            &[
                CMD_I2C_STREAM,
                I2C_STM_STA,
                I2C_STM_OUT | 1,
                ADDR << 1,
                I2C_STM_STO,
                I2C_STM_END,
            ]
        );
        assert_eq!(frames[0].response(), ResponseKind::AckStatus);
    }

    #[test]
    fn test_short_write_roundtrip_single_frame() {
        let payload: Vec<u8> = (0..MAX_WRITE_PER_FRAME as u8).collect();
        let frames = write_frames(addr(), &payload);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].len() <= CH341_PACKET_LENGTH);
        assert_eq!(extract_write_payload(&frames), payload);
    }

    #[test]
    fn test_long_write_splits_into_ceil_frames() {
        for len in [25usize, 48, 49, 100, 240] {
            let payload: Vec<u8> = (0..len as u32).map(|b| b as u8).collect();
            let frames = write_frames(addr(), &payload);
            assert_eq!(frames.len(), len.div_ceil(MAX_WRITE_PER_FRAME), "len={len}");
            // START only on the first frame, STOP only on the last; the
            // opcode positions are structural, payload bytes may collide
            // with opcode values.
            for (i, frame) in frames.iter().enumerate() {
                let bytes = frame.bytes();
                assert!(frame.len() <= CH341_PACKET_LENGTH);
                assert_eq!(frame.response(), ResponseKind::AckStatus);
                if i == 0 {
                    assert_eq!(bytes[1], I2C_STM_STA);
                } else {
                    assert_eq!(bytes[1] & 0xC0, I2C_STM_OUT);
                }
                if i == frames.len() - 1 {
                    assert_eq!(&bytes[bytes.len() - 2..], &[I2C_STM_STO, I2C_STM_END]);
                } else {
                    assert_eq!(bytes[bytes.len() - 1], I2C_STM_END);
                }
            }
            assert_eq!(extract_write_payload(&frames), payload);
        }
    }

    #[test]
    fn test_single_byte_read() {
        let frames = read_frames(addr(), 1);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].response(), ResponseKind::AckStatus);
        assert_eq!(frames[0].bytes()[3], (ADDR << 1) | 1);
        assert_eq!(
            frames[1].bytes(),
            &[CMD_I2C_STREAM, I2C_STM_IN, I2C_STM_STO, I2C_STM_END]
        );
        assert_eq!(frames[1].response(), ResponseKind::Data(1));
    }

    #[test]
    fn test_read_chunking_covers_length() {
        for len in [2, 31, 32, 33, 100] {
            let frames = read_frames(addr(), len);
            let data_total: usize = frames
                .iter()
                .map(|f| match f.response() {
                    ResponseKind::Data(n) => n,
                    _ => 0,
                })
                .sum();
            assert_eq!(data_total, len, "len={len}");
            for frame in &frames {
                assert!(frame.len() <= CH341_PACKET_LENGTH);
            }
            // Bare IN + STOP close every read.
            let last = frames.last().unwrap();
            assert_eq!(last.response(), ResponseKind::Data(1));
            assert!(last.bytes().contains(&I2C_STM_STO));
        }
    }

    #[test]
    fn test_write_read_has_repeated_start_and_no_early_stop() {
        let frames = write_read_frames(addr(), &[0x10], 4);
        // Write phase frame must not carry a STOP; the repeated-START
        // address frame follows it.
        assert!(!frames[0].bytes().contains(&I2C_STM_STO));
        assert_eq!(frames[1].bytes()[1], I2C_STM_STA);
        assert_eq!(frames[1].bytes()[3], (ADDR << 1) | 1);
        // Exactly one STOP, on the final frame.
        let stops = frames
            .iter()
            .filter(|f| f.bytes().contains(&I2C_STM_STO))
            .count();
        assert_eq!(stops, 1);
        assert!(frames.last().unwrap().bytes().contains(&I2C_STM_STO));
    }

    #[test]
    fn test_set_speed_frame() {
        let frame = set_speed_frame(I2cSpeed::Fast);
        assert_eq!(
            frame.bytes(),
            &[CMD_I2C_STREAM, I2C_STM_SET | 2, I2C_STM_END]
        );
        assert_eq!(frame.response(), ResponseKind::None);
    }

    #[test]
    fn test_gpio_stream_frame_masks_high_bits() {
        let frame = gpio_stream_frame(0xFF, 0xC7);
        assert_eq!(
            frame.bytes(),
            &[
                CMD_UIO_STREAM,
                UIO_STM_OUT | 0x07,
                UIO_STM_DIR | GPIO_OUTPUT_MASK,
                UIO_STM_END,
            ]
        );
    }

    #[test]
    fn test_decode_ack_status() {
        assert!(decode_ack_status(&[0x00]).unwrap());
        assert!(decode_ack_status(&[0x01]).unwrap());
        assert!(!decode_ack_status(&[0x80]).unwrap());
        assert!(matches!(
            decode_ack_status(&[]),
            Err(ProtocolError::EmptyResponse)
        ));
    }

    #[test]
    fn test_address_validation() {
        assert!(I2cAddress::new(0x7F).is_ok());
        assert!(matches!(
            I2cAddress::new(0x80),
            Err(ProtocolError::AddressOutOfRange { address: 0x80 })
        ));
        let a = I2cAddress::new(0x3C).unwrap();
        assert_eq!(a.write_byte(), 0x78);
        assert_eq!(a.read_byte(), 0x79);
    }

    #[test]
    fn test_speed_rounding() {
        assert_eq!(I2cSpeed::from_khz(20), I2cSpeed::Low);
        assert_eq!(I2cSpeed::from_khz(99), I2cSpeed::Low);
        assert_eq!(I2cSpeed::from_khz(100), I2cSpeed::Standard);
        assert_eq!(I2cSpeed::from_khz(400), I2cSpeed::Fast);
        assert_eq!(I2cSpeed::from_khz(1000), I2cSpeed::High);
    }
}
