//! I2C transaction sequencing.
//!
//! Turns logical transactions into codec frames and walks them through the
//! transport, validating each response before the next frame goes out.
//! Exclusivity across transactions is the device handle's job; the session
//! assumes it already has the transport to itself.

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::protocol::ProtocolError;
use crate::protocol::command::{self, CommandFrame, I2cAddress, I2cSpeed, ResponseKind};
use crate::transport::{TransportError, UsbTransport};

pub struct I2cSession<'a, T: UsbTransport> {
    transport: &'a mut T,
}

impl<'a, T: UsbTransport> I2cSession<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    /// Select the bus clock.
    pub fn set_speed(&mut self, speed: I2cSpeed) -> Result<()> {
        debug!(%speed, "Configuring bus clock");
        let frame = command::set_speed_frame(speed);
        self.transport
            .bulk_write(frame.bytes())
            .map_err(map_i2c_error)?;
        Ok(())
    }

    /// Address-only transaction; `Ok(true)` if something acked the address.
    pub fn probe(&mut self, address: I2cAddress) -> Result<bool> {
        match self.run_frames(&command::probe_frames(address), address) {
            Ok(_) => Ok(true),
            Err(Error::I2cNack { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, data), fields(%address, len = data.len()))]
    pub fn write(&mut self, address: I2cAddress, data: &[u8]) -> Result<()> {
        self.run_frames(&command::write_frames(address, data), address)?;
        Ok(())
    }

    #[instrument(skip(self, buf), fields(%address, len = buf.len()))]
    pub fn read(&mut self, address: I2cAddress, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let data = self.run_frames(&command::read_frames(address, buf.len()), address)?;
        copy_read_data(&data, buf)
    }

    /// Write then read in one transaction (repeated START between phases).
    #[instrument(skip(self, data, buf), fields(%address, wlen = data.len(), rlen = buf.len()))]
    pub fn write_read(&mut self, address: I2cAddress, data: &[u8], buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return self.write(address, data);
        }
        let frames = command::write_read_frames(address, data, buf.len());
        let read_back = self.run_frames(&frames, address)?;
        copy_read_data(&read_back, buf)
    }

    /// Send each frame and validate its response strictly in order.
    fn run_frames(&mut self, frames: &[CommandFrame], address: I2cAddress) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for frame in frames {
            self.transport
                .bulk_write(frame.bytes())
                .map_err(map_i2c_error)?;
            match frame.response() {
                ResponseKind::None => {}
                ResponseKind::AckStatus => {
                    let response = self.transport.bulk_read(1).map_err(map_i2c_error)?;
                    if !command::decode_ack_status(&response)? {
                        return Err(Error::I2cNack {
                            address: address.value(),
                        });
                    }
                }
                ResponseKind::Data(expected) => {
                    let mut chunk = self.transport.bulk_read(expected).map_err(map_i2c_error)?;
                    if chunk.len() < expected {
                        return Err(ProtocolError::ShortResponse {
                            expected,
                            actual: chunk.len(),
                        }
                        .into());
                    }
                    chunk.truncate(expected);
                    data.extend_from_slice(&chunk);
                }
            }
        }
        Ok(data)
    }
}

fn copy_read_data(data: &[u8], buf: &mut [u8]) -> Result<()> {
    if data.len() < buf.len() {
        return Err(ProtocolError::ShortResponse {
            expected: buf.len(),
            actual: data.len(),
        }
        .into());
    }
    buf.copy_from_slice(&data[..buf.len()]);
    Ok(())
}

/// A transport timeout mid-transaction surfaces as an I2C timeout; other
/// USB failures pass through unchanged.
fn map_i2c_error(e: TransportError) -> Error {
    match e {
        TransportError::Timeout { .. } => Error::I2cTimeout,
        other => Error::Transport(other),
    }
}
