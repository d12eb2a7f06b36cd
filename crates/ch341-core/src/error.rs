//! Driver-level error type.

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// USB-layer failure (open, claim, transfer, timeout).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed or short response from the chip.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The addressed device did not acknowledge. Not retried here: blind
    /// retries can corrupt stateful targets mid-write, so retry policy
    /// belongs to the caller.
    #[error("No ack from I2C device at {address:#04X}")]
    I2cNack { address: u8 },

    /// The transaction timed out mid-flight. The chip may be left
    /// mid-command; treat the handle as suspect and reopen.
    #[error("I2C transaction timed out")]
    I2cTimeout,

    #[error("Pin index {pin} out of range (max {max})")]
    InvalidPinIndex { pin: u8, max: u8 },

    /// Operation on a handle after `close()`.
    #[error("Device handle is closed")]
    Closed,

    #[error("Config error: {0}")]
    Config(String),
}
