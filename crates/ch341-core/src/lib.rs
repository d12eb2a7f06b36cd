//! ch341-core: host-side driver for the CH341 USB bridge in I2C mode.
//!
//! Drives the chip's proprietary command protocol over USB bulk and vendor
//! control transfers: I2C bus-master transactions plus access to the
//! auxiliary GPIO pins.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: command table constants, frame codec, pin status decode
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Session**: I2C transaction sequencing over a transport
//! - **Gpio**: auxiliary pin access
//! - **Device**: handle composing the above, open/close lifecycle,
//!   transaction serialization
//!
//! # Example
//!
//! ```no_run
//! use ch341_core::Ch341Device;
//!
//! let device = Ch341Device::open()?;
//! let mut id = [0u8; 1];
//! device.i2c_write_read(0x68, &[0x75], &mut id)?;
//! println!("WHO_AM_I: 0x{:02X}", id[0]);
//! # Ok::<(), ch341_core::Error>(())
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod gpio;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::DeviceConfig;
pub use device::Ch341Device;
pub use error::{Error, Result};
pub use protocol::{I2cAddress, I2cSpeed, PinSnapshot, ProtocolError};
pub use session::I2cSession;
pub use transport::{AdapterInfo, MockTransport, NusbTransport, TransportError, UsbTransport};
