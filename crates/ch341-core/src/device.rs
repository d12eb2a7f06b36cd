//! Device handle: one physical adapter behind one object.
//!
//! Composes transport, I2C session and GPIO port, owns the open/close
//! lifecycle and enforces the one-transaction-at-a-time invariant with an
//! internal mutex, so a handle shared across threads can never interleave
//! the frames of two transactions.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{info, instrument};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::gpio::{GpioPort, GpioShadow};
use crate::protocol::ProtocolError;
use crate::protocol::command::{I2cAddress, I2cSpeed};
use crate::protocol::constants::{CH341_PRODUCT_ID, CH341_VENDOR_ID, REQ_VENDOR_VERSION};
use crate::protocol::pins::PinSnapshot;
use crate::session::I2cSession;
use crate::transport::{AdapterInfo, NusbTransport, UsbTransport};

/// First and last address probed by [`Ch341Device::scan`]; the ends of the
/// 7-bit range are reserved addresses.
const SCAN_FIRST: u8 = 0x08;
const SCAN_LAST: u8 = 0x77;

struct DeviceState<T: UsbTransport> {
    transport: T,
    gpio: GpioShadow,
    speed: I2cSpeed,
}

/// Handle to one opened adapter.
pub struct Ch341Device<T: UsbTransport = NusbTransport> {
    inner: Mutex<Option<DeviceState<T>>>,
}

impl Ch341Device<NusbTransport> {
    /// Open the first adapter with default configuration.
    pub fn open() -> Result<Self> {
        Self::open_with_config(&DeviceConfig::default())
    }

    /// Open the nth adapter (0-indexed).
    pub fn open_nth(index: usize) -> Result<Self> {
        let config = DeviceConfig {
            index,
            ..DeviceConfig::default()
        };
        Self::open_with_config(&config)
    }

    /// Open an adapter per the given configuration: claims the USB
    /// interface, logs the chip version and sets the bus clock.
    #[instrument(level = "info", skip(config))]
    pub fn open_with_config(config: &DeviceConfig) -> Result<Self> {
        let mut transport = if config.vendor_id == CH341_VENDOR_ID
            && config.product_id == CH341_PRODUCT_ID
        {
            NusbTransport::open_nth(config.index)?
        } else {
            NusbTransport::open_with_ids(config.vendor_id, config.product_id)?
        };
        transport.set_timeout(Duration::from_millis(config.timeout_ms));

        let device = Self::with_transport(transport);
        device.init(config.speed)?;
        Ok(device)
    }

    /// List all connected adapters without opening them.
    pub fn list_devices() -> Result<Vec<AdapterInfo>> {
        Ok(NusbTransport::list()?)
    }
}

impl<T: UsbTransport> Ch341Device<T> {
    /// Wrap an already-open transport.
    ///
    /// Used by tests and alternative backends. The transport is taken as
    /// configured; exclusivity over the underlying device is the caller's
    /// responsibility.
    pub fn with_transport(transport: T) -> Self {
        Self {
            inner: Mutex::new(Some(DeviceState {
                transport,
                gpio: GpioShadow::default(),
                speed: I2cSpeed::default(),
            })),
        }
    }

    fn init(&self, speed: I2cSpeed) -> Result<()> {
        let version = self.chip_version()?;
        info!(version = %format!("{}.{}", version.0, version.1), "Chip version");
        self.set_speed(speed)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut DeviceState<T>) -> Result<R>) -> Result<R> {
        let mut guard = self.inner.lock().unwrap();
        let state = guard.as_mut().ok_or(Error::Closed)?;
        f(state)
    }

    /// Two-byte chip version, via vendor control read.
    pub fn chip_version(&self) -> Result<(u8, u8)> {
        self.with_state(|state| {
            let response = state.transport.control_in(REQ_VENDOR_VERSION, 0, 0, 2)?;
            if response.len() < 2 {
                return Err(ProtocolError::ShortResponse {
                    expected: 2,
                    actual: response.len(),
                }
                .into());
            }
            Ok((response[0], response[1]))
        })
    }

    /// Select the bus clock for subsequent transactions.
    pub fn set_speed(&self, speed: I2cSpeed) -> Result<()> {
        self.with_state(|state| {
            I2cSession::new(&mut state.transport).set_speed(speed)?;
            state.speed = speed;
            Ok(())
        })
    }

    /// Currently configured bus clock.
    pub fn speed(&self) -> Result<I2cSpeed> {
        self.with_state(|state| Ok(state.speed))
    }

    /// Write `data` to the device at `address`.
    pub fn i2c_write(&self, address: u8, data: &[u8]) -> Result<()> {
        let address = I2cAddress::new(address)?;
        self.with_state(|state| I2cSession::new(&mut state.transport).write(address, data))
    }

    /// Read `buf.len()` bytes from the device at `address`.
    pub fn i2c_read(&self, address: u8, buf: &mut [u8]) -> Result<()> {
        let address = I2cAddress::new(address)?;
        self.with_state(|state| I2cSession::new(&mut state.transport).read(address, buf))
    }

    /// Write then read in one transaction (repeated START). The usual way
    /// to fetch a register: write the register pointer, read the value.
    pub fn i2c_write_read(&self, address: u8, data: &[u8], buf: &mut [u8]) -> Result<()> {
        let address = I2cAddress::new(address)?;
        self.with_state(|state| {
            I2cSession::new(&mut state.transport).write_read(address, data, buf)
        })
    }

    /// Whether anything acks `address`.
    pub fn probe(&self, address: u8) -> Result<bool> {
        let address = I2cAddress::new(address)?;
        self.with_state(|state| I2cSession::new(&mut state.transport).probe(address))
    }

    /// Probe the non-reserved 7-bit range and return the addresses that
    /// acked. Holds the handle for the whole sweep.
    pub fn scan(&self) -> Result<Vec<u8>> {
        self.with_state(|state| {
            let mut session = I2cSession::new(&mut state.transport);
            let mut found = Vec::new();
            for address in SCAN_FIRST..=SCAN_LAST {
                if session.probe(I2cAddress::new(address)?)? {
                    found.push(address);
                }
            }
            Ok(found)
        })
    }

    /// Fresh pin snapshot from hardware.
    pub fn gpio_snapshot(&self) -> Result<PinSnapshot> {
        self.with_state(|state| GpioPort::new(&mut state.transport, &mut state.gpio).snapshot())
    }

    /// Level of data pin D0..D7.
    pub fn gpio_get(&self, pin: u8) -> Result<bool> {
        self.with_state(|state| GpioPort::new(&mut state.transport, &mut state.gpio).get_pin(pin))
    }

    /// Drive one of the output-capable pins D0..D5.
    pub fn gpio_set(&self, pin: u8, level: bool) -> Result<()> {
        self.with_state(|state| {
            GpioPort::new(&mut state.transport, &mut state.gpio).set_pin(pin, level)
        })
    }

    /// Drive several pins at once.
    pub fn gpio_write_pins(&self, mask: u8, bits: u8) -> Result<()> {
        self.with_state(|state| {
            GpioPort::new(&mut state.transport, &mut state.gpio).write_pins(mask, bits)
        })
    }

    /// Release the adapter. Idempotent; later operations fail with
    /// [`Error::Closed`]. Dropping the handle has the same effect.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.take().is_some() {
            info!("Device closed");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn test_close_is_idempotent_and_blocks_operations() {
        let device = Ch341Device::with_transport(MockTransport::new());
        assert!(device.is_open());

        device.close().unwrap();
        device.close().unwrap();
        assert!(!device.is_open());
        assert!(matches!(
            device.i2c_write(0x50, &[0x00]),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_timeout_leaves_handle_closable() {
        let mock = MockTransport::new();
        let device = Ch341Device::with_transport(mock);

        // No queued responses: the ack read times out mid-transaction.
        assert!(matches!(
            device.i2c_write(0x50, &[0x01]),
            Err(Error::I2cTimeout)
        ));
        device.close().unwrap();
    }

    #[test]
    fn test_invalid_address_rejected_before_io() {
        let mock = MockTransport::new();
        let device = Ch341Device::with_transport(mock.clone());

        assert!(device.i2c_write(0x80, &[0x00]).is_err());
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_chip_version() {
        let mock = MockTransport::new();
        mock.queue_control(&[0x30, 0x26]);
        let device = Ch341Device::with_transport(mock);
        assert_eq!(device.chip_version().unwrap(), (0x30, 0x26));
    }

    #[test]
    fn test_gpio_set_then_get() {
        let mock = MockTransport::new();
        let device = Ch341Device::with_transport(mock.clone());

        device.gpio_set(2, true).unwrap();
        // Loopback: hardware reports the driven level back.
        let word: u32 = 0x04 << 24;
        let mut status = word.to_be_bytes().to_vec();
        status.extend_from_slice(&[0x00, 0x00]);
        mock.queue_control(&status);

        assert!(device.gpio_get(2).unwrap());
    }

    #[test]
    fn test_scan_reports_acked_addresses() {
        let mock = MockTransport::new();
        for address in SCAN_FIRST..=SCAN_LAST {
            let status = if address == 0x50 || address == 0x68 {
                0x00
            } else {
                0x80
            };
            mock.queue_ack(status);
        }
        let device = Ch341Device::with_transport(mock);
        assert_eq!(device.scan().unwrap(), vec![0x50, 0x68]);
    }

    #[test]
    fn test_concurrent_transactions_do_not_interleave() {
        let mock = MockTransport::new();
        // Two 60-byte writes, three frames each; every frame wants an ack.
        for _ in 0..6 {
            mock.queue_ack(0x00);
        }
        let device = Arc::new(Ch341Device::with_transport(mock.clone()));

        let handles: Vec<_> = [0xA1u8, 0xB2]
            .into_iter()
            .map(|marker| {
                let device = Arc::clone(&device);
                std::thread::spawn(move || {
                    device.i2c_write(0x50, &[marker; 60]).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let markers: Vec<u8> = mock
            .writes()
            .iter()
            .map(|frame| {
                if frame.contains(&0xA1) {
                    b'A'
                } else {
                    assert!(frame.contains(&0xB2));
                    b'B'
                }
            })
            .collect();
        assert_eq!(markers.len(), 6);
        // All frames of one transaction are contiguous: exactly one switch.
        let switches = markers.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1);
    }
}
