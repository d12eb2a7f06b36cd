//! Auxiliary GPIO pin access.
//!
//! Pin levels are sampled through the `0x52` vendor status read and driven
//! through a UIO command stream on the bulk endpoint. Because that stream
//! shares the endpoint with I2C traffic, GPIO writes go through the same
//! per-handle lock as transactions.

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::command;
use crate::protocol::constants::{
    GPIO_OUTPUT_MASK, GPIO_OUTPUT_PIN_COUNT, GPIO_PIN_COUNT, REQ_I2C_STATUS,
};
use crate::protocol::pins::PinSnapshot;
use crate::transport::UsbTransport;

/// Direction/output latch for the drivable pins. The chip cannot report
/// these back, so the device handle keeps the last written state.
#[derive(Debug, Default, Clone, Copy)]
pub struct GpioShadow {
    direction: u8,
    output: u8,
}

pub struct GpioPort<'a, T: UsbTransport> {
    transport: &'a mut T,
    shadow: &'a mut GpioShadow,
}

impl<'a, T: UsbTransport> GpioPort<'a, T> {
    pub fn new(transport: &'a mut T, shadow: &'a mut GpioShadow) -> Self {
        Self { transport, shadow }
    }

    /// Pin state straight from hardware. Never cached: external circuitry
    /// can change levels at any time.
    pub fn snapshot(&mut self) -> Result<PinSnapshot> {
        let response = self.transport.control_in(REQ_I2C_STATUS, 0, 0, 8)?;
        Ok(PinSnapshot::from_status_bytes(&response)?)
    }

    /// Level of data pin D0..D7, from a fresh snapshot.
    pub fn get_pin(&mut self, pin: u8) -> Result<bool> {
        if pin >= GPIO_PIN_COUNT {
            return Err(Error::InvalidPinIndex {
                pin,
                max: GPIO_PIN_COUNT - 1,
            });
        }
        Ok(self.snapshot()?.data_pin(pin))
    }

    /// Drive one pin, leaving the other latched pins as they are. Only
    /// D0..D5 are output-capable.
    pub fn set_pin(&mut self, pin: u8, level: bool) -> Result<()> {
        if pin >= GPIO_OUTPUT_PIN_COUNT {
            return Err(Error::InvalidPinIndex {
                pin,
                max: GPIO_OUTPUT_PIN_COUNT - 1,
            });
        }
        let mask = 1 << pin;
        let bits = if level { mask } else { 0 };
        self.write_pins(mask, bits)
    }

    /// Drive all pins in `mask` to the levels in `bits`; the masked pins
    /// become outputs, the rest keep their latched state.
    pub fn write_pins(&mut self, mask: u8, bits: u8) -> Result<()> {
        if mask & !GPIO_OUTPUT_MASK != 0 {
            let pin = 7 - (mask & !GPIO_OUTPUT_MASK).leading_zeros() as u8;
            return Err(Error::InvalidPinIndex {
                pin,
                max: GPIO_OUTPUT_PIN_COUNT - 1,
            });
        }
        self.shadow.direction |= mask;
        self.shadow.output = (self.shadow.output & !mask) | (bits & mask);

        let frame = command::gpio_stream_frame(self.shadow.direction, self.shadow.output);
        self.transport.bulk_write(frame.bytes())?;
        debug!(
            direction = %format!("{:06b}", self.shadow.direction),
            output = %format!("{:06b}", self.shadow.output),
            "GPIO latch updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;
    use crate::transport::MockTransport;

    fn status_with_data(data: u8) -> Vec<u8> {
        let word = (u32::from(data)) << 24;
        let mut bytes = word.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0x00, 0x00]);
        bytes
    }

    #[test]
    fn test_set_pin_emits_uio_frame() {
        let mut mock = MockTransport::new();
        let mut shadow = GpioShadow::default();

        GpioPort::new(&mut mock, &mut shadow).set_pin(3, true).unwrap();

        assert_eq!(
            mock.writes(),
            vec![vec![
                CMD_UIO_STREAM,
                UIO_STM_OUT | 0x08,
                UIO_STM_DIR | 0x08,
                UIO_STM_END,
            ]]
        );
    }

    #[test]
    fn test_set_pin_preserves_other_latched_pins() {
        let mut mock = MockTransport::new();
        let mut shadow = GpioShadow::default();
        let mut port = GpioPort::new(&mut mock, &mut shadow);

        port.set_pin(0, true).unwrap();
        port.set_pin(2, true).unwrap();
        port.set_pin(0, false).unwrap();

        let writes = mock.writes();
        assert_eq!(writes[1][1], UIO_STM_OUT | 0x05);
        assert_eq!(writes[2][1], UIO_STM_OUT | 0x04);
        assert_eq!(writes[2][2], UIO_STM_DIR | 0x05);
    }

    #[test]
    fn test_set_then_get_loopback() {
        let mut mock = MockTransport::new();
        let mut shadow = GpioShadow::default();
        // Hardware loopback: the status read reflects the driven level.
        mock.queue_control(&status_with_data(0x02));

        let mut port = GpioPort::new(&mut mock, &mut shadow);
        port.set_pin(1, true).unwrap();
        assert!(port.get_pin(1).unwrap());
    }

    #[test]
    fn test_get_pin_reads_fresh_every_time() {
        let mut mock = MockTransport::new();
        let mut shadow = GpioShadow::default();
        mock.queue_control(&status_with_data(0x10));
        mock.queue_control(&status_with_data(0x00));

        let mut port = GpioPort::new(&mut mock, &mut shadow);
        assert!(port.get_pin(4).unwrap());
        assert!(!port.get_pin(4).unwrap());
    }

    #[test]
    fn test_pin_index_bounds() {
        let mut mock = MockTransport::new();
        let mut shadow = GpioShadow::default();
        let mut port = GpioPort::new(&mut mock, &mut shadow);

        assert!(matches!(
            port.set_pin(6, true),
            Err(Error::InvalidPinIndex { pin: 6, max: 5 })
        ));
        assert!(matches!(
            port.get_pin(8),
            Err(Error::InvalidPinIndex { pin: 8, max: 7 })
        ));
        assert!(matches!(
            port.write_pins(0x40, 0x40),
            Err(Error::InvalidPinIndex { pin: 6, max: 5 })
        ));
    }
}
