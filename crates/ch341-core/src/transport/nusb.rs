//! nusb-based USB transport implementation.

use std::fmt;
use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Endpoint, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{TransportError, UsbTransport};
use crate::protocol::constants::{CH341_VENDOR_ID, SUPPORTED_PIDS};

/// Default bulk/control transfer timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Information about a connected adapter, for enumeration.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CH341 {:04X}:{:04X} at bus {} address {}",
            self.vendor_id, self.product_id, self.bus, self.address
        )
    }
}

/// nusb-based USB transport.
pub struct NusbTransport {
    interface: Interface,
    out_ep: Endpoint<Bulk, Out>,
    in_ep: Endpoint<Bulk, In>,
    timeout: Duration,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Open the first matching adapter.
    #[instrument(level = "info")]
    pub fn open() -> Result<Self, TransportError> {
        Self::open_nth(0)
    }

    /// Open the nth matching adapter (0-indexed), for hosts with several
    /// plugged in at once.
    #[instrument(level = "info")]
    pub fn open_nth(index: usize) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .filter(|d| {
                d.vendor_id() == CH341_VENDOR_ID && SUPPORTED_PIDS.contains(&d.product_id())
            })
            .nth(index)
            .ok_or(TransportError::DeviceNotFound {
                vid: CH341_VENDOR_ID,
                pid: 0,
            })?;

        Self::open_device_info(device_info)
    }

    /// Open a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn open_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        Self::open_device_info(device_info)
    }

    /// List all connected matching adapters.
    pub fn list() -> Result<Vec<AdapterInfo>, TransportError> {
        let adapters = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .filter(|d| {
                d.vendor_id() == CH341_VENDOR_ID && SUPPORTED_PIDS.contains(&d.product_id())
            })
            .map(|d| AdapterInfo {
                bus: d.busnum(),
                address: d.device_address(),
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
            })
            .collect();
        Ok(adapters)
    }

    fn open_device_info(device_info: nusb::DeviceInfo) -> Result<Self, TransportError> {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();

        info!(
            vendor_id = %format!("{:04X}", vid),
            product_id = %format!("{:04X}", pid),
            bus = device_info.busnum(),
            address = device_info.device_address(),
            "Found adapter"
        );

        let device = device_info.open().wait().map_err(|e| open_error(e.to_string()))?;

        // Exclusive claim: a second open of the same physical device fails
        // here with the OS busy error.
        let interface =
            device
                .claim_interface(0)
                .wait()
                .map_err(|e| TransportError::ClaimInterfaceFailed {
                    interface: 0,
                    message: e.to_string(),
                })?;

        // Find the bulk endpoint pair from the descriptors.
        let mut in_addr: u8 = 0;
        let mut out_addr: u8 = 0;

        for config in device.configurations() {
            for iface in config.interfaces() {
                if iface.interface_number() == 0 {
                    for alt in iface.alt_settings() {
                        for ep in alt.endpoints() {
                            if ep.transfer_type() == nusb::descriptors::TransferType::Bulk {
                                if ep.direction() == nusb::transfer::Direction::In {
                                    in_addr = ep.address();
                                } else {
                                    out_addr = ep.address();
                                }
                            }
                        }
                    }
                }
            }
        }

        if in_addr == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "In".into(),
            });
        }
        if out_addr == 0 {
            return Err(TransportError::EndpointNotFound {
                ep_type: "Bulk".into(),
                direction: "Out".into(),
            });
        }

        let out_ep = interface.endpoint::<Bulk, Out>(out_addr).map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: 0,
                message: e.to_string(),
            }
        })?;
        let in_ep = interface.endpoint::<Bulk, In>(in_addr).map_err(|e| {
            TransportError::ClaimInterfaceFailed {
                interface: 0,
                message: e.to_string(),
            }
        })?;

        info!(
            in_ep = %format!("0x{:02X}", in_addr),
            out_ep = %format!("0x{:02X}", out_addr),
            "Adapter opened"
        );

        Ok(Self {
            interface,
            out_ep,
            in_ep,
            timeout: DEFAULT_TIMEOUT,
            vid,
            pid,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn vendor_id(&self) -> u16 {
        self.vid
    }

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    fn timeout_error(&self) -> TransportError {
        TransportError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    /// Cancel and reap anything still in flight on both endpoints, so a
    /// later transfer does not receive a stale completion.
    fn drain_pending(&mut self) {
        self.out_ep.cancel_all();
        while self.out_ep.pending() > 0 {
            if self
                .out_ep
                .wait_next_complete(Duration::from_secs(1))
                .is_none()
            {
                break;
            }
        }
        self.in_ep.cancel_all();
        while self.in_ep.pending() > 0 {
            if self
                .in_ep
                .wait_next_complete(Duration::from_secs(1))
                .is_none()
            {
                break;
            }
        }
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn bulk_write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.out_ep.submit(Buffer::from(data.to_vec()));

        let Some(completion) = self.out_ep.wait_next_complete(self.timeout) else {
            self.drain_pending();
            return Err(self.timeout_error());
        };
        completion
            .status
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        debug!(bytes_written = completion.actual_len, "Write complete");
        Ok(completion.actual_len)
    }

    #[instrument(skip(self))]
    fn bulk_read(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        // IN requests must be a multiple of the endpoint max packet size.
        let max_packet = self.in_ep.max_packet_size();
        let request = len.max(1).div_ceil(max_packet) * max_packet;
        self.in_ep.submit(Buffer::new(request));

        let Some(completion) = self.in_ep.wait_next_complete(self.timeout) else {
            self.drain_pending();
            return Err(self.timeout_error());
        };
        completion
            .status
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut data = completion.buffer.into_vec();
        data.truncate(completion.actual_len);
        debug!(bytes_read = data.len(), "Read complete");
        Ok(data)
    }

    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        self.interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    length,
                },
                self.timeout,
            )
            .wait()
            .map_err(|e| TransportError::ReadFailed(e.to_string()))
    }

    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data,
                },
                self.timeout,
            )
            .wait()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

fn open_error(message: String) -> TransportError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("access") {
        TransportError::PermissionDenied(message)
    } else {
        TransportError::OpenFailed(message)
    }
}
