//! USB transport layer: trait, production nusb backend, test mock.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::MockTransport;
pub use nusb::{AdapterInfo, NusbTransport};
pub use traits::{TransportError, UsbTransport};
