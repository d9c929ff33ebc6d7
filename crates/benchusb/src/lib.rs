//! Host-side control library for a family of bench controller boards
//!
//! The boards expose one command protocol over two different USB
//! transports: PIC firmware speaks a self-framing bulk pipe, AVR V-USB
//! firmware a vendor control-request buffer pair. This crate hides that
//! split behind a single dispatch seam, keeps a registry of attached
//! boards, runs the identification query lazily on first use, and
//! delivers firmware notifications through a shared background poller.
//!
//! # Example
//!
//! ```no_run
//! use benchusb::{DeviceRegistry, UsbHostBus};
//! use protocol::BoardKind;
//!
//! fn main() -> Result<(), benchusb::Error> {
//!     let bus = UsbHostBus::new()?;
//!     let mut registry = DeviceRegistry::new(Box::new(bus));
//!     registry.scan()?;
//!
//!     if let Some(device) = registry.open(Some(BoardKind::Power), None)? {
//!         device.set_power(true)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod device;
mod discovery;
pub mod driver;
pub mod error;
pub mod mock;
pub mod poller;
pub mod registry;

pub use bus::{BusDevice, DevicePort, DeviceSignature, HostBus, TransportError, UsbHostBus};
pub use device::{BoardProfile, DeviceHandle, I2cDevice, ProbeRange, device_path};
pub use driver::WireDriver;
pub use error::{Error, Result};
pub use poller::NotificationCallback;
pub use registry::DeviceRegistry;
