//! Host-controller access
//!
//! Narrow seam over the USB host stack: bus enumeration plus the transfer
//! primitives one open session offers. The production backend wraps rusb;
//! tests substitute the scripted bus from [`crate::mock`]. Everything above
//! this module talks to the traits only.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusb::UsbContext;
use thiserror::Error;

/// Vendor/product pair identifying a device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSignature {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for DeviceSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Transport-level errors, mapped from the underlying host stack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transfer timed out
    #[error("transfer timed out")]
    Timeout,

    /// The endpoint stalled
    #[error("endpoint stalled")]
    Pipe,

    /// The device has been disconnected
    #[error("device has been disconnected")]
    NoDevice,

    /// Entity not found
    #[error("entity not found")]
    NotFound,

    /// The resource is busy
    #[error("resource busy")]
    Busy,

    /// The device answered with more data than the host asked for
    #[error("device returned more data than requested")]
    Overflow,

    /// Low-level I/O error
    #[error("I/O error")]
    Io,

    /// A parameter was rejected by the host stack
    #[error("invalid parameter")]
    InvalidParam,

    /// Insufficient permissions to reach the device
    #[error("access denied")]
    Access,

    /// Any other host-stack error
    #[error("transport error: {message}")]
    Other { message: String },
}

impl From<rusb::Error> for TransportError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => TransportError::Timeout,
            rusb::Error::Pipe => TransportError::Pipe,
            rusb::Error::NoDevice => TransportError::NoDevice,
            rusb::Error::NotFound => TransportError::NotFound,
            rusb::Error::Busy => TransportError::Busy,
            rusb::Error::Overflow => TransportError::Overflow,
            rusb::Error::Io => TransportError::Io,
            rusb::Error::InvalidParam => TransportError::InvalidParam,
            rusb::Error::Access => TransportError::Access,
            _ => TransportError::Other {
                message: err.to_string(),
            },
        }
    }
}

/// Entry point for bus enumeration.
pub trait HostBus: Send {
    /// Snapshot of every device currently on the bus.
    fn devices(&self) -> Result<Vec<Box<dyn BusDevice>>, TransportError>;
}

/// One openable device as seen during enumeration.
pub trait BusDevice {
    /// Vendor/product signature from the device descriptor.
    fn signature(&self) -> Result<DeviceSignature, TransportError>;

    /// Bus the device sits on.
    fn bus_number(&self) -> u8;

    /// Address assigned by the host controller.
    fn address(&self) -> u8;

    /// Open a session. The port is shared with the notification poller,
    /// so it comes back reference-counted.
    fn open(&self) -> Result<Arc<dyn DevicePort>, TransportError>;
}

/// Transfer primitives of one open session.
///
/// All methods block the calling thread. A port must tolerate concurrent
/// use from the caller's thread and the poller thread.
pub trait DevicePort: Send + Sync {
    fn set_configuration(&self, config: u8) -> Result<(), TransportError>;
    fn claim_interface(&self, interface: u8) -> Result<(), TransportError>;
    fn release_interface(&self, interface: u8) -> Result<(), TransportError>;
    fn reset(&self) -> Result<(), TransportError>;

    fn write_bulk(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;
}

/// Production host bus backed by libusb via rusb.
pub struct UsbHostBus {
    context: rusb::Context,
}

impl UsbHostBus {
    /// Initialize a libusb context.
    pub fn new() -> Result<Self, TransportError> {
        let context = rusb::Context::new()?;
        Ok(Self { context })
    }
}

impl HostBus for UsbHostBus {
    fn devices(&self) -> Result<Vec<Box<dyn BusDevice>>, TransportError> {
        let list = self.context.devices()?;
        Ok(list
            .iter()
            .map(|device| Box::new(RusbDevice { device }) as Box<dyn BusDevice>)
            .collect())
    }
}

struct RusbDevice {
    device: rusb::Device<rusb::Context>,
}

impl BusDevice for RusbDevice {
    fn signature(&self) -> Result<DeviceSignature, TransportError> {
        let descriptor = self.device.device_descriptor()?;
        Ok(DeviceSignature {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
        })
    }

    fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    fn address(&self) -> u8 {
        self.device.address()
    }

    fn open(&self) -> Result<Arc<dyn DevicePort>, TransportError> {
        let handle = self.device.open()?;
        // Not supported on every platform; harmless where it is not.
        let _ = handle.set_auto_detach_kernel_driver(true);
        Ok(Arc::new(RusbPort {
            handle: Mutex::new(handle),
        }))
    }
}

/// rusb needs `&mut` for the control-plane calls, so the handle lives
/// behind a mutex. Contention is bounded by the poller's short read
/// timeout.
struct RusbPort {
    handle: Mutex<rusb::DeviceHandle<rusb::Context>>,
}

impl DevicePort for RusbPort {
    fn set_configuration(&self, config: u8) -> Result<(), TransportError> {
        self.handle.lock().unwrap().set_active_configuration(config)?;
        Ok(())
    }

    fn claim_interface(&self, interface: u8) -> Result<(), TransportError> {
        self.handle.lock().unwrap().claim_interface(interface)?;
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> Result<(), TransportError> {
        self.handle.lock().unwrap().release_interface(interface)?;
        Ok(())
    }

    fn reset(&self) -> Result<(), TransportError> {
        self.handle.lock().unwrap().reset()?;
        Ok(())
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self.handle.lock().unwrap().write_bulk(endpoint, data, timeout)?)
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self.handle.lock().unwrap().read_bulk(endpoint, buf, timeout)?)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self
            .handle
            .lock()
            .unwrap()
            .write_control(request_type, request, value, index, data, timeout)?)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self
            .handle
            .lock()
            .unwrap()
            .read_control(request_type, request, value, index, buf, timeout)?)
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        Ok(self
            .handle
            .lock()
            .unwrap()
            .read_interrupt(endpoint, buf, timeout)?)
    }
}
