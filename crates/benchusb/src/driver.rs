//! Wire drivers for the two controller firmwares
//!
//! Every board speaks the same command protocol but moves the bytes
//! differently: PIC firmware over a self-framing bulk pipe, AVR V-USB
//! firmware over a pair of vendor control requests. [`WireDriver`] is the
//! closed set of transports; everything above it stays framing-agnostic
//! and goes through [`WireDriver::exchange`].

use std::time::Duration;

use tracing::trace;

use crate::bus::{DevicePort, DeviceSignature};
use crate::error::{Error, Result};

/// Microchip PICDEM-FS id the PIC firmware enumerates with.
pub const PIC_SIGNATURE: DeviceSignature = DeviceSignature {
    vendor_id: 0x04d8,
    product_id: 0x000c,
};

/// V-USB shared vendor/product id the AVR firmware enumerates with.
pub const AVR_SIGNATURE: DeviceSignature = DeviceSignature {
    vendor_id: 0x16c0,
    product_id: 0x05dc,
};

/// Vendor request loading the device-side command buffer.
pub const AVR_REQ_WRITE_BUFFER: u8 = 0x00;
/// Vendor request draining the device-side response buffer.
pub const AVR_REQ_READ_BUFFER: u8 = 0x01;

const PIC_ENDPOINT_OUT: u8 = 0x01;
const PIC_ENDPOINT_IN: u8 = 0x81;
const PIC_TIMEOUT: Duration = Duration::from_secs(1);

/// V-USB bit-bangs low speed USB in software; give it room.
const AVR_TIMEOUT: Duration = Duration::from_secs(5);

/// One request/response transport, bound to a handle at discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDriver {
    /// Bulk OUT/IN pair against fixed endpoints (PIC firmware).
    PicBulk,
    /// Vendor control write-buffer/read-buffer pair (AVR firmware).
    AvrControl,
}

impl WireDriver {
    /// Every driver, in recognition order. First match wins.
    pub const ALL: [WireDriver; 2] = [WireDriver::PicBulk, WireDriver::AvrControl];

    /// Find the driver claiming a signature, if any.
    pub fn for_signature(signature: DeviceSignature) -> Option<WireDriver> {
        Self::ALL
            .iter()
            .copied()
            .find(|driver| driver.recognizes(signature))
    }

    /// Whether this driver claims devices with the given signature.
    pub fn recognizes(&self, signature: DeviceSignature) -> bool {
        match self {
            WireDriver::PicBulk => signature == PIC_SIGNATURE,
            WireDriver::AvrControl => signature == AVR_SIGNATURE,
        }
    }

    /// Short name used in logs and listings.
    pub fn name(&self) -> &'static str {
        match self {
            WireDriver::PicBulk => "pic-bulk",
            WireDriver::AvrControl => "avr-control",
        }
    }

    /// USB configuration both firmwares enumerate with.
    pub fn configuration(&self) -> u8 {
        1
    }

    /// Interface carrying the command pipe.
    pub fn interface(&self) -> u8 {
        0
    }

    /// Perform one blocking request/response exchange.
    ///
    /// The response must arrive as exactly `response_len` bytes; any other
    /// count fails the call with no partial result. A `response_len` of
    /// zero skips the read leg entirely, which the firmware reset command
    /// depends on.
    pub fn exchange(
        &self,
        port: &dyn DevicePort,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>> {
        trace!("{} -> {:02x?}", self.name(), request);
        let response = match self {
            WireDriver::PicBulk => exchange_bulk(port, request, response_len),
            WireDriver::AvrControl => exchange_control(port, request, response_len),
        }?;
        trace!("{} <- {:02x?}", self.name(), response);
        Ok(response)
    }
}

fn exchange_bulk(port: &dyn DevicePort, request: &[u8], response_len: usize) -> Result<Vec<u8>> {
    let written = port.write_bulk(PIC_ENDPOINT_OUT, request, PIC_TIMEOUT)?;
    if written != request.len() {
        return Err(Error::ShortTransfer {
            expected: request.len(),
            actual: written,
        });
    }

    if response_len == 0 {
        return Ok(Vec::new());
    }

    let mut buffer = vec![0u8; response_len];
    let read = port.read_bulk(PIC_ENDPOINT_IN, &mut buffer, PIC_TIMEOUT)?;
    if read != response_len {
        return Err(Error::ShortTransfer {
            expected: response_len,
            actual: read,
        });
    }
    Ok(buffer)
}

fn exchange_control(port: &dyn DevicePort, request: &[u8], response_len: usize) -> Result<Vec<u8>> {
    let out_type = rusb::request_type(
        rusb::Direction::Out,
        rusb::RequestType::Vendor,
        rusb::Recipient::Device,
    );
    let written = port.write_control(out_type, AVR_REQ_WRITE_BUFFER, 0, 0, request, AVR_TIMEOUT)?;
    if written != request.len() {
        return Err(Error::ShortTransfer {
            expected: request.len(),
            actual: written,
        });
    }

    if response_len == 0 {
        return Ok(Vec::new());
    }

    let in_type = rusb::request_type(
        rusb::Direction::In,
        rusb::RequestType::Vendor,
        rusb::Recipient::Device,
    );
    let mut buffer = vec![0u8; response_len];
    let read = port.read_control(in_type, AVR_REQ_READ_BUFFER, 0, 0, &mut buffer, AVR_TIMEOUT)?;
    if read != response_len {
        return Err(Error::ShortTransfer {
            expected: response_len,
            actual: read,
        });
    }
    Ok(buffer)
}
