//! Bus scanning and stub creation
//!
//! Walks the host bus, matches descriptors against the driver table, and
//! turns every recognized newcomer into a claimed, unqueried stub. A
//! device that fails setup is logged and skipped; the scan keeps going.

use tracing::{debug, info, trace, warn};

use crate::bus::{HostBus, TransportError};
use crate::device::{DeviceHandle, ProbeRange, device_path};
use crate::driver::WireDriver;

/// Scan the bus and prepend a stub for every recognized device not yet in
/// `handles`. Returns how many stubs were added.
pub(crate) fn scan_bus(
    bus: &dyn HostBus,
    handles: &mut Vec<DeviceHandle>,
    probe: ProbeRange,
) -> Result<usize, TransportError> {
    let devices = bus.devices()?;
    let mut added = 0;

    for device in devices {
        let signature = match device.signature() {
            Ok(signature) => signature,
            Err(err) => {
                warn!("could not read device descriptor: {}", err);
                continue;
            }
        };

        let Some(driver) = WireDriver::for_signature(signature) else {
            trace!("no driver for device {}", signature);
            continue;
        };

        let path = device_path(device.bus_number(), device.address());
        if handles.iter().any(|handle| handle.path() == path) {
            debug!("device {} already registered", path);
            continue;
        }

        let port = match device.open() {
            Ok(port) => port,
            Err(err) => {
                warn!("could not open device {} ({}): {}", path, driver.name(), err);
                continue;
            }
        };
        if let Err(err) = port.set_configuration(driver.configuration()) {
            warn!("could not set configuration on {}: {}", path, err);
            continue;
        }
        if let Err(err) = port.claim_interface(driver.interface()) {
            warn!("could not claim interface on {}: {}", path, err);
            continue;
        }

        info!("registered device {} ({} via {})", path, signature, driver.name());
        handles.insert(
            0,
            DeviceHandle::stub(
                signature,
                device.bus_number(),
                device.address(),
                driver,
                port,
                probe,
            ),
        );
        added += 1;
    }

    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{AVR_SIGNATURE, PIC_SIGNATURE};
    use crate::mock::{FirmwareModel, MockBus, MockDevice, MockFaults};

    #[test]
    fn test_scan_prepends_newest_device() {
        let bus = MockBus::new()
            .with_device(MockDevice::new(
                PIC_SIGNATURE,
                1,
                4,
                FirmwareModel::power_controller(1),
            ))
            .with_device(MockDevice::new(
                AVR_SIGNATURE,
                1,
                5,
                FirmwareModel::i2c_bridge(2),
            ));

        let mut handles = Vec::new();
        let added = scan_bus(&bus, &mut handles, ProbeRange::default()).unwrap();
        assert_eq!(added, 2);

        // Enumeration order reversed: the later device sits in front.
        assert_eq!(handles[0].path(), "usb:1:5");
        assert_eq!(handles[1].path(), "usb:1:4");
        assert_eq!(handles[0].driver(), WireDriver::AvrControl);
        assert_eq!(handles[1].driver(), WireDriver::PicBulk);
    }

    #[test]
    fn test_rescan_skips_known_paths() {
        let bus = MockBus::new().with_device(MockDevice::new(
            PIC_SIGNATURE,
            1,
            4,
            FirmwareModel::power_controller(1),
        ));

        let mut handles = Vec::new();
        assert_eq!(scan_bus(&bus, &mut handles, ProbeRange::default()).unwrap(), 1);
        assert_eq!(scan_bus(&bus, &mut handles, ProbeRange::default()).unwrap(), 0);
        assert_eq!(handles.len(), 1);
    }

    #[test]
    fn test_unrecognized_devices_are_ignored() {
        let stranger = crate::bus::DeviceSignature {
            vendor_id: 0x1d6b,
            product_id: 0x0002,
        };
        let bus = MockBus::new().with_device(MockDevice::new(
            stranger,
            1,
            1,
            FirmwareModel::power_controller(1),
        ));

        let mut handles = Vec::new();
        assert_eq!(scan_bus(&bus, &mut handles, ProbeRange::default()).unwrap(), 0);
        assert!(handles.is_empty());
    }

    #[test]
    fn test_claim_failure_skips_device_but_not_scan() {
        let bus = MockBus::new()
            .with_device(
                MockDevice::new(PIC_SIGNATURE, 1, 4, FirmwareModel::power_controller(1))
                    .with_faults(MockFaults {
                        fail_claim: true,
                        ..MockFaults::default()
                    }),
            )
            .with_device(MockDevice::new(
                PIC_SIGNATURE,
                1,
                5,
                FirmwareModel::power_controller(2),
            ));

        let mut handles = Vec::new();
        assert_eq!(scan_bus(&bus, &mut handles, ProbeRange::default()).unwrap(), 1);
        assert_eq!(handles[0].path(), "usb:1:5");
    }

    #[test]
    fn test_open_failure_skips_device() {
        let bus = MockBus::new().with_device(
            MockDevice::new(PIC_SIGNATURE, 1, 4, FirmwareModel::power_controller(1)).with_faults(
                MockFaults {
                    fail_open: true,
                    ..MockFaults::default()
                },
            ),
        );

        let mut handles = Vec::new();
        assert_eq!(scan_bus(&bus, &mut handles, ProbeRange::default()).unwrap(), 0);
    }
}
