//! Registry-level discovery and lifecycle tests against the scripted bus.

use benchusb::mock::{FirmwareModel, MockBus, MockDevice, MockFaults};
use benchusb::{DeviceRegistry, DeviceSignature, WireDriver, device_path};

fn pic(bus: u8, address: u8, model: FirmwareModel) -> MockDevice {
    MockDevice::new(benchusb::driver::PIC_SIGNATURE, bus, address, model)
}

fn avr(bus: u8, address: u8, model: FirmwareModel) -> MockDevice {
    MockDevice::new(benchusb::driver::AVR_SIGNATURE, bus, address, model)
}

mod scanning {
    use super::*;

    #[test]
    fn test_scan_registers_both_wire_flavors() {
        let bus = MockBus::new()
            .with_device(pic(1, 4, FirmwareModel::power_controller(1)))
            .with_device(avr(1, 9, FirmwareModel::i2c_bridge(2)));
        let mut registry = DeviceRegistry::new(Box::new(bus));

        assert_eq!(registry.scan().unwrap(), 2);
        assert_eq!(registry.len(), 2);

        let drivers: Vec<WireDriver> = registry.list().map(|handle| handle.driver()).collect();
        assert_eq!(drivers, vec![WireDriver::AvrControl, WireDriver::PicBulk]);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let bus = MockBus::new().with_device(pic(1, 4, FirmwareModel::power_controller(1)));
        let mut registry = DeviceRegistry::new(Box::new(bus));

        assert_eq!(registry.scan().unwrap(), 1);
        assert_eq!(registry.scan().unwrap(), 0);
        assert_eq!(registry.scan().unwrap(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_foreign_hardware_is_left_alone() {
        let hub = DeviceSignature {
            vendor_id: 0x1d6b,
            product_id: 0x0002,
        };
        let bus = MockBus::new()
            .with_device(MockDevice::new(hub, 1, 1, FirmwareModel::power_controller(0)))
            .with_device(pic(1, 4, FirmwareModel::power_controller(1)));
        let mut registry = DeviceRegistry::new(Box::new(bus));

        assert_eq!(registry.scan().unwrap(), 1);
        assert_eq!(registry.list().next().unwrap().path(), "usb:1:4");
    }

    #[test]
    fn test_device_that_refuses_claim_is_skipped() {
        let bus = MockBus::new()
            .with_device(pic(1, 4, FirmwareModel::power_controller(1)).with_faults(MockFaults {
                fail_claim: true,
                ..MockFaults::default()
            }))
            .with_device(pic(1, 5, FirmwareModel::power_controller(2)));
        let mut registry = DeviceRegistry::new(Box::new(bus));

        assert_eq!(registry.scan().unwrap(), 1);
        assert_eq!(registry.list().next().unwrap().path(), "usb:1:5");
    }

    #[test]
    fn test_paths_are_transport_qualified() {
        assert_eq!(device_path(3, 17), "usb:3:17");

        let bus = MockBus::new().with_device(pic(3, 17, FirmwareModel::power_controller(1)));
        let mut registry = DeviceRegistry::new(Box::new(bus));
        registry.scan().unwrap();
        assert!(registry.get("usb:3:17").is_some());
    }
}

mod lifecycle {
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn test_release_resets_device_and_frees_interface() {
        let device = pic(1, 4, FirmwareModel::power_controller(1));
        let activity = device.activity();
        let bus = MockBus::new().with_device(device);
        let mut registry = DeviceRegistry::new(Box::new(bus));
        registry.scan().unwrap();

        registry.release("usb:1:4").unwrap();

        assert_eq!(activity.resets.load(Ordering::SeqCst), 1);
        assert_eq!(activity.releases.load(Ordering::SeqCst), 1);
        assert!(!registry.get("usb:1:4").unwrap().claimed());

        // Releasing an already released device is a no-op.
        registry.release("usb:1:4").unwrap();
        assert_eq!(activity.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reopen_after_release_reclaims_interface() {
        let device = pic(1, 4, FirmwareModel::power_controller(1));
        let activity = device.activity();
        let bus = MockBus::new().with_device(device);
        let mut registry = DeviceRegistry::new(Box::new(bus));
        registry.scan().unwrap();
        registry.release("usb:1:4").unwrap();

        let handle = registry.open(None, None).unwrap().unwrap();
        assert!(handle.claimed());

        // Once at discovery, once at reopen.
        assert_eq!(activity.claims.load(Ordering::SeqCst), 2);
        assert_eq!(activity.configures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shutdown_releases_every_device() {
        let first = pic(1, 4, FirmwareModel::power_controller(1));
        let second = avr(1, 5, FirmwareModel::i2c_bridge(2));
        let first_activity = first.activity();
        let second_activity = second.activity();

        let bus = MockBus::new().with_device(first).with_device(second);
        let mut registry = DeviceRegistry::new(Box::new(bus));
        registry.scan().unwrap();
        registry.shutdown();

        assert_eq!(first_activity.releases.load(Ordering::SeqCst), 1);
        assert_eq!(second_activity.releases.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_shuts_the_registry_down() {
        let device = pic(1, 4, FirmwareModel::power_controller(1));
        let activity = device.activity();
        let bus = MockBus::new().with_device(device);

        {
            let mut registry = DeviceRegistry::new(Box::new(bus));
            registry.scan().unwrap();
        }

        assert_eq!(activity.resets.load(Ordering::SeqCst), 1);
        assert_eq!(activity.releases.load(Ordering::SeqCst), 1);
    }
}
