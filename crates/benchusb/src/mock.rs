//! Scripted bus for tests
//!
//! [`MockBus`] plays the role of the host stack: a fixed set of fake
//! devices, each backed by a [`FirmwareModel`] that answers command frames
//! the way the reference boards do. Both wire flavors run against the same
//! model, so driver and scenario tests need no hardware. Fault switches
//! cover the setup paths discovery has to survive.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use protocol::{
    CMD_I2C_READ, CMD_I2C_WRITE, CMD_READ_BOARD_TYPE, CMD_READ_EEPROM, CMD_READ_POWER_INFO,
    CMD_READ_VERSION, CMD_RESET, CMD_SET_POWER_STATE, CMD_WRITE_EEPROM, COMPANION_MAGIC,
};

use crate::bus::{BusDevice, DevicePort, DeviceSignature, HostBus, TransportError};
use crate::driver::{AVR_REQ_READ_BUFFER, AVR_REQ_WRITE_BUFFER};

/// Behavior script for one fake board.
#[derive(Debug, Clone)]
pub struct FirmwareModel {
    /// Major and minor firmware version.
    pub firmware: (u8, u8),
    pub board_code: u8,
    pub serial: u8,
    pub processor_code: u8,
    pub speed_mhz: u8,
    /// Ratings answered to the power info command: (current, outlets).
    pub power: Option<(u8, u8)>,
    /// Last relay state set through the protocol.
    pub power_state: Option<bool>,
    pub eeprom: Vec<u8>,
    /// Secondary bus: address to register file.
    pub i2c: BTreeMap<u8, Vec<u8>>,
    /// Command codes the model refuses to answer. The write leg succeeds
    /// and the read leg then comes up empty, which the drivers report as
    /// a short transfer.
    pub mute_commands: Vec<u8>,
    /// Command codes the model answers with trailing garbage past the
    /// expected response length. The read leg then overruns the caller's
    /// buffer, which the transport reports as an overflow.
    pub oversize_commands: Vec<u8>,
}

impl FirmwareModel {
    /// Reference power controller: firmware 1.04 on an 18F2550 at 40 MHz,
    /// rated 2 A across 4 outlets.
    pub fn power_controller(serial: u8) -> Self {
        Self {
            firmware: (1, 4),
            board_code: 0x01,
            serial,
            processor_code: 0x01,
            speed_mhz: 40,
            power: Some((2, 4)),
            power_state: None,
            eeprom: vec![0; 256],
            i2c: BTreeMap::new(),
            mute_commands: Vec::new(),
            oversize_commands: Vec::new(),
        }
    }

    /// Reference I2C bridge: firmware 1.04 on an 18F2450 at 24 MHz, no
    /// EEPROM, empty secondary bus.
    pub fn i2c_bridge(serial: u8) -> Self {
        Self {
            firmware: (1, 4),
            board_code: 0x02,
            serial,
            processor_code: 0x00,
            speed_mhz: 24,
            power: None,
            power_state: None,
            eeprom: vec![0; 256],
            i2c: BTreeMap::new(),
            mute_commands: Vec::new(),
            oversize_commands: Vec::new(),
        }
    }

    /// Attach a companion controller answering the magic byte at register
    /// zero and the given kind code at register one.
    pub fn with_companion(mut self, address: u8, kind_code: u8) -> Self {
        self.i2c.insert(address, vec![COMPANION_MAGIC, kind_code]);
        self
    }

    /// Attach a responder that does not speak the companion convention.
    pub fn with_foreign_device(mut self, address: u8, registers: Vec<u8>) -> Self {
        self.i2c.insert(address, registers);
        self
    }

    /// Make the model ignore one command code.
    pub fn with_muted_command(mut self, code: u8) -> Self {
        self.mute_commands.push(code);
        self
    }

    /// Make the model answer one command code with extra trailing bytes.
    pub fn with_oversized_command(mut self, code: u8) -> Self {
        self.oversize_commands.push(code);
        self
    }

    /// Answer one request frame the way the firmware would.
    pub fn handle_request(&mut self, request: &[u8]) -> Vec<u8> {
        let Some(&code) = request.first() else {
            return Vec::new();
        };
        if self.mute_commands.contains(&code) {
            return Vec::new();
        }

        let mut response = match code {
            CMD_READ_VERSION => vec![self.firmware.0, self.firmware.1],
            CMD_READ_BOARD_TYPE => {
                vec![self.board_code, self.serial, self.processor_code, self.speed_mhz]
            }
            CMD_READ_POWER_INFO => match self.power {
                Some((current, outlets)) => vec![current, outlets],
                None => Vec::new(),
            },
            CMD_SET_POWER_STATE => {
                self.power_state = Some(request.get(2) == Some(&1));
                vec![1]
            }
            CMD_READ_EEPROM => {
                let addr = request.get(2).copied().unwrap_or(0) as usize;
                let value = self.eeprom.get(addr).copied().unwrap_or(0);
                vec![value, 0]
            }
            CMD_WRITE_EEPROM => {
                let addr = request.get(2).copied().unwrap_or(0) as usize;
                let value = request.get(3).copied().unwrap_or(0);
                match self.eeprom.get_mut(addr) {
                    Some(slot) => {
                        *slot = value;
                        vec![1, addr as u8, value, 0]
                    }
                    None => vec![0, addr as u8, value, 0],
                }
            }
            CMD_I2C_READ => self.i2c_read_response(request),
            CMD_I2C_WRITE => self.i2c_write_response(request),
            CMD_RESET => Vec::new(),
            _ => Vec::new(),
        };
        if self.oversize_commands.contains(&code) {
            response.extend_from_slice(&[0xee; 4]);
        }
        response
    }

    fn i2c_read_response(&self, request: &[u8]) -> Vec<u8> {
        let device = request.get(2).copied().unwrap_or(0);
        let offset = request.get(3).copied().unwrap_or(0) as usize;
        let len = request.get(4).copied().unwrap_or(0) as usize;

        let mut response = vec![0u8; len + 1];
        match self.i2c.get(&device) {
            Some(registers) => {
                response[0] = 1;
                for (slot, index) in response[1..].iter_mut().zip(offset..) {
                    *slot = registers.get(index).copied().unwrap_or(0);
                }
            }
            None => {
                // Missing ACK fault in the second byte, if there is one.
                if let Some(slot) = response.get_mut(1) {
                    *slot = 0x02;
                }
            }
        }
        response
    }

    fn i2c_write_response(&mut self, request: &[u8]) -> Vec<u8> {
        let device = request.get(2).copied().unwrap_or(0);
        let offset = request.get(3).copied().unwrap_or(0) as usize;
        let data = request.get(4..).unwrap_or(&[]);

        match self.i2c.get_mut(&device) {
            Some(registers) => {
                for (index, &byte) in data.iter().enumerate() {
                    if let Some(slot) = registers.get_mut(offset + index) {
                        *slot = byte;
                    }
                }
                // The firmware echoes the first written byte.
                vec![1, data.first().copied().unwrap_or(0)]
            }
            None => vec![0, 0x01],
        }
    }
}

/// Fault switches for a mock device.
#[derive(Debug, Clone, Default)]
pub struct MockFaults {
    /// Fail `open` during discovery.
    pub fail_open: bool,
    /// Fail `set_configuration`.
    pub fail_configure: bool,
    /// Fail `claim_interface`.
    pub fail_claim: bool,
    /// Report one byte fewer than handed in on every write leg.
    pub truncate_writes: bool,
}

/// Observable side effects of a mock port, shared with the test.
#[derive(Debug, Default)]
pub struct PortActivity {
    pub configures: AtomicUsize,
    pub claims: AtomicUsize,
    pub releases: AtomicUsize,
    pub resets: AtomicUsize,
}

/// One scripted device on the mock bus.
#[derive(Clone)]
pub struct MockDevice {
    signature: DeviceSignature,
    bus_number: u8,
    address: u8,
    firmware: Arc<Mutex<FirmwareModel>>,
    notifications: Arc<Mutex<VecDeque<Vec<u8>>>>,
    activity: Arc<PortActivity>,
    faults: MockFaults,
}

impl MockDevice {
    pub fn new(
        signature: DeviceSignature,
        bus_number: u8,
        address: u8,
        model: FirmwareModel,
    ) -> Self {
        Self {
            signature,
            bus_number,
            address,
            firmware: Arc::new(Mutex::new(model)),
            notifications: Arc::new(Mutex::new(VecDeque::new())),
            activity: Arc::new(PortActivity::default()),
            faults: MockFaults::default(),
        }
    }

    pub fn with_faults(mut self, faults: MockFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Shared handle to the firmware script, for assertions and live
    /// mutation.
    pub fn firmware(&self) -> Arc<Mutex<FirmwareModel>> {
        Arc::clone(&self.firmware)
    }

    /// Shared setup/teardown counters.
    pub fn activity(&self) -> Arc<PortActivity> {
        Arc::clone(&self.activity)
    }

    /// Queue an interrupt notification frame, tag byte first.
    pub fn push_notification(&self, frame: Vec<u8>) {
        self.notifications.lock().unwrap().push_back(frame);
    }
}

impl BusDevice for MockDevice {
    fn signature(&self) -> Result<DeviceSignature, TransportError> {
        Ok(self.signature)
    }

    fn bus_number(&self) -> u8 {
        self.bus_number
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn open(&self) -> Result<Arc<dyn DevicePort>, TransportError> {
        if self.faults.fail_open {
            return Err(TransportError::Access);
        }
        Ok(Arc::new(MockPort {
            firmware: Arc::clone(&self.firmware),
            notifications: Arc::clone(&self.notifications),
            activity: Arc::clone(&self.activity),
            faults: self.faults.clone(),
            pending: Mutex::new(None),
        }))
    }
}

/// The mock host bus: a fixed set of scripted devices.
#[derive(Default)]
pub struct MockBus {
    devices: Vec<MockDevice>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }
}

impl HostBus for MockBus {
    fn devices(&self) -> Result<Vec<Box<dyn BusDevice>>, TransportError> {
        Ok(self
            .devices
            .iter()
            .cloned()
            .map(|device| Box::new(device) as Box<dyn BusDevice>)
            .collect())
    }
}

struct MockPort {
    firmware: Arc<Mutex<FirmwareModel>>,
    notifications: Arc<Mutex<VecDeque<Vec<u8>>>>,
    activity: Arc<PortActivity>,
    faults: MockFaults,
    /// Response produced by the last write leg, waiting for its read.
    pending: Mutex<Option<Vec<u8>>>,
}

impl MockPort {
    fn accept_request(&self, data: &[u8]) -> Result<usize, TransportError> {
        if self.faults.truncate_writes && !data.is_empty() {
            return Ok(data.len() - 1);
        }
        let response = self.firmware.lock().unwrap().handle_request(data);
        *self.pending.lock().unwrap() = Some(response);
        Ok(data.len())
    }

    fn read_pending(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(response) = self.pending.lock().unwrap().take() else {
            return Err(TransportError::Timeout);
        };
        if response.len() > buf.len() {
            return Err(TransportError::Overflow);
        }
        buf[..response.len()].copy_from_slice(&response);
        Ok(response.len())
    }
}

impl DevicePort for MockPort {
    fn set_configuration(&self, _config: u8) -> Result<(), TransportError> {
        if self.faults.fail_configure {
            return Err(TransportError::Io);
        }
        self.activity.configures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn claim_interface(&self, _interface: u8) -> Result<(), TransportError> {
        if self.faults.fail_claim {
            return Err(TransportError::Busy);
        }
        self.activity.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_interface(&self, _interface: u8) -> Result<(), TransportError> {
        self.activity.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&self) -> Result<(), TransportError> {
        self.activity.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_bulk(
        &self,
        _endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.accept_request(data)
    }

    fn read_bulk(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.read_pending(buf)
    }

    fn write_control(
        &self,
        _request_type: u8,
        request: u8,
        _value: u16,
        _index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        if request != AVR_REQ_WRITE_BUFFER {
            return Err(TransportError::Pipe);
        }
        self.accept_request(data)
    }

    fn read_control(
        &self,
        _request_type: u8,
        request: u8,
        _value: u16,
        _index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        if request != AVR_REQ_READ_BUFFER {
            return Err(TransportError::Pipe);
        }
        self.read_pending(buf)
    }

    fn read_interrupt(
        &self,
        _endpoint: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        match self.notifications.lock().unwrap().pop_front() {
            Some(frame) => {
                if frame.len() > buf.len() {
                    return Err(TransportError::Overflow);
                }
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            None => Err(TransportError::Timeout),
        }
    }
}
