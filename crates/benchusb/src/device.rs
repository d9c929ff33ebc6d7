//! Device handles
//!
//! A [`DeviceHandle`] is one discovered board: its bus location, the wire
//! driver bound at discovery, and whatever the identification query has
//! learned so far. The query is lazy. Scanning creates cheap stubs; the
//! first operation that needs board identity runs the query and caches a
//! [`BoardProfile`]. A failed query parks the handle in a failed state
//! where every later operation is refused without touching the wire again.

use std::sync::Arc;

use tracing::{debug, warn};

use protocol::{
    BoardKind, COMPANION_MAGIC, FirmwareVersion, I2C_ADDR_MAX, I2C_ADDR_MIN, I2cDeviceKind,
    PowerInfo, ProcessorKind, commands,
};

use crate::bus::{DevicePort, DeviceSignature};
use crate::driver::WireDriver;
use crate::error::{Error, Result};

/// Registry key: transport-qualified location of a device.
pub fn device_path(bus_number: u8, address: u8) -> String {
    format!("usb:{bus_number}:{address}")
}

/// Inclusive window of addresses probed on the secondary I2C bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeRange {
    pub low: u8,
    pub high: u8,
}

impl Default for ProbeRange {
    fn default() -> Self {
        Self {
            low: I2C_ADDR_MIN,
            high: I2C_ADDR_MAX,
        }
    }
}

/// A responder found on the secondary I2C bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cDevice {
    /// Seven-bit bus address.
    pub address: u8,
    /// Whether the responder answered the companion magic byte.
    pub companion: bool,
    /// Identity of a companion controller; `None` for foreign devices.
    pub kind: Option<I2cDeviceKind>,
}

impl I2cDevice {
    /// Human-readable identity for listings.
    pub fn label(&self) -> &'static str {
        match self.kind {
            Some(kind) => kind.label(),
            None => "foreign device",
        }
    }
}

/// Identity and capabilities captured by a successful query.
#[derive(Debug, Clone)]
pub struct BoardProfile {
    pub firmware: FirmwareVersion,
    pub board: BoardKind,
    pub serial: u8,
    pub processor: ProcessorKind,
    pub speed_mhz: u8,
    pub has_eeprom: bool,
    /// Ratings follow-up; `None` when the board is not a power controller
    /// or the follow-up failed.
    pub power: Option<PowerInfo>,
    /// Probed I2C responders in ascending address order; empty for
    /// non-bridge boards.
    pub i2c_devices: Vec<I2cDevice>,
}

#[derive(Debug, Clone)]
enum QueryState {
    Pending,
    Ready(BoardProfile),
    Failed,
}

/// One discovered board and its session.
pub struct DeviceHandle {
    path: String,
    signature: DeviceSignature,
    bus_number: u8,
    address: u8,
    driver: WireDriver,
    port: Arc<dyn DevicePort>,
    claimed: bool,
    probe: ProbeRange,
    query: QueryState,
}

impl DeviceHandle {
    /// Build an unqueried stub. Discovery claims the interface before
    /// calling this, so the handle starts out claimed.
    pub(crate) fn stub(
        signature: DeviceSignature,
        bus_number: u8,
        address: u8,
        driver: WireDriver,
        port: Arc<dyn DevicePort>,
        probe: ProbeRange,
    ) -> Self {
        Self {
            path: device_path(bus_number, address),
            signature,
            bus_number,
            address,
            driver,
            port,
            claimed: true,
            probe,
            query: QueryState::Pending,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn signature(&self) -> DeviceSignature {
        self.signature
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn driver(&self) -> WireDriver {
        self.driver
    }

    /// Whether the identification query has completed successfully.
    pub fn queried(&self) -> bool {
        matches!(self.query, QueryState::Ready(_))
    }

    /// Whether the identification query failed for good.
    pub fn query_failed(&self) -> bool {
        matches!(self.query, QueryState::Failed)
    }

    /// Cached identity, if the query has run.
    pub fn profile(&self) -> Option<&BoardProfile> {
        match &self.query {
            QueryState::Ready(profile) => Some(profile),
            _ => None,
        }
    }

    /// Whether the command interface is currently claimed.
    pub fn claimed(&self) -> bool {
        self.claimed
    }

    pub(crate) fn port(&self) -> Arc<dyn DevicePort> {
        Arc::clone(&self.port)
    }

    /// Single choke point for command traffic: one framed request, one
    /// framed response, through the bound wire driver.
    pub fn exchange(&self, request: &[u8], response_len: usize) -> Result<Vec<u8>> {
        self.driver.exchange(self.port.as_ref(), request, response_len)
    }

    /// Run the identification query if it has not run yet.
    ///
    /// A failure is sticky: the handle moves to the failed state and every
    /// later call answers [`Error::QueryFailed`] without touching the
    /// device again.
    pub fn ensure_queried(&mut self) -> Result<&BoardProfile> {
        if matches!(self.query, QueryState::Pending) {
            match self.run_query() {
                Ok(profile) => self.query = QueryState::Ready(profile),
                Err(err) => {
                    warn!("identification query failed for {}: {}", self.path, err);
                    self.query = QueryState::Failed;
                }
            }
        }
        match &self.query {
            QueryState::Ready(profile) => Ok(profile),
            _ => Err(Error::QueryFailed),
        }
    }

    /// Forget the cached identity and query again, rebuilding the I2C
    /// device list. Clears a failed state too.
    pub fn refresh(&mut self) -> Result<&BoardProfile> {
        self.query = QueryState::Pending;
        self.ensure_queried()
    }

    fn run_query(&self) -> Result<BoardProfile> {
        let response = self.exchange(&commands::read_version(), commands::VERSION_RESPONSE_LEN)?;
        let firmware = commands::parse_version(&response)?;

        let response =
            self.exchange(&commands::read_board_type(), commands::BOARD_TYPE_RESPONSE_LEN)?;
        let record = commands::parse_board_type(&response)?;

        let mut profile = BoardProfile {
            firmware,
            board: record.board,
            serial: record.serial,
            processor: record.processor,
            speed_mhz: record.speed_mhz,
            has_eeprom: record.processor.has_eeprom(),
            power: None,
            i2c_devices: Vec::new(),
        };

        match record.board {
            BoardKind::Power => {
                // Ratings are informational; their loss does not doom the
                // handle.
                let info = self
                    .exchange(&commands::read_power_info(), commands::POWER_INFO_RESPONSE_LEN);
                match info {
                    Ok(response) => match commands::parse_power_info(&response) {
                        Ok(info) => profile.power = Some(info),
                        Err(err) => {
                            warn!("bad power info response from {}: {}", self.path, err);
                        }
                    },
                    Err(err) => {
                        warn!("power info query failed for {}: {}", self.path, err);
                    }
                }
            }
            BoardKind::I2c => {
                profile.i2c_devices = self.probe_i2c_bus();
            }
            _ => {}
        }

        debug!(
            "queried {}: {} board, serial {}, firmware {}",
            self.path, profile.board, profile.serial, profile.firmware
        );
        Ok(profile)
    }

    /// Walk the probe window from the top down, prepending every find, so
    /// the final list comes out in ascending address order.
    fn probe_i2c_bus(&self) -> Vec<I2cDevice> {
        let mut found = Vec::new();
        for address in (self.probe.low..=self.probe.high).rev() {
            match self.raw_i2c_read(address, 0, 1) {
                Ok(data) if data.first() == Some(&COMPANION_MAGIC) => {
                    let kind = self
                        .raw_i2c_read(address, 1, 1)
                        .ok()
                        .and_then(|data| data.first().copied())
                        .map(I2cDeviceKind::from_code)
                        .unwrap_or(I2cDeviceKind::Unknown);
                    debug!(
                        "companion device ({}) at 0x{:02x} on {}",
                        kind.label(), address, self.path
                    );
                    found.insert(
                        0,
                        I2cDevice {
                            address,
                            companion: true,
                            kind: Some(kind),
                        },
                    );
                }
                Ok(_) => {
                    debug!("foreign I2C device at 0x{:02x} on {}", address, self.path);
                    found.insert(
                        0,
                        I2cDevice {
                            address,
                            companion: false,
                            kind: None,
                        },
                    );
                }
                Err(_) => {
                    // Nothing listening at this address.
                }
            }
        }
        found
    }

    fn raw_i2c_read(&self, device: u8, offset: u8, len: u8) -> Result<Vec<u8>> {
        let request = commands::i2c_read(device, offset, len);
        let response = self.exchange(&request, commands::i2c_read_response_len(len))?;
        let data = commands::parse_i2c_read(&response, len)?;
        Ok(data.to_vec())
    }

    /// Switch the outlet relay. Power controllers only.
    pub fn set_power(&mut self, on: bool) -> Result<()> {
        let board = self.ensure_queried()?.board;
        if board != BoardKind::Power {
            return Err(Error::NotPowerBoard { actual: board });
        }
        self.exchange(&commands::set_power_state(on), commands::POWER_STATE_RESPONSE_LEN)?;
        debug!("power {} on {}", if on { "on" } else { "off" }, self.path);
        Ok(())
    }

    /// Read one EEPROM byte. Needs an EEPROM-capable processor.
    pub fn read_eeprom(&mut self, addr: u8) -> Result<u8> {
        self.require_eeprom()?;
        let response =
            self.exchange(&commands::read_eeprom(addr), commands::EEPROM_READ_RESPONSE_LEN)?;
        Ok(commands::parse_eeprom_read(&response)?)
    }

    /// Write one EEPROM byte; fails as rejected when the firmware's status
    /// byte says no.
    pub fn write_eeprom(&mut self, addr: u8, value: u8) -> Result<()> {
        self.require_eeprom()?;
        let response = self.exchange(
            &commands::write_eeprom(addr, value),
            commands::EEPROM_WRITE_RESPONSE_LEN,
        )?;
        if !commands::parse_eeprom_write(&response)? {
            return Err(Error::CommandRejected {
                operation: "EEPROM write",
            });
        }
        Ok(())
    }

    /// Read `len` bytes from a secondary-bus device. Bridge boards only.
    pub fn i2c_read(&mut self, device: u8, offset: u8, len: u8) -> Result<Vec<u8>> {
        self.require_i2c()?;
        self.raw_i2c_read(device, offset, len)
    }

    /// Write bytes to a secondary-bus device, returning the byte the
    /// firmware echoes back. Bridge boards only.
    pub fn i2c_write(&mut self, device: u8, offset: u8, data: &[u8]) -> Result<u8> {
        self.require_i2c()?;
        let request = commands::i2c_write(device, offset, data)?;
        let response = self.exchange(&request, commands::I2C_WRITE_RESPONSE_LEN)?;
        Ok(commands::parse_i2c_write(&response)?)
    }

    /// Tell the firmware to reboot itself. The command answers nothing, so
    /// only the write leg runs.
    pub fn reset_board(&mut self) -> Result<()> {
        self.ensure_queried()?;
        self.exchange(&commands::reset(), 0)?;
        debug!("board reset requested for {}", self.path);
        Ok(())
    }

    fn require_eeprom(&mut self) -> Result<()> {
        let profile = self.ensure_queried()?;
        if !profile.has_eeprom {
            return Err(Error::NoEeprom {
                processor: profile.processor,
            });
        }
        Ok(())
    }

    fn require_i2c(&mut self) -> Result<()> {
        let board = self.ensure_queried()?.board;
        if board != BoardKind::I2c {
            return Err(Error::NotI2cBoard { actual: board });
        }
        Ok(())
    }

    /// Re-acquire the command interface after a release. A no-op while the
    /// interface is still held.
    pub(crate) fn reclaim(&mut self) -> Result<()> {
        if self.claimed {
            return Ok(());
        }
        self.port
            .set_configuration(self.driver.configuration())
            .map_err(|source| Error::Setup {
                stage: "set configuration",
                source,
            })?;
        self.port
            .claim_interface(self.driver.interface())
            .map_err(|source| Error::Setup {
                stage: "claim interface",
                source,
            })?;
        self.claimed = true;
        debug!("interface reclaimed on {}", self.path);
        Ok(())
    }

    /// Reset the device and give up the command interface. The handle
    /// stays registered and can be reclaimed later.
    pub fn release(&mut self) -> Result<()> {
        if !self.claimed {
            return Ok(());
        }
        self.port.reset()?;
        self.port.release_interface(self.driver.interface())?;
        self.claimed = false;
        debug!("interface released on {}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusDevice;
    use crate::driver::PIC_SIGNATURE;
    use crate::mock::{FirmwareModel, MockDevice};

    fn power_handle() -> DeviceHandle {
        let device = MockDevice::new(PIC_SIGNATURE, 1, 4, FirmwareModel::power_controller(7));
        DeviceHandle::stub(
            PIC_SIGNATURE,
            1,
            4,
            WireDriver::PicBulk,
            device.open().unwrap(),
            ProbeRange::default(),
        )
    }

    #[test]
    fn test_device_path_format() {
        assert_eq!(device_path(1, 14), "usb:1:14");
        assert_eq!(device_path(0, 0), "usb:0:0");
    }

    #[test]
    fn test_stub_starts_unqueried_and_claimed() {
        let handle = power_handle();
        assert!(!handle.queried());
        assert!(!handle.query_failed());
        assert!(handle.claimed());
        assert!(handle.profile().is_none());
    }

    #[test]
    fn test_query_runs_once_and_caches() {
        let mut handle = power_handle();
        let firmware = handle.ensure_queried().unwrap().firmware;
        assert_eq!(firmware.to_string(), "1.04");
        assert!(handle.queried());

        // A second call answers from the cache.
        let profile = handle.ensure_queried().unwrap();
        assert_eq!(profile.serial, 7);
        assert_eq!(profile.board, BoardKind::Power);
    }

    #[test]
    fn test_default_probe_range_spans_the_seven_bit_window() {
        let range = ProbeRange::default();
        assert_eq!(range.low, 0x08);
        assert_eq!(range.high, 0x77);
    }

    #[test]
    fn test_i2c_device_label() {
        let companion = I2cDevice {
            address: 0x50,
            companion: true,
            kind: Some(I2cDeviceKind::Hd44780Lcd),
        };
        assert_eq!(companion.label(), "HD44780 LCD Panel");

        let foreign = I2cDevice {
            address: 0x68,
            companion: false,
            kind: None,
        };
        assert_eq!(foreign.label(), "foreign device");
    }
}
