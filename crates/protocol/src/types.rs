//! Identity and capability types reported by the boards
//!
//! The board-type record and the I2C probe return raw one-byte codes; this
//! module maps them to the kinds and labels the rest of the stack works
//! with. Codes outside the recognized range never fail a parse, they map to
//! an `Unknown` sentinel.

use std::fmt;

/// First register value a companion I2C controller answers with.
pub const COMPANION_MAGIC: u8 = 0xAE;

/// Lowest valid address on the secondary I2C bus.
pub const I2C_ADDR_MIN: u8 = 0x08;

/// Highest valid address on the secondary I2C bus.
pub const I2C_ADDR_MAX: u8 = 0x77;

/// Board family, from byte 0 of the board-type record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardKind {
    /// Relay board switching mains outlets.
    Power,
    /// Bridge to a secondary I2C bus.
    I2c,
    /// Neo-Geo control interface.
    NeoGeo,
    /// Code outside the recognized range.
    Unknown,
}

impl BoardKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => BoardKind::Power,
            0x02 => BoardKind::I2c,
            0x03 => BoardKind::NeoGeo,
            _ => BoardKind::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BoardKind::Power => "Power Controller",
            BoardKind::I2c => "Generic I2C",
            BoardKind::NeoGeo => "Neo-Geo interface",
            BoardKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for BoardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Microcontroller variant, from byte 2 of the board-type record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Pic18f2450,
    Pic18f2550,
    Atmega168,
    Atmega88,
    Unknown,
}

impl ProcessorKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => ProcessorKind::Pic18f2450,
            0x01 => ProcessorKind::Pic18f2550,
            0x02 => ProcessorKind::Atmega168,
            0x03 => ProcessorKind::Atmega88,
            _ => ProcessorKind::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessorKind::Pic18f2450 => "18F2450",
            ProcessorKind::Pic18f2550 => "18F2550",
            ProcessorKind::Atmega168 => "ATmega168",
            ProcessorKind::Atmega88 => "ATmega88",
            ProcessorKind::Unknown => "Unknown",
        }
    }

    /// Only the 18F2550 variant ships with an EEPROM.
    pub fn has_eeprom(&self) -> bool {
        matches!(self, ProcessorKind::Pic18f2550)
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a companion controller on the I2C bus identifies itself as.
///
/// Read from register offset 1 after the magic byte matched at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum I2cDeviceKind {
    BootLoader,
    Hd44780Lcd,
    ServoController,
    GenericIo,
    Unknown,
}

impl I2cDeviceKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => I2cDeviceKind::BootLoader,
            0x01 => I2cDeviceKind::Hd44780Lcd,
            0x02 => I2cDeviceKind::ServoController,
            0x03 => I2cDeviceKind::GenericIo,
            _ => I2cDeviceKind::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            I2cDeviceKind::BootLoader => "18F690 Boot Loader",
            I2cDeviceKind::Hd44780Lcd => "HD44780 LCD Panel",
            I2cDeviceKind::ServoController => "Servo Controller",
            I2cDeviceKind::GenericIo => "Generic 8-bit IO",
            I2cDeviceKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for I2cDeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fault code carried in a zero-ack I2C response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cFault(pub u8);

impl I2cFault {
    pub fn label(&self) -> &'static str {
        match self.0 {
            0x01 => "invalid device",
            0x02 => "missing ACK",
            0x03 => "timeout",
            _ => "unknown fault",
        }
    }
}

impl fmt::Display for I2cFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code 0x{:02x})", self.label(), self.0)
    }
}

/// Firmware revision, reported as two raw bytes.
///
/// Renders the way the firmware documentation writes versions: the minor
/// byte is zero-padded to two digits, so (1, 4) is "1.04".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major, self.minor)
    }
}

/// Ratings of a power controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerInfo {
    /// Rated switching current in amps.
    pub current_amps: u8,
    /// Number of switchable outlets.
    pub outlets: u8,
}

/// Decoded board-type record (command 0x30).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardTypeRecord {
    pub board: BoardKind,
    /// One-byte serial number programmed into the board.
    pub serial: u8,
    pub processor: ProcessorKind,
    /// Core clock in MHz.
    pub speed_mhz: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_kind_codes() {
        assert_eq!(BoardKind::from_code(0x01), BoardKind::Power);
        assert_eq!(BoardKind::from_code(0x02), BoardKind::I2c);
        assert_eq!(BoardKind::from_code(0x03), BoardKind::NeoGeo);
        assert_eq!(BoardKind::from_code(0x00), BoardKind::Unknown);
        assert_eq!(BoardKind::from_code(0x7f), BoardKind::Unknown);
    }

    #[test]
    fn test_processor_labels() {
        assert_eq!(ProcessorKind::from_code(0x00).label(), "18F2450");
        assert_eq!(ProcessorKind::from_code(0x01).label(), "18F2550");
        assert_eq!(ProcessorKind::from_code(0x02).label(), "ATmega168");
        assert_eq!(ProcessorKind::from_code(0x03).label(), "ATmega88");
        assert_eq!(ProcessorKind::from_code(0x42).label(), "Unknown");
    }

    #[test]
    fn test_only_18f2550_has_eeprom() {
        for code in 0u8..=255 {
            let processor = ProcessorKind::from_code(code);
            assert_eq!(
                processor.has_eeprom(),
                processor == ProcessorKind::Pic18f2550
            );
        }
    }

    #[test]
    fn test_i2c_device_kind_labels() {
        assert_eq!(I2cDeviceKind::from_code(0x01).label(), "HD44780 LCD Panel");
        assert_eq!(I2cDeviceKind::from_code(0x03).label(), "Generic 8-bit IO");
        assert_eq!(I2cDeviceKind::from_code(0x99), I2cDeviceKind::Unknown);
    }

    #[test]
    fn test_firmware_version_display() {
        let version = FirmwareVersion { major: 1, minor: 4 };
        assert_eq!(version.to_string(), "1.04");

        let version = FirmwareVersion {
            major: 2,
            minor: 31,
        };
        assert_eq!(version.to_string(), "2.31");
    }

    #[test]
    fn test_i2c_fault_display() {
        let fault = I2cFault(0x02);
        assert_eq!(fault.to_string(), "missing ACK (code 0x02)");
        assert_eq!(I2cFault(0x55).label(), "unknown fault");
    }
}
