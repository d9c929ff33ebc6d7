//! Vendor protocol for benchusb controller boards
//!
//! This crate defines the command protocol shared by the whole controller
//! family, independent of how the bytes travel over USB. Every request is a
//! fixed frame of `[command code][declared length][payload...]` and every
//! response has a length fixed by the command, known to the caller up front
//! (responses are never length-prefixed).
//!
//! The framing reproduces the shipped firmware byte for byte, including the
//! spots where the declared-length byte disagrees with the actual payload
//! and where write responses echo request bytes back. The firmware in the
//! field cannot be changed, so the quirks are part of the contract.
//!
//! # Example
//!
//! ```
//! use protocol::commands;
//!
//! // Request a single EEPROM byte at address 0x10.
//! let request = commands::read_eeprom(0x10);
//! assert_eq!(request, [0x01, 0x01, 0x10]);
//!
//! // The device answers with two bytes; the value sits at offset 0.
//! let value = commands::parse_eeprom_read(&[0x42, 0x00]).unwrap();
//! assert_eq!(value, 0x42);
//! ```

pub mod commands;
pub mod error;
pub mod types;

pub use commands::{
    CMD_I2C_READ, CMD_I2C_WRITE, CMD_READ_BOARD_TYPE, CMD_READ_EEPROM, CMD_READ_POWER_INFO,
    CMD_READ_VERSION, CMD_RESET, CMD_SET_POWER_STATE, CMD_WRITE_EEPROM,
};
pub use error::{ProtocolError, Result};
pub use types::{
    BoardKind, BoardTypeRecord, COMPANION_MAGIC, FirmwareVersion, I2C_ADDR_MAX, I2C_ADDR_MIN,
    I2cDeviceKind, I2cFault, PowerInfo, ProcessorKind,
};
