//! Request builders and response parsers
//!
//! One builder/parser pair per command code. A request frame is
//! `[command code][declared length][payload...]`; the declared-length byte
//! is written exactly the way the firmware expects it, which is not always
//! the payload length:
//!
//! - read board type declares 1 and carries no payload,
//! - read power info declares 2 and carries no payload,
//! - I2C read declares 2 but carries 3 payload bytes.
//!
//! Response lengths are fixed per command (the `*_RESPONSE_LEN` constants);
//! the transport layer reads exactly that many bytes. Write-style responses
//! echo request bytes back in odd positions; the parsers take the frames as
//! they are.

use crate::error::{ProtocolError, Result};
use crate::types::{BoardKind, BoardTypeRecord, FirmwareVersion, I2cFault, PowerInfo, ProcessorKind};

/// Read firmware version.
pub const CMD_READ_VERSION: u8 = 0x00;
/// Read one EEPROM byte.
pub const CMD_READ_EEPROM: u8 = 0x01;
/// Write one EEPROM byte.
pub const CMD_WRITE_EEPROM: u8 = 0x02;
/// Read the board-type record.
pub const CMD_READ_BOARD_TYPE: u8 = 0x30;
/// Read power-controller ratings.
pub const CMD_READ_POWER_INFO: u8 = 0x31;
/// Switch the power relay.
pub const CMD_SET_POWER_STATE: u8 = 0x32;
/// Read bytes from a device on the secondary I2C bus.
pub const CMD_I2C_READ: u8 = 0x40;
/// Write bytes to a device on the secondary I2C bus.
pub const CMD_I2C_WRITE: u8 = 0x41;
/// Reset the controller firmware.
pub const CMD_RESET: u8 = 0xFF;

pub const VERSION_RESPONSE_LEN: usize = 2;
pub const BOARD_TYPE_RESPONSE_LEN: usize = 4;
pub const POWER_INFO_RESPONSE_LEN: usize = 2;
pub const POWER_STATE_RESPONSE_LEN: usize = 1;
pub const EEPROM_READ_RESPONSE_LEN: usize = 2;
pub const EEPROM_WRITE_RESPONSE_LEN: usize = 4;
pub const I2C_WRITE_RESPONSE_LEN: usize = 2;

/// Longest I2C write payload the one-byte declared length can carry.
pub const MAX_I2C_WRITE: usize = 253;

/// Build a read-version request. The device answers `[major, minor]`.
pub fn read_version() -> [u8; 2] {
    [CMD_READ_VERSION, 0x00]
}

/// Build a board-type request.
///
/// The device answers `[board, serial, processor, speed]`.
pub fn read_board_type() -> [u8; 2] {
    // Declared length is 1 even though nothing follows.
    [CMD_READ_BOARD_TYPE, 0x01]
}

/// Build a power-info request. The device answers `[current, outlets]`.
pub fn read_power_info() -> [u8; 2] {
    // Declared length is 2 even though nothing follows.
    [CMD_READ_POWER_INFO, 0x02]
}

/// Build a set-power-state request. The device answers a single status byte.
pub fn set_power_state(on: bool) -> [u8; 3] {
    [CMD_SET_POWER_STATE, 0x01, on as u8]
}

/// Build an EEPROM read request for one byte at `addr`.
pub fn read_eeprom(addr: u8) -> [u8; 3] {
    [CMD_READ_EEPROM, 0x01, addr]
}

/// Build an EEPROM write request for one byte.
pub fn write_eeprom(addr: u8, value: u8) -> [u8; 4] {
    [CMD_WRITE_EEPROM, 0x02, addr, value]
}

/// Build an I2C read request: `len` bytes from `device` starting at
/// register `offset`. The device answers `len + 1` bytes, ack byte first.
pub fn i2c_read(device: u8, offset: u8, len: u8) -> [u8; 5] {
    // Declared length stays 2 no matter how long the read is.
    [CMD_I2C_READ, 0x02, device, offset, len]
}

/// Expected response length for an I2C read of `len` bytes.
pub fn i2c_read_response_len(len: u8) -> usize {
    len as usize + 1
}

/// Build an I2C write request carrying `data` for register `offset` of
/// `device`. Fails if `data` does not fit the one-byte declared length.
pub fn i2c_write(device: u8, offset: u8, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_I2C_WRITE {
        return Err(ProtocolError::PayloadTooLong {
            len: data.len(),
            max: MAX_I2C_WRITE,
        });
    }
    let mut request = Vec::with_capacity(4 + data.len());
    request.extend_from_slice(&[CMD_I2C_WRITE, (2 + data.len()) as u8, device, offset]);
    request.extend_from_slice(data);
    Ok(request)
}

/// Build a firmware reset request. The device sends no response.
pub fn reset() -> [u8; 2] {
    [CMD_RESET, 0x00]
}

/// Parse a read-version response.
pub fn parse_version(response: &[u8]) -> Result<FirmwareVersion> {
    need(response, VERSION_RESPONSE_LEN)?;
    Ok(FirmwareVersion {
        major: response[0],
        minor: response[1],
    })
}

/// Parse a board-type response.
///
/// Unrecognized board or processor codes decode to the `Unknown` sentinel
/// instead of failing.
pub fn parse_board_type(response: &[u8]) -> Result<BoardTypeRecord> {
    need(response, BOARD_TYPE_RESPONSE_LEN)?;
    Ok(BoardTypeRecord {
        board: BoardKind::from_code(response[0]),
        serial: response[1],
        processor: ProcessorKind::from_code(response[2]),
        speed_mhz: response[3],
    })
}

/// Parse a power-info response.
pub fn parse_power_info(response: &[u8]) -> Result<PowerInfo> {
    need(response, POWER_INFO_RESPONSE_LEN)?;
    Ok(PowerInfo {
        current_amps: response[0],
        outlets: response[1],
    })
}

/// Parse an EEPROM read response. The value sits at offset 0; the second
/// byte is firmware filler.
pub fn parse_eeprom_read(response: &[u8]) -> Result<u8> {
    need(response, EEPROM_READ_RESPONSE_LEN)?;
    Ok(response[0])
}

/// Parse an EEPROM write response: a status byte followed by three echoed
/// bytes. Returns whether the firmware accepted the write.
pub fn parse_eeprom_write(response: &[u8]) -> Result<bool> {
    need(response, EEPROM_WRITE_RESPONSE_LEN)?;
    Ok(response[0] != 0)
}

/// Parse an I2C read response: `[ack, data...]`.
///
/// A zero ack means the bus transaction failed; the byte after the ack then
/// carries the fault code.
pub fn parse_i2c_read(response: &[u8], len: u8) -> Result<&[u8]> {
    need(response, i2c_read_response_len(len))?;
    if response[0] == 0 {
        return Err(ProtocolError::I2c(I2cFault(
            response.get(1).copied().unwrap_or(0),
        )));
    }
    Ok(&response[1..i2c_read_response_len(len)])
}

/// Parse an I2C write response: `[ack, echo]`.
///
/// On success the firmware echoes one byte of the request back; callers get
/// it as-is. On a zero ack the echo position carries the fault code.
pub fn parse_i2c_write(response: &[u8]) -> Result<u8> {
    need(response, I2C_WRITE_RESPONSE_LEN)?;
    if response[0] == 0 {
        return Err(ProtocolError::I2c(I2cFault(response[1])));
    }
    Ok(response[1])
}

fn need(response: &[u8], needed: usize) -> Result<()> {
    if response.len() < needed {
        return Err(ProtocolError::ShortResponse {
            needed,
            got: response.len(),
        });
    }
    Ok(())
}
