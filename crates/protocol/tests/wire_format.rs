//! Integration tests for the vendor wire format
//!
//! Replays the byte-level conversations a host has with the two reference
//! boards, verifying the request frames and the decoded responses against
//! the firmware behavior.

use protocol::{commands, BoardKind, I2cDeviceKind, ProcessorKind, ProtocolError, COMPANION_MAGIC};

mod power_board_conversation {
    use super::*;

    #[test]
    fn test_identification_sequence() {
        // Version first.
        assert_eq!(commands::read_version(), [0x00, 0x00]);
        let version = commands::parse_version(&[1, 4]).unwrap();
        assert_eq!(version.to_string(), "1.04");

        // Then the board-type record.
        assert_eq!(commands::read_board_type(), [0x30, 0x01]);
        let record = commands::parse_board_type(&[0x01, 0x04, 0x01, 0x28]).unwrap();
        assert_eq!(record.board, BoardKind::Power);
        assert_eq!(record.serial, 0x04);
        assert_eq!(record.processor, ProcessorKind::Pic18f2550);
        assert!(record.processor.has_eeprom());
        assert_eq!(record.speed_mhz, 40);

        // Power boards answer the ratings follow-up.
        let info = commands::parse_power_info(&[2, 4]).unwrap();
        assert_eq!((info.current_amps, info.outlets), (2, 4));
    }

    #[test]
    fn test_relay_switch_frames() {
        assert_eq!(commands::set_power_state(true), [0x32, 0x01, 0x01]);
        assert_eq!(commands::set_power_state(false), [0x32, 0x01, 0x00]);
    }

    #[test]
    fn test_eeprom_write_echoes_request_bytes() {
        let request = commands::write_eeprom(0x20, 0x5a);
        assert_eq!(request, [0x02, 0x02, 0x20, 0x5a]);

        // The firmware answers four bytes: status plus echoes of the
        // request. Only the status byte carries meaning.
        let accepted = commands::parse_eeprom_write(&[0x01, 0x20, 0x5a, 0x02]).unwrap();
        assert!(accepted);
    }
}

mod i2c_board_conversation {
    use super::*;

    #[test]
    fn test_companion_probe_exchange() {
        // Probe: one byte from register 0.
        assert_eq!(commands::i2c_read(0x50, 0x00, 1), [0x40, 0x02, 0x50, 0x00, 0x01]);

        // A companion controller answers the magic byte.
        let data = commands::parse_i2c_read(&[0x01, COMPANION_MAGIC], 1).unwrap();
        assert_eq!(data, &[COMPANION_MAGIC]);

        // Kind code follow-up at register 1.
        let data = commands::parse_i2c_read(&[0x01, 0x01], 1).unwrap();
        assert_eq!(I2cDeviceKind::from_code(data[0]), I2cDeviceKind::Hd44780Lcd);
    }

    #[test]
    fn test_empty_address_reports_fault() {
        let err = commands::parse_i2c_read(&[0x00, 0x02], 1).unwrap_err();
        assert!(matches!(err, ProtocolError::I2c(_)));
    }

    #[test]
    fn test_write_returns_echo_byte() {
        let request = commands::i2c_write(0x50, 0x00, &[0x80, 0x01]).unwrap();
        assert_eq!(request, vec![0x41, 0x04, 0x50, 0x00, 0x80, 0x01]);

        let echo = commands::parse_i2c_write(&[0x01, 0x80]).unwrap();
        assert_eq!(echo, 0x80);
    }
}
