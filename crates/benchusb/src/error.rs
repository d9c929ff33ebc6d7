//! Library error types

use protocol::{BoardKind, I2cFault, ProcessorKind, ProtocolError};
use thiserror::Error;

use crate::bus::TransportError;

/// Errors surfaced by discovery, dispatch, and the typed operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying USB transport failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A transfer moved a different number of bytes than the frame requires
    #[error("short transfer: expected {expected} bytes, moved {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    /// Session setup failed while claiming the command interface
    #[error("device setup failed at {stage}: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: TransportError,
    },

    /// The identification query failed; the handle answers nothing else
    #[error("device identification query failed")]
    QueryFailed,

    /// The operation needs a power controller board
    #[error("not a power controller (board is {actual})")]
    NotPowerBoard { actual: BoardKind },

    /// The operation needs an I2C bridge board
    #[error("not an I2C bridge (board is {actual})")]
    NotI2cBoard { actual: BoardKind },

    /// The processor variant carries no EEPROM
    #[error("processor {processor} has no EEPROM")]
    NoEeprom { processor: ProcessorKind },

    /// The firmware's status byte reported failure
    #[error("device rejected {operation}")]
    CommandRejected { operation: &'static str },

    /// The device answered, but the secondary I2C bus faulted
    #[error("I2C fault: {fault}")]
    I2cFault { fault: I2cFault },

    /// No registry entry has the given path
    #[error("no device at {path}")]
    UnknownDevice { path: String },

    /// A notification callback is already registered for the device
    #[error("a notification callback is already registered for this device")]
    CallbackAlreadyRegistered,

    /// The protocol layer rejected a frame
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::I2c(fault) => Error::I2cFault { fault },
            other => Error::Protocol(other),
        }
    }
}

/// Type alias for library results.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i2c_protocol_error_becomes_fault() {
        let err = Error::from(ProtocolError::I2c(I2cFault(0x02)));
        assert!(matches!(err, Error::I2cFault { fault: I2cFault(0x02) }));
    }

    #[test]
    fn test_short_response_stays_protocol_error() {
        let err = Error::from(ProtocolError::ShortResponse { needed: 2, got: 0 });
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_transport_error_display() {
        let err = Error::from(TransportError::Timeout);
        assert_eq!(err.to_string(), "transport error: transfer timed out");
    }

    #[test]
    fn test_short_transfer_display() {
        let err = Error::ShortTransfer {
            expected: 4,
            actual: 2,
        };
        assert_eq!(err.to_string(), "short transfer: expected 4 bytes, moved 2");
    }
}
