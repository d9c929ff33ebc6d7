//! Protocol error types

use crate::types::I2cFault;
use thiserror::Error;

/// Framing and protocol-level errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Response frame shorter than the command's fixed layout
    #[error("response too short: needed {needed} bytes, got {got}")]
    ShortResponse { needed: usize, got: usize },

    /// Payload does not fit the one-byte declared length
    #[error("payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    /// The device acknowledged the transfer but reported a bus fault
    #[error("I2C fault: {0}")]
    I2c(I2cFault),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
