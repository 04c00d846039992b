//! Error types for the register bus

use mockpi_protocol::{DeviceAddress, ParseError};
use thiserror::Error;

/// Errors that can occur on the register bus
#[derive(Debug, Error)]
pub enum BusError {
    /// Register access beyond the end of a register file
    #[error("register {register} out of range for device {address} ({len} registers)")]
    OutOfRange {
        /// Device that was accessed
        address: DeviceAddress,
        /// Offending register offset
        register: usize,
        /// Length of the device's register file
        len: usize,
    },

    /// A wire frame could not be parsed
    #[error("malformed message: {0}")]
    Malformed(#[from] ParseError),

    /// Acknowledged write was not confirmed in time
    #[error("write not acknowledged within {timeout_ms}ms")]
    AckTimeout {
        /// The bound that expired
        timeout_ms: u64,
    },

    /// Acknowledged write was refused or answered with a different frame
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The relay session lost its broker connection
    #[error("disconnected from broker: {0}")]
    Disconnected(String),

    /// The operation needs an endpoint that is not configured
    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    /// The register store file could not be used
    #[error("register store unavailable: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
