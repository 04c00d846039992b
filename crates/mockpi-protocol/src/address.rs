//! Device addressing
//!
//! A [`DeviceAddress`] identifies one logical peripheral sharing the bus.
//! On real hardware this is the 7-bit I2C slave address; on the simulated
//! bus it is just a small integer key. Which symbol maps to which address
//! (lasers, arduino, ...) belongs to the calling application.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Identifier of one logical device on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceAddress(pub u8);

impl DeviceAddress {
    /// Get the raw address value
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl From<u8> for DeviceAddress {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

impl FromStr for DeviceAddress {
    type Err = ParseError;

    /// Accepts decimal (`58`) or hex (`0x3a`) notation
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        };
        let value = parsed.map_err(|_| ParseError::MalformedMessage {
            field: "address",
            token: s.to_string(),
        })?;
        u8::try_from(value)
            .map(DeviceAddress)
            .map_err(|_| ParseError::ValueOutOfRange {
                field: "address",
                value,
            })
    }
}
