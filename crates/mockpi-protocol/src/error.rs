//! Error types for wire message parsing

use thiserror::Error;

/// Errors that can occur while parsing a wire frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Frame contained no tokens at all
    #[error("empty frame")]
    EmptyFrame,

    /// Frame is missing the register field
    #[error("malformed message: missing register in {0:?}")]
    MissingRegister(String),

    /// A token could not be parsed as a decimal integer
    #[error("malformed message: {field} token {token:?} is not a decimal integer")]
    MalformedMessage {
        /// Which field the token was meant to fill
        field: &'static str,
        /// The offending token
        token: String,
    },

    /// A numeric token does not fit in a byte
    #[error("{field} value {value} is out of range 0..=255")]
    ValueOutOfRange {
        /// Which field the value was meant to fill
        field: &'static str,
        /// The parsed value
        value: u64,
    },

    /// Frame exceeds the maximum accepted length
    #[error("frame too long: {0} bytes")]
    FrameTooLong(usize),
}
