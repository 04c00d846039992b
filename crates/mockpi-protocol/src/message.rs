//! Wire message format
//!
//! Every register write on the relay bus travels as one text frame:
//!
//! ```text
//! <address> <register> <b0> <b1> ... <bn>
//! ```
//!
//! All fields are decimal integers separated by single spaces. On a stream
//! transport each frame is terminated by `\n` (see [`crate::codec`]).
//!
//! Decoding is tolerant of extra whitespace, so the literal text does not
//! necessarily round-trip, but the parsed `(address, register, payload)`
//! triple always does.

use std::fmt;
use std::str::FromStr;

use crate::address::DeviceAddress;
use crate::error::ParseError;

/// One register update: `payload` written starting at `register` of `address`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WireMessage {
    /// Target device
    pub address: DeviceAddress,
    /// First register covered by the payload
    pub register: u8,
    /// Register bytes, in ascending register order
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Create a new message
    pub fn new(address: impl Into<DeviceAddress>, register: u8, payload: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            register,
            payload,
        }
    }

    /// Create a single-byte message
    pub fn byte(address: impl Into<DeviceAddress>, register: u8, value: u8) -> Self {
        Self::new(address, register, vec![value])
    }

    /// Encode to the text frame, without a terminator
    pub fn encode(&self) -> String {
        let mut out = format!("{} {}", self.address.as_u8(), self.register);
        for b in &self.payload {
            out.push(' ');
            out.push_str(&b.to_string());
        }
        out
    }

    /// Encode to bytes suitable for a stream transport (newline-terminated)
    pub fn encode_line(&self) -> Vec<u8> {
        let mut bytes = self.encode().into_bytes();
        bytes.push(b'\n');
        bytes
    }

    /// Decode a text frame
    pub fn decode(frame: &str) -> Result<Self, ParseError> {
        let mut tokens = frame.split_whitespace();

        let address = tokens.next().ok_or(ParseError::EmptyFrame)?;
        let address = parse_byte("address", address)?;

        let register = tokens
            .next()
            .ok_or_else(|| ParseError::MissingRegister(frame.to_string()))?;
        let register = parse_byte("register", register)?;

        let payload = tokens
            .map(|t| parse_byte("payload", t))
            .collect::<Result<Vec<u8>, _>>()?;

        Ok(Self {
            address: DeviceAddress(address),
            register,
            payload,
        })
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for WireMessage {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn parse_byte(field: &'static str, token: &str) -> Result<u8, ParseError> {
    let value = token
        .parse::<u64>()
        .map_err(|_| ParseError::MalformedMessage {
            field,
            token: token.to_string(),
        })?;
    u8::try_from(value).map_err(|_| ParseError::ValueOutOfRange { field, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode() {
        let msg = WireMessage::new(58u8, 0, vec![1, 2, 255]);
        assert_eq!(msg.encode(), "58 0 1 2 255");
        assert_eq!(msg.encode_line(), b"58 0 1 2 255\n");
    }

    #[test]
    fn test_encode_empty_payload() {
        let msg = WireMessage::new(7u8, 3, vec![]);
        assert_eq!(msg.encode(), "7 3");
    }

    #[test]
    fn test_decode_tolerates_whitespace() {
        let msg = WireMessage::decode("  4\t 2  9   10 \r").unwrap();
        assert_eq!(msg, WireMessage::new(4u8, 2, vec![9, 10]));
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(WireMessage::decode(""), Err(ParseError::EmptyFrame));
        assert_eq!(WireMessage::decode("   "), Err(ParseError::EmptyFrame));
        assert!(matches!(
            WireMessage::decode("4"),
            Err(ParseError::MissingRegister(_))
        ));
        assert!(matches!(
            WireMessage::decode("4 0 1 x 3"),
            Err(ParseError::MalformedMessage { field: "payload", .. })
        ));
        assert!(matches!(
            WireMessage::decode("lasers 0 1"),
            Err(ParseError::MalformedMessage { field: "address", .. })
        ));
        assert_eq!(
            WireMessage::decode("4 0 256"),
            Err(ParseError::ValueOutOfRange {
                field: "payload",
                value: 256
            })
        );
        assert!(matches!(
            WireMessage::decode("4 -1 0"),
            Err(ParseError::MalformedMessage { field: "register", .. })
        ));
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            address: u8,
            register: u8,
            payload in prop::collection::vec(any::<u8>(), 0..=64)
        ) {
            let msg = WireMessage::new(address, register, payload);
            let decoded = WireMessage::decode(&msg.encode()).unwrap();
            prop_assert_eq!(decoded, msg);
        }

        #[test]
        fn reencoding_a_parsed_frame_parses_the_same(
            address: u8,
            register: u8,
            payload in prop::collection::vec(any::<u8>(), 0..8),
            pad in "[ \t]{1,3}"
        ) {
            let mut frame = format!("{pad}{address}{pad}{register}");
            for b in &payload {
                frame.push_str(&pad);
                frame.push_str(&b.to_string());
            }
            let first = WireMessage::decode(&frame).unwrap();
            let second = WireMessage::decode(&first.encode()).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
