//! Subscription filters
//!
//! A subscriber declares interest in a device, or in one register of a
//! device, before reading. Filters are expressed as textual prefixes of the
//! wire frame so that the broker can match frames byte-for-byte without
//! decoding them.
//!
//! Subscriber connections also carry two control lines upstream:
//!
//! ```text
//! SUB <prefix>
//! UNSUB <prefix>
//! ```
//!
//! where `<prefix>` is everything after the first space, trailing space
//! included. An empty prefix matches every frame.

use std::fmt;

use crate::address::DeviceAddress;
use crate::message::WireMessage;

/// Control verb that adds a subscription
pub const SUBSCRIBE: &str = "SUB";
/// Control verb that withdraws a subscription
pub const UNSUBSCRIBE: &str = "UNSUB";

/// Interest declared by a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Every frame
    All,
    /// Every frame for one device
    Device(DeviceAddress),
    /// Frames for one device starting at one register
    Register(DeviceAddress, u8),
}

impl Filter {
    /// Textual prefix matched against raw frames
    pub fn prefix(&self) -> String {
        match self {
            Filter::All => String::new(),
            Filter::Device(a) => format!("{} ", a.as_u8()),
            Filter::Register(a, r) => format!("{} {} ", a.as_u8(), r),
        }
    }

    /// Check a decoded message against this filter
    pub fn matches(&self, msg: &WireMessage) -> bool {
        match *self {
            Filter::All => true,
            Filter::Device(a) => msg.address == a,
            Filter::Register(a, r) => msg.address == a && msg.register == r,
        }
    }

    /// Control line that declares this filter (newline-terminated)
    pub fn subscribe_line(&self) -> String {
        format!("{} {}\n", SUBSCRIBE, self.prefix())
    }

    /// Control line that withdraws this filter (newline-terminated)
    pub fn unsubscribe_line(&self) -> String {
        format!("{} {}\n", UNSUBSCRIBE, self.prefix())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "*"),
            Filter::Device(a) => write!(f, "{a}"),
            Filter::Register(a, r) => write!(f, "{a}/{r}"),
        }
    }
}

/// Check a raw frame against a textual prefix without decoding it
///
/// A frame with an empty payload (`"4 2"`) has no trailing separator, so it
/// also matches the prefix `"4 2 "`.
pub fn prefix_matches(prefix: &str, frame: &[u8]) -> bool {
    let frame = frame.trim_ascii();
    frame.starts_with(prefix.as_bytes())
        || (!prefix.is_empty() && frame == prefix.trim_end().as_bytes())
}

/// Parsed subscriber control line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    /// Add a prefix subscription
    Subscribe(String),
    /// Remove a prefix subscription
    Unsubscribe(String),
}

impl ControlLine {
    /// Parse a control line (terminator already stripped)
    pub fn parse(line: &str) -> Option<Self> {
        let (verb, prefix) = match line.split_once(' ') {
            Some((verb, prefix)) => (verb, prefix),
            None => (line, ""),
        };
        match verb {
            SUBSCRIBE => Some(ControlLine::Subscribe(prefix.to_string())),
            UNSUBSCRIBE => Some(ControlLine::Unsubscribe(prefix.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes() {
        assert_eq!(Filter::All.prefix(), "");
        assert_eq!(Filter::Device(DeviceAddress(58)).prefix(), "58 ");
        assert_eq!(Filter::Register(DeviceAddress(58), 3).prefix(), "58 3 ");
    }

    #[test]
    fn test_device_prefix_does_not_match_longer_address() {
        let prefix = Filter::Device(DeviceAddress(1)).prefix();
        assert!(prefix_matches(&prefix, b"1 0 5"));
        assert!(!prefix_matches(&prefix, b"12 0 5"));
    }

    #[test]
    fn test_register_prefix_matches_empty_payload() {
        let prefix = Filter::Register(DeviceAddress(4), 2).prefix();
        assert!(prefix_matches(&prefix, b"4 2"));
        assert!(prefix_matches(&prefix, b"4 2 9"));
        assert!(!prefix_matches(&prefix, b"4 21 9"));
    }

    #[test]
    fn test_all_matches_everything() {
        assert!(prefix_matches("", b"9 9 9"));
        assert!(Filter::All.matches(&WireMessage::byte(1u8, 1, 1)));
    }

    #[test]
    fn test_decoded_match() {
        let msg = WireMessage::byte(4u8, 2, 9);
        assert!(Filter::Device(DeviceAddress(4)).matches(&msg));
        assert!(Filter::Register(DeviceAddress(4), 2).matches(&msg));
        assert!(!Filter::Register(DeviceAddress(4), 3).matches(&msg));
    }

    #[test]
    fn test_control_lines() {
        let filter = Filter::Register(DeviceAddress(4), 2);
        assert_eq!(filter.subscribe_line(), "SUB 4 2 \n");
        assert_eq!(
            ControlLine::parse(filter.subscribe_line().trim_end_matches('\n')),
            Some(ControlLine::Subscribe("4 2 ".to_string()))
        );
        assert_eq!(
            ControlLine::parse("UNSUB 4 "),
            Some(ControlLine::Unsubscribe("4 ".to_string()))
        );
        assert_eq!(
            ControlLine::parse("SUB"),
            Some(ControlLine::Subscribe(String::new()))
        );
        assert_eq!(ControlLine::parse("HELLO 1"), None);
    }
}
