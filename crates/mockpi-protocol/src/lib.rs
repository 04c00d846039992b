//! Mock Register Bus Protocol
//!
//! This crate provides the message types shared by every participant of the
//! simulated register bus:
//!
//! - **DeviceAddress**: identifier of one logical device on the bus
//! - **WireMessage**: one `(address, register, payload)` register update
//! - **FrameCodec**: streaming decoder for newline-terminated text frames
//! - **Filter**: subscription prefixes matched against raw frames
//!
//! # Wire format
//!
//! ```text
//! 58 0 15\n          write 15 to register 0 of device 58
//! 58 4 1 2 3\n       write registers 4..7 of device 58
//! ```
//!
//! # Example
//!
//! ```rust
//! use mockpi_protocol::{FrameCodec, WireMessage};
//!
//! let mut codec = FrameCodec::new();
//! codec.push_bytes(b"58 0 15\n");
//!
//! let msg = codec.next_message().unwrap();
//! assert_eq!(msg, WireMessage::byte(58u8, 0, 15));
//! ```

pub mod address;
pub mod codec;
pub mod error;
pub mod filter;
pub mod message;

pub use address::DeviceAddress;
pub use codec::{decode_frame, FrameCodec, FRAME_TERMINATOR, MAX_FRAME_LEN};
pub use error::ParseError;
pub use filter::{prefix_matches, ControlLine, Filter};
pub use message::WireMessage;

/// Reply prefix a register worker uses to refuse a request
pub const REJECT_PREFIX: &str = "ERR";
