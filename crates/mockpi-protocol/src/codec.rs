//! Streaming frame codec
//!
//! Socket reads rarely line up with frame boundaries. [`FrameCodec`]
//! buffers raw bytes and hands out complete newline-terminated frames.
//!
//! A frame that fails to decode is logged and skipped: one corrupt frame
//! never stops the frames behind it from being delivered.

use tracing::warn;

use crate::error::ParseError;
use crate::message::WireMessage;

/// Frame terminator on stream transports
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Largest frame accepted: 3 header tokens plus a 256-byte payload, each
/// at most `"255 "`
pub const MAX_FRAME_LEN: usize = 4 * 258;

/// Streaming decoder for newline-terminated wire frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: Vec<u8>,
    discarding: bool,
}

impl FrameCodec {
    /// Create a new frame codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            discarding: false,
        }
    }

    /// Push raw bytes into the codec buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // A peer that never terminates its frame must not grow the buffer
        // forever. Drop what we have and skip to the next terminator.
        if !self.buffer.contains(&FRAME_TERMINATOR) && self.buffer.len() > MAX_FRAME_LEN {
            warn!(
                "Dropping {} unterminated bytes from frame buffer",
                self.buffer.len()
            );
            self.buffer.clear();
            self.discarding = true;
        }
    }

    /// Extract the next raw frame (terminator stripped), decoded or not
    ///
    /// Frames are returned as text; invalid UTF-8 is replaced lossily so it
    /// still fails decoding downstream instead of being silently dropped.
    pub fn next_frame(&mut self) -> Option<String> {
        loop {
            let term_pos = self.buffer.iter().position(|&b| b == FRAME_TERMINATOR)?;
            let frame: Vec<u8> = self.buffer.drain(..=term_pos).collect();

            if self.discarding {
                // Tail of an oversize frame
                self.discarding = false;
                continue;
            }

            let text = String::from_utf8_lossy(&frame[..frame.len() - 1]);
            return Some(text.trim_end_matches('\r').to_string());
        }
    }

    /// Extract the next well-formed message, skipping malformed frames
    pub fn next_message(&mut self) -> Option<WireMessage> {
        self.next_message_with_frame().map(|(msg, _)| msg)
    }

    /// Extract the next well-formed message along with its raw frame text
    pub fn next_message_with_frame(&mut self) -> Option<(WireMessage, String)> {
        loop {
            let frame = self.next_frame()?;
            match decode_frame(&frame) {
                Ok(msg) => return Some((msg, frame)),
                Err(e) => {
                    warn!("Discarding malformed frame {:?}: {}", frame, e);
                }
            }
        }
    }

    /// Number of buffered bytes not yet forming a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

/// Decode one frame, enforcing the length limit
pub fn decode_frame(frame: &str) -> Result<WireMessage, ParseError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(ParseError::FrameTooLong(frame.len()));
    }
    WireMessage::decode(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_parse() {
        let mut codec = FrameCodec::new();

        codec.push_bytes(b"58 0 1");
        assert!(codec.next_message().is_none());

        codec.push_bytes(b"5\n");
        assert_eq!(
            codec.next_message(),
            Some(WireMessage::new(58u8, 0, vec![15]))
        );
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"1 0 1\n2 3 4 5\r\n3 9\n");

        assert_eq!(codec.next_message(), Some(WireMessage::new(1u8, 0, vec![1])));
        assert_eq!(
            codec.next_message(),
            Some(WireMessage::new(2u8, 3, vec![4, 5]))
        );
        assert_eq!(codec.next_message(), Some(WireMessage::new(3u8, 9, vec![])));
        assert!(codec.next_message().is_none());
    }

    #[test]
    fn test_corrupt_frame_is_skipped() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"this is not a frame\n7 1 42\n");

        let mut decoded = Vec::new();
        while let Some(msg) = codec.next_message() {
            decoded.push(msg);
        }
        assert_eq!(decoded, vec![WireMessage::new(7u8, 1, vec![42])]);
    }

    #[test]
    fn test_frame_with_bytes() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(b"7  1 42\n");
        let (msg, frame) = codec.next_message_with_frame().unwrap();
        assert_eq!(msg, WireMessage::new(7u8, 1, vec![42]));
        assert_eq!(frame, "7  1 42");
    }

    #[test]
    fn test_unterminated_flood_is_dropped() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(&vec![b'1'; MAX_FRAME_LEN + 1]);
        assert_eq!(codec.buffered(), 0);

        // Rest of the oversize frame, then a good one
        codec.push_bytes(b"111\n5 5 5\n");
        assert_eq!(codec.next_message(), Some(WireMessage::new(5u8, 5, vec![5])));
    }

    #[test]
    fn test_invalid_utf8_is_discarded() {
        let mut codec = FrameCodec::new();
        codec.push_bytes(&[0xff, 0xfe, b'\n']);
        codec.push_bytes(b"1 1 1\n");
        assert_eq!(codec.next_message(), Some(WireMessage::new(1u8, 1, vec![1])));
    }
}
