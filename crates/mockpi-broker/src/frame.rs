//! Opaque frames as the broker sees them
//!
//! The broker never decodes a frame. A frame is every byte of a line up to
//! its terminator, forwarded as received; the terminator is put back on the
//! way out. Blank lines carry no frame and are skipped.

use std::io;
use std::sync::Arc;

use mockpi_protocol::{FRAME_TERMINATOR, MAX_FRAME_LEN};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

/// One frame, terminator stripped, shared between every recipient
pub type Frame = Arc<[u8]>;

/// Line reader that never holds more than one frame's worth of input
///
/// A line longer than [`MAX_FRAME_LEN`] is discarded through its terminator
/// and reading carries on with the next line. Both reads are cancel safe,
/// so either can sit in a `select!`: partial input stays in the reader.
pub(crate) struct FrameReader<R> {
    reader: BufReader<R>,
    line: Vec<u8>,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self::with_reader(BufReader::new(inner))
    }

    fn with_reader(reader: BufReader<R>) -> Self {
        Self {
            reader,
            line: Vec::new(),
            discarding: false,
        }
    }

    /// Next frame, or `None` once the peer has closed the stream
    pub(crate) async fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                // A partial line at end of stream is not a frame.
                return Ok(None);
            }

            let (chunk, used, complete) =
                match available.iter().position(|&b| b == FRAME_TERMINATOR) {
                    Some(pos) => (&available[..pos], pos + 1, true),
                    None => (available, available.len(), false),
                };
            if !self.discarding {
                if self.line.len() + chunk.len() > MAX_FRAME_LEN {
                    warn!("Dropping oversize frame (over {} bytes)", MAX_FRAME_LEN);
                    self.line.clear();
                    self.discarding = true;
                } else {
                    self.line.extend_from_slice(chunk);
                }
            }
            self.reader.consume(used);

            if complete {
                if std::mem::take(&mut self.discarding) || self.line.is_empty() {
                    self.line.clear();
                    continue;
                }
                return Ok(Some(Arc::from(std::mem::take(&mut self.line))));
            }
        }
    }

    /// Wait until the peer closes the stream or sends more input
    ///
    /// Returns `true` for end of stream (a read error counts), `false` as
    /// soon as input is waiting. Nothing is consumed.
    pub(crate) async fn closed(&mut self) -> bool {
        match self.reader.fill_buf().await {
            Ok(available) => available.is_empty(),
            Err(_) => true,
        }
    }
}

/// Write a frame followed by its terminator in a single call
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(frame.len() + 1);
    out.extend_from_slice(frame);
    out.push(FRAME_TERMINATOR);
    writer.write_all(&out).await
}
