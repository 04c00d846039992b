//! Publish/subscribe fan-out
//!
//! Every frame read from any publisher connection is broadcast to every
//! subscriber connection. Each subscriber task forwards only the frames
//! whose text starts with one of the prefixes that subscriber declared.

use std::collections::HashSet;
use std::net::SocketAddr;

use mockpi_protocol::{prefix_matches, ControlLine};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::frame::{write_frame, Frame, FrameReader};

/// Read frames from one publisher and broadcast them
pub(crate) async fn serve_publisher(
    stream: TcpStream,
    peer: SocketAddr,
    frames: broadcast::Sender<Frame>,
) {
    let mut reader = FrameReader::new(stream);

    loop {
        match reader.next_frame().await {
            Ok(None) => break,
            Ok(Some(frame)) => {
                // No subscribers is not an error; the frame is simply lost.
                let _ = frames.send(frame);
            }
            Err(e) => {
                warn!("Publisher {} connection error: {}", peer, e);
                break;
            }
        }
    }
    info!("Publisher disconnected: {}", peer);
}

/// Forward matching frames to one subscriber and track its prefixes
pub(crate) async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut frames: broadcast::Receiver<Frame>,
) {
    let (reader, mut writer) = stream.into_split();
    // Partial control lines stay in the reader when the other branch wins.
    let mut reader = FrameReader::new(reader);
    let mut prefixes: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            result = reader.next_frame() => {
                match result {
                    Ok(None) => break,
                    Ok(Some(line)) => apply_control(peer, &line, &mut prefixes),
                    Err(e) => {
                        warn!("Subscriber {} connection error: {}", peer, e);
                        break;
                    }
                }
            }

            frame = frames.recv() => {
                match frame {
                    Ok(frame) => {
                        if prefixes.iter().any(|p| prefix_matches(p, &frame)) {
                            if let Err(e) = write_frame(&mut writer, &frame).await {
                                warn!("Subscriber {} write failed: {}", peer, e);
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(subscriber = %peer, lagged_by = n, "Subscriber lagged; frames lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    info!("Subscriber disconnected: {}", peer);
}

fn apply_control(peer: SocketAddr, line: &[u8], prefixes: &mut HashSet<String>) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches('\r');
    match ControlLine::parse(text) {
        Some(ControlLine::Subscribe(prefix)) => {
            debug!("Subscriber {} added prefix {:?}", peer, prefix);
            prefixes.insert(prefix);
        }
        Some(ControlLine::Unsubscribe(prefix)) => {
            debug!("Subscriber {} removed prefix {:?}", peer, prefix);
            prefixes.remove(&prefix);
        }
        None => warn!("Subscriber {} sent unknown control line {:?}", peer, text),
    }
}
