//! Broker connection tasks
//!
//! The relay client keeps two long-lived connections to the broker. Each
//! runs in its own spawned task and talks to the client through unbounded
//! channels, so the client's bus calls never block on the network.

use std::net::SocketAddr;
use std::time::Duration;

use mockpi_protocol::{FrameCodec, WireMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{BusError, Result};

/// Open a TCP connection to the broker, bounded by `timeout`
pub(crate) async fn open(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(BusError::Disconnected(format!("{addr}: {e}"))),
        Err(_) => Err(BusError::Disconnected(format!(
            "{addr}: connect timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Forward encoded frames to the broker's publisher endpoint
///
/// Ends when the client drops its sender or the broker goes away; the
/// client then sees [`BusError::Disconnected`] on its next write.
pub(crate) async fn run_publisher(mut stream: TcpStream, mut frames: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = stream.write_all(&frame).await {
            warn!("Publisher connection lost: {}", e);
            break;
        }
    }
    debug!("Publisher task ended");
}

/// Deliver decoded messages from the broker's subscriber endpoint
///
/// Control lines (subscribe/unsubscribe) travel upstream on the same
/// connection. Malformed frames are discarded by the codec.
pub(crate) async fn run_subscriber(
    stream: TcpStream,
    mut control: mpsc::UnboundedReceiver<String>,
    inbox: mpsc::UnboundedSender<WireMessage>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut codec = FrameCodec::new();
    let mut buf = [0u8; 1024];

    loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        warn!("Broker closed subscriber connection");
                        break;
                    }
                    Ok(n) => {
                        codec.push_bytes(&buf[..n]);
                        while let Some(msg) = codec.next_message() {
                            if inbox.send(msg).is_err() {
                                debug!("Relay client dropped; stopping subscriber task");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Subscriber connection error: {}", e);
                        break;
                    }
                }
            }

            line = control.recv() => {
                match line {
                    Some(line) => {
                        debug!("Subscription control: {}", line.trim_end());
                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            warn!("Failed to send subscription control: {}", e);
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    debug!("Subscriber task ended");
}
