//! Register worker
//!
//! A worker is one member of the broker's request/reply pool. It owns a
//! register store and, for every request frame:
//!
//! - applies the write to its store
//! - republishes the frame so subscribers observe the confirmed write
//! - echoes the frame back as the acknowledgment
//!
//! Malformed requests are answered with `ERR <reason>`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mockpi_protocol::{decode_frame, FrameCodec, WireMessage, REJECT_PREFIX};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::transport::open;
use crate::error::Result;
use crate::facade::RegisterBus;
use crate::local::LocalBus;
use crate::store::RegisterStore;

/// Request/reply pool member backed by a local register store
#[derive(Debug)]
pub struct RegisterWorker {
    bus: LocalBus,
    requests: TcpStream,
    publisher: TcpStream,
}

impl RegisterWorker {
    /// Connect to the broker's worker and publisher endpoints
    pub async fn connect(
        worker: SocketAddr,
        publish: SocketAddr,
        store: Arc<RegisterStore>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let requests = open(worker, connect_timeout).await?;
        let publisher = open(publish, connect_timeout).await?;
        info!("Register worker connected (worker {}, publish {})", worker, publish);
        Ok(Self {
            bus: LocalBus::new(store),
            requests,
            publisher,
        })
    }

    /// The store this worker applies writes to
    pub fn store(&self) -> &Arc<RegisterStore> {
        self.bus.store()
    }

    /// Serve requests until the broker closes the connection
    pub async fn run(mut self) -> Result<()> {
        let mut codec = FrameCodec::new();
        let mut buf = [0u8; 1024];

        loop {
            let n = self.requests.read(&mut buf).await?;
            if n == 0 {
                info!("Broker closed worker connection");
                return Ok(());
            }

            codec.push_bytes(&buf[..n]);
            while let Some(frame) = codec.next_frame() {
                let reply = match self.apply(&frame) {
                    Ok(msg) => {
                        let line = msg.encode_line();
                        self.publisher.write_all(&line).await?;
                        line
                    }
                    Err(reason) => {
                        warn!("Rejecting request {:?}: {}", frame, reason);
                        format!("{} {}\n", REJECT_PREFIX, reason).into_bytes()
                    }
                };
                self.requests.write_all(&reply).await?;
            }
        }
    }

    /// Decode and apply one request frame
    fn apply(&mut self, frame: &str) -> std::result::Result<WireMessage, String> {
        let msg = decode_frame(frame).map_err(|e| e.to_string())?;
        self.bus
            .write_block(msg.address, msg.register, &msg.payload)
            .map_err(|e| e.to_string())?;
        debug!("Applied {}", msg);
        Ok(msg)
    }
}
