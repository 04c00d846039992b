//! Relay bus client
//!
//! [`RelayBus`] reconstructs register values from messages flowing through
//! the broker. Every received message is applied, in arrival order, to a
//! private register mirror. Writes are published fire-and-forget; reads
//! never wait:
//!
//! 1. declare interest in `(device, register)` with the broker
//! 2. apply every pending message to the mirror
//! 3. answer from the mirror, or with zeros for a device never heard from
//!
//! Once a message for the requested key has been consumed the interest is
//! withdrawn, so irrelevant traffic does not pile up in the client.
//!
//! [`RelayBus::write_confirmed`] is the one blocking call: it sends the
//! write through the broker's request endpoint to a register worker and
//! waits, up to the configured bound, for the worker to echo it back.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use mockpi_protocol::{DeviceAddress, Filter, WireMessage, REJECT_PREFIX};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::{fit, LastValueCache};
use super::transport::{open, run_publisher, run_subscriber};
use crate::config::RelayConfig;
use crate::error::{BusError, Result};
use crate::facade::RegisterBus;
use crate::store::{RegisterStore, DEFAULT_REGISTERS};

/// Register bus client connected to a broker
pub struct RelayBus {
    publish_tx: mpsc::UnboundedSender<Vec<u8>>,
    control_tx: mpsc::UnboundedSender<String>,
    inbox: mpsc::UnboundedReceiver<WireMessage>,
    cache: LastValueCache,
    mirror: RegisterStore,
    interest: HashSet<Filter>,
    requester: Option<Requester>,
    request_addr: Option<SocketAddr>,
    ack_timeout: Duration,
    connect_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayBus {
    /// Connect to the broker's publisher and subscriber endpoints
    ///
    /// The request endpoint is connected lazily on the first acknowledged
    /// write.
    pub async fn connect(config: &RelayConfig) -> Result<Self> {
        let publisher = open(config.publish, config.connect_timeout()).await?;
        let subscriber = open(config.subscribe, config.connect_timeout()).await?;

        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        let tasks = vec![
            tokio::spawn(run_publisher(publisher, publish_rx)),
            tokio::spawn(run_subscriber(subscriber, control_rx, inbox_tx)),
        ];

        info!(
            "Relay bus connected (publish {}, subscribe {})",
            config.publish, config.subscribe
        );

        Ok(Self {
            publish_tx,
            control_tx,
            inbox,
            cache: LastValueCache::new(),
            mirror: RegisterStore::new(DEFAULT_REGISTERS),
            interest: HashSet::new(),
            requester: None,
            request_addr: config.request,
            ack_timeout: config.ack_timeout(),
            connect_timeout: config.connect_timeout(),
            tasks,
        })
    }

    /// Publish a message without waiting for anyone to receive it
    pub fn publish(&self, msg: &WireMessage) -> Result<()> {
        debug!("Publishing {}", msg);
        self.publish_tx
            .send(msg.encode_line())
            .map_err(|_| BusError::Disconnected("publisher connection closed".into()))
    }

    /// Ask the broker to deliver messages matching `filter`
    pub fn subscribe(&mut self, filter: Filter) -> Result<()> {
        if self.interest.insert(filter) {
            self.control_tx
                .send(filter.subscribe_line())
                .map_err(|_| BusError::Disconnected("subscriber connection closed".into()))?;
        }
        Ok(())
    }

    /// Withdraw interest in `filter`
    pub fn unsubscribe(&mut self, filter: Filter) -> Result<()> {
        if self.interest.remove(&filter) {
            self.control_tx
                .send(filter.unsubscribe_line())
                .map_err(|_| BusError::Disconnected("subscriber connection closed".into()))?;
        }
        Ok(())
    }

    /// Filters currently declared to the broker
    pub fn interests(&self) -> impl Iterator<Item = &Filter> {
        self.interest.iter()
    }

    /// Take every message that has already arrived, without waiting
    ///
    /// Each message is applied to the mirror and the cache before it is
    /// returned.
    pub fn poll(&mut self) -> Result<Vec<WireMessage>> {
        let mut received = Vec::new();
        loop {
            match self.inbox.try_recv() {
                Ok(msg) => {
                    self.mirror
                        .set_block(msg.address, msg.register as usize, &msg.payload)?;
                    self.cache.observe(&msg);
                    received.push(msg);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if received.is_empty() {
                        return Err(BusError::Disconnected(
                            "subscriber connection closed".into(),
                        ));
                    }
                    break;
                }
            }
        }
        Ok(received)
    }

    /// Send every queued write, then close the broker connections
    ///
    /// Writes are queued for a background task, so a short-lived process
    /// should call this before exiting or its last writes may never leave.
    pub async fn close(mut self) {
        let (closed, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.publish_tx, closed));

        let mut tasks = std::mem::take(&mut self.tasks).into_iter();
        if let Some(publisher) = tasks.next() {
            if tokio::time::timeout(self.connect_timeout, publisher).await.is_err() {
                warn!("Timed out flushing queued writes");
            }
        }
        for task in tasks {
            task.abort();
        }
    }

    /// Last payload received for `(address, register)`, if any
    pub fn cached(&self, address: DeviceAddress, register: u8) -> Option<&[u8]> {
        self.cache.get(address, register)
    }

    /// The last-value cache
    pub fn cache(&self) -> &LastValueCache {
        &self.cache
    }

    /// Registers as rebuilt from every message received so far
    pub fn mirror(&self) -> &RegisterStore {
        &self.mirror
    }

    /// Whether any message for `address` has been received
    pub fn has_data(&self, address: DeviceAddress) -> Result<bool> {
        Ok(self.mirror.snapshot(address)?.is_some())
    }

    /// Non-blocking read of `length` bytes at `(address, register)`
    fn read_latest(&mut self, address: DeviceAddress, register: u8, length: usize) -> Result<Vec<u8>> {
        let filter = Filter::Register(address, register);
        self.subscribe(filter)?;

        let fresh = self
            .poll()?
            .into_iter()
            .rev()
            .find(|msg| filter.matches(msg));

        if let Some(msg) = fresh {
            // Pad before caching so the cache honours the block length
            // of the request that populated it.
            self.cache
                .insert(address, register, fit(&msg.payload, msg.payload.len().max(length)));
            self.unsubscribe(filter)?;
        }

        // Snapshot rather than get_block: a read must not create the device.
        match self.mirror.snapshot(address)? {
            Some(file) => Ok(file.read_block(register as usize, length)),
            None => {
                debug!(
                    "No data for device {} register {}; returning {} zero byte(s)",
                    address, register, length
                );
                Ok(vec![0; length])
            }
        }
    }

    /// Write `msg` through a register worker and wait for its echo
    ///
    /// Fails with [`BusError::AckTimeout`] if no confirmation arrives within
    /// the configured bound. The write is not retried.
    pub async fn write_confirmed(&mut self, msg: &WireMessage) -> Result<()> {
        let addr = self
            .request_addr
            .ok_or(BusError::NotConfigured("relay request endpoint"))?;

        let mut requester = match self.requester.take() {
            Some(requester) => requester,
            None => Requester::connect(addr, self.connect_timeout).await?,
        };

        // On failure the connection may still deliver a late reply, so it is
        // dropped rather than put back.
        let reply = requester.request(msg, self.ack_timeout).await?;
        self.requester = Some(requester);

        if let Some(reason) = reply.strip_prefix(REJECT_PREFIX) {
            return Err(BusError::Rejected(reason.trim().to_string()));
        }
        let echo = WireMessage::decode(&reply)?;
        if echo != *msg {
            return Err(BusError::Rejected(format!(
                "acknowledged {echo:?} instead of {msg:?}"
            )));
        }
        debug!("Write confirmed: {}", msg);
        Ok(())
    }

    /// Acknowledged single-register write
    pub async fn write_byte_data_confirmed(
        &mut self,
        address: DeviceAddress,
        register: u8,
        value: u8,
    ) -> Result<()> {
        self.write_confirmed(&WireMessage::byte(address, register, value))
            .await
    }

    /// Acknowledged block write
    pub async fn write_block_confirmed(
        &mut self,
        address: DeviceAddress,
        start: u8,
        data: &[u8],
    ) -> Result<()> {
        self.write_confirmed(&WireMessage::new(address, start, data.to_vec()))
            .await
    }
}

impl RegisterBus for RelayBus {
    fn read_byte_data(&mut self, address: DeviceAddress, register: u8) -> Result<u8> {
        Ok(self.read_latest(address, register, 1)?[0])
    }

    fn write_byte_data(&mut self, address: DeviceAddress, register: u8, value: u8) -> Result<()> {
        self.publish(&WireMessage::byte(address, register, value))
    }

    fn read_block(&mut self, address: DeviceAddress, start: u8, length: usize) -> Result<Vec<u8>> {
        self.read_latest(address, start, length)
    }

    fn write_block(&mut self, address: DeviceAddress, start: u8, data: &[u8]) -> Result<()> {
        self.publish(&WireMessage::new(address, start, data.to_vec()))
    }
}

impl fmt::Debug for RelayBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayBus")
            .field("cache", &self.cache)
            .field("mirror", &self.mirror)
            .field("interest", &self.interest)
            .field("request_addr", &self.request_addr)
            .field("ack_timeout", &self.ack_timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for RelayBus {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Connection to the broker's request endpoint
struct Requester {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Requester {
    async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = open(addr, timeout).await?;
        let (reader, writer) = stream.into_split();
        debug!("Connected to request endpoint {}", addr);
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send one request line and wait for one reply line
    async fn request(&mut self, msg: &WireMessage, timeout: Duration) -> Result<String> {
        self.writer.write_all(&msg.encode_line()).await?;

        let mut line = String::new();
        match tokio::time::timeout(timeout, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(BusError::Disconnected("request connection closed".into())),
            Ok(Ok(_)) => Ok(line.trim_end().to_string()),
            Ok(Err(e)) => Err(BusError::Io(e)),
            Err(_) => {
                warn!(
                    "No acknowledgment for {} within {}ms",
                    msg,
                    timeout.as_millis()
                );
                Err(BusError::AckTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}
