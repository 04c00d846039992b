//! Integration tests for the broker
//!
//! These tests talk to a broker on ephemeral localhost ports using plain
//! TCP sockets, exercising:
//! - Prefix-filtered fan-out from publishers to subscribers
//! - Oversize lines dropped without disturbing the connection
//! - Request/reply dispatch through workers
//! - Backlogged requests, abandoned requests, and shutdown

use std::net::SocketAddr;
use std::time::Duration;

use mockpi_broker::{Broker, BrokerConfig, BrokerHandle};
use mockpi_protocol::MAX_FRAME_LEN;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Time allowed for control lines to reach the broker
    pub const SETTLE: Duration = Duration::from_millis(100);

    pub async fn start_broker() -> BrokerHandle {
        let broker = Broker::bind(&BrokerConfig::ephemeral()).await.unwrap();
        broker.spawn().unwrap()
    }

    pub struct Peer {
        pub reader: BufReader<OwnedReadHalf>,
        pub writer: OwnedWriteHalf,
    }

    impl Peer {
        pub async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self {
                reader: BufReader::new(reader),
                writer,
            }
        }

        pub async fn send(&mut self, text: &str) {
            self.writer.write_all(text.as_bytes()).await.unwrap();
        }

        /// Next line without its terminator, or `None` if nothing arrives in time
        pub async fn recv(&mut self, within: Duration) -> Option<String> {
            let mut line = String::new();
            match tokio::time::timeout(within, self.reader.read_line(&mut line)).await {
                Ok(Ok(n)) if n > 0 => Some(line.trim_end().to_string()),
                _ => None,
            }
        }
    }
}

use helpers::*;

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_frames_routed_by_prefix() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut dev5 = Peer::connect(addrs.subscribe).await;
    let mut dev6 = Peer::connect(addrs.subscribe).await;
    dev5.send("SUB 5 \n").await;
    dev6.send("SUB 6 \n").await;
    tokio::time::sleep(SETTLE).await;

    let mut publisher = Peer::connect(addrs.publish).await;
    publisher.send("5 0 1\n6 0 2\n7 0 3\n55 0 4\n").await;

    assert_eq!(dev5.recv(Duration::from_secs(2)).await.as_deref(), Some("5 0 1"));
    assert_eq!(dev6.recv(Duration::from_secs(2)).await.as_deref(), Some("6 0 2"));
    assert_eq!(dev5.recv(SETTLE).await, None);
    assert_eq!(dev6.recv(SETTLE).await, None);

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscriber_without_filters_receives_nothing() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut silent = Peer::connect(addrs.subscribe).await;
    let mut everything = Peer::connect(addrs.subscribe).await;
    everything.send("SUB \n").await;
    tokio::time::sleep(SETTLE).await;

    let mut publisher = Peer::connect(addrs.publish).await;
    publisher.send("1 0 1\n").await;

    assert_eq!(everything.recv(Duration::from_secs(2)).await.as_deref(), Some("1 0 1"));
    assert_eq!(silent.recv(SETTLE).await, None);

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut sub = Peer::connect(addrs.subscribe).await;
    sub.send("SUB 9 0 \n").await;
    tokio::time::sleep(SETTLE).await;

    let mut publisher = Peer::connect(addrs.publish).await;
    publisher.send("9 0 1\n").await;
    assert_eq!(sub.recv(Duration::from_secs(2)).await.as_deref(), Some("9 0 1"));

    sub.send("UNSUB 9 0 \n").await;
    tokio::time::sleep(SETTLE).await;
    publisher.send("9 0 2\n").await;
    assert_eq!(sub.recv(SETTLE).await, None);

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_garbage_forwarded_unchanged() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut sub = Peer::connect(addrs.subscribe).await;
    sub.send("SUB \n").await;
    tokio::time::sleep(SETTLE).await;

    let mut publisher = Peer::connect(addrs.publish).await;
    publisher.send("not a frame\n2 0 7\n").await;

    assert_eq!(sub.recv(Duration::from_secs(2)).await.as_deref(), Some("not a frame"));
    assert_eq!(sub.recv(Duration::from_secs(2)).await.as_deref(), Some("2 0 7"));

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_carriage_return_forwarded_as_sent() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut sub = Peer::connect(addrs.subscribe).await;
    sub.send("SUB \r\n").await;
    tokio::time::sleep(SETTLE).await;

    let mut publisher = Peer::connect(addrs.publish).await;
    publisher.send("4 0 1\r\n").await;

    let mut line = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), sub.reader.read_until(b'\n', &mut line))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(line, b"4 0 1\r\n");

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_oversize_line_dropped() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut sub = Peer::connect(addrs.subscribe).await;
    sub.send("SUB \n").await;
    tokio::time::sleep(SETTLE).await;

    let mut publisher = Peer::connect(addrs.publish).await;
    let flood = "8".repeat(MAX_FRAME_LEN * 64);
    publisher.send(&flood).await;
    publisher.send("\n2 0 7\n").await;

    assert_eq!(sub.recv(Duration::from_secs(2)).await.as_deref(), Some("2 0 7"));
    assert_eq!(sub.recv(SETTLE).await, None);

    broker.shutdown().await.unwrap();
}

// ============================================================================
// Request/reply
// ============================================================================

#[tokio::test]
async fn test_request_answered_by_worker() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut worker = Peer::connect(addrs.worker).await;
    tokio::time::sleep(SETTLE).await;

    let mut client = Peer::connect(addrs.request).await;
    client.send("58 0 48\n").await;

    let request = worker.recv(Duration::from_secs(2)).await;
    assert_eq!(request.as_deref(), Some("58 0 48"));
    worker.send("58 0 48\n").await;

    assert_eq!(client.recv(Duration::from_secs(2)).await.as_deref(), Some("58 0 48"));

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_requests_spread_across_workers() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut first = Peer::connect(addrs.worker).await;
    let mut second = Peer::connect(addrs.worker).await;
    tokio::time::sleep(SETTLE).await;

    let mut a = Peer::connect(addrs.request).await;
    let mut b = Peer::connect(addrs.request).await;
    a.send("1 0 1\n").await;
    tokio::time::sleep(SETTLE).await;
    b.send("1 0 2\n").await;

    let got_first = first.recv(Duration::from_secs(2)).await.unwrap();
    let got_second = second.recv(Duration::from_secs(2)).await.unwrap();
    let mut seen = vec![got_first.clone(), got_second.clone()];
    seen.sort();
    assert_eq!(seen, vec!["1 0 1".to_string(), "1 0 2".to_string()]);

    first.send(&format!("{got_first}\n")).await;
    second.send(&format!("{got_second}\n")).await;

    assert_eq!(a.recv(Duration::from_secs(2)).await.as_deref(), Some("1 0 1"));
    assert_eq!(b.recv(Duration::from_secs(2)).await.as_deref(), Some("1 0 2"));

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_request_waits_for_worker() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut client = Peer::connect(addrs.request).await;
    client.send("3 1 2 3\n").await;
    tokio::time::sleep(SETTLE).await;

    let mut worker = Peer::connect(addrs.worker).await;
    assert_eq!(worker.recv(Duration::from_secs(2)).await.as_deref(), Some("3 1 2 3"));
    worker.send("ERR device busy\n").await;

    assert_eq!(
        client.recv(Duration::from_secs(2)).await.as_deref(),
        Some("ERR device busy")
    );

    broker.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_request_never_reaches_worker() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut quitter = Peer::connect(addrs.request).await;
    quitter.send("58 0 85\n").await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    drop(quitter);
    tokio::time::sleep(SETTLE).await;

    let mut worker = Peer::connect(addrs.worker).await;
    assert_eq!(worker.recv(Duration::from_millis(500)).await, None);

    // A client that stays still gets served.
    let mut client = Peer::connect(addrs.request).await;
    client.send("58 1 7\n").await;
    assert_eq!(worker.recv(Duration::from_secs(2)).await.as_deref(), Some("58 1 7"));
    worker.send("58 1 7\n").await;
    assert_eq!(client.recv(Duration::from_secs(2)).await.as_deref(), Some("58 1 7"));

    broker.shutdown().await.unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let broker = start_broker().await;
    let addrs = *broker.addrs();

    let mut sub = Peer::connect(addrs.subscribe).await;
    sub.send("SUB \n").await;
    tokio::time::sleep(SETTLE).await;

    broker.shutdown().await.unwrap();

    let mut line = String::new();
    let n = tokio::time::timeout(Duration::from_secs(2), sub.reader.read_line(&mut line))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(TcpStream::connect(addrs.publish).await.is_err());
}

#[tokio::test]
async fn test_bind_conflict_reported() {
    let broker = start_broker().await;
    let mut config = BrokerConfig::ephemeral();
    config.subscribe = broker.addrs().subscribe;

    let err = Broker::bind(&config).await.err().unwrap();
    assert!(err.to_string().contains("subscribe"));

    broker.shutdown().await.unwrap();
}
