//! Bus configuration

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_REGISTERS;

/// Default broker endpoint that publishers connect to
pub const DEFAULT_PUBLISH_PORT: u16 = 5559;
/// Default broker endpoint that subscribers connect to
pub const DEFAULT_SUBSCRIBE_PORT: u16 = 5560;
/// Default broker endpoint for acknowledged writes
pub const DEFAULT_REQUEST_PORT: u16 = 5561;

/// Which backend a [`Bus`](crate::Bus) uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Register store in a file mapped by every process on the host
    #[default]
    Local,
    /// Broker-relayed publish/subscribe
    Relay,
}

/// Bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: Backend,
    /// Registers per device for newly created register files
    #[serde(default = "default_registers")]
    pub registers: usize,
    /// Local store location (ignored by the relay backend)
    #[serde(default)]
    pub local: LocalConfig,
    /// Relay endpoints (ignored by the local backend)
    #[serde(default)]
    pub relay: RelayConfig,
}

fn default_registers() -> usize {
    DEFAULT_REGISTERS
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            registers: DEFAULT_REGISTERS,
            local: LocalConfig::default(),
            relay: RelayConfig::default(),
        }
    }
}

/// Where the local backend keeps its register store
///
/// Processes share registers exactly when they use the same path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Backing file of the process-shared store
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    std::env::temp_dir().join("mockpi").join("registers")
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Relay backend endpoints and timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Broker endpoint that receives published writes
    #[serde(default = "default_publish")]
    pub publish: SocketAddr,
    /// Broker endpoint that delivers messages to subscribers
    #[serde(default = "default_subscribe")]
    pub subscribe: SocketAddr,
    /// Broker endpoint for acknowledged writes (disabled when absent)
    #[serde(default = "default_request")]
    pub request: Option<SocketAddr>,
    /// How long an acknowledged write waits for its confirmation
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// How long to wait for each broker connection to open
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

fn default_publish() -> SocketAddr {
    localhost(DEFAULT_PUBLISH_PORT)
}

fn default_subscribe() -> SocketAddr {
    localhost(DEFAULT_SUBSCRIBE_PORT)
}

fn default_request() -> Option<SocketAddr> {
    Some(localhost(DEFAULT_REQUEST_PORT))
}

fn default_ack_timeout_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

impl RelayConfig {
    /// Acknowledgment bound as a duration
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Connection bound as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            publish: default_publish(),
            subscribe: default_subscribe(),
            request: default_request(),
            ack_timeout_ms: default_ack_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}
