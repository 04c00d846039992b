//! Broker configuration

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};

/// Broker listening endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Publishers connect here to broadcast writes
    #[serde(default = "default_publish")]
    pub publish: SocketAddr,
    /// Subscribers connect here to receive writes
    #[serde(default = "default_subscribe")]
    pub subscribe: SocketAddr,
    /// Clients connect here for acknowledged writes
    #[serde(default = "default_request")]
    pub request: SocketAddr,
    /// Register workers connect here to serve acknowledged writes
    #[serde(default = "default_worker")]
    pub worker: SocketAddr,
    /// Frames buffered per subscriber before a slow one starts losing them
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port))
}

fn default_publish() -> SocketAddr {
    localhost(5559)
}

fn default_subscribe() -> SocketAddr {
    localhost(5560)
}

fn default_request() -> SocketAddr {
    localhost(5561)
}

fn default_worker() -> SocketAddr {
    localhost(5562)
}

fn default_channel_capacity() -> usize {
    1024
}

impl BrokerConfig {
    /// Every endpoint on an ephemeral localhost port (for tests)
    pub fn ephemeral() -> Self {
        Self {
            publish: localhost(0),
            subscribe: localhost(0),
            request: localhost(0),
            worker: localhost(0),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            publish: default_publish(),
            subscribe: default_subscribe(),
            request: default_request(),
            worker: default_worker(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_json() {
        let config: BrokerConfig =
            serde_json::from_str(r#"{ "publish": "0.0.0.0:6000" }"#).unwrap();
        assert_eq!(config.publish, "0.0.0.0:6000".parse().unwrap());
        assert_eq!(config.subscribe, localhost(5560));
        assert_eq!(config.worker, localhost(5562));
        assert_eq!(config.channel_capacity, 1024);
    }
}
