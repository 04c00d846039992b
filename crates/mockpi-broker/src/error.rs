//! Error types for the broker

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can stop the broker
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A listening endpoint could not be bound
    #[error("failed to bind {endpoint} endpoint {addr}: {source}")]
    Bind {
        /// Which endpoint (publish, subscribe, request, worker)
        endpoint: &'static str,
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
