//! Last-value cache for relay reads

use std::collections::HashMap;

use mockpi_protocol::{DeviceAddress, WireMessage};

/// Most recently received payload per `(device, register)` key
///
/// Entries are only ever written from received messages and never expire
/// within a session.
#[derive(Debug, Default, Clone)]
pub struct LastValueCache {
    entries: HashMap<(DeviceAddress, u8), Vec<u8>>,
}

impl LastValueCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a payload for `(address, register)`
    pub fn insert(&mut self, address: DeviceAddress, register: u8, payload: Vec<u8>) {
        self.entries.insert((address, register), payload);
    }

    /// Record a received message
    pub fn observe(&mut self, msg: &WireMessage) {
        self.insert(msg.address, msg.register, msg.payload.clone());
    }

    /// Last payload seen for `(address, register)`
    pub fn get(&self, address: DeviceAddress, register: u8) -> Option<&[u8]> {
        self.entries.get(&(address, register)).map(Vec::as_slice)
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been received yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resize `payload` to exactly `length` bytes, zero-extending the tail
pub(crate) fn fit(payload: &[u8], length: usize) -> Vec<u8> {
    let mut out = vec![0; length];
    let n = payload.len().min(length);
    out[..n].copy_from_slice(&payload[..n]);
    out
}
