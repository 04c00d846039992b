//! Shared-memory backend
//!
//! Every [`LocalBus`] over the same [`RegisterStore`] sees the same
//! registers with strict read-after-write consistency. With a store opened
//! from a path that holds across processes too. Unseen devices read as
//! zero.

use std::sync::Arc;

use mockpi_protocol::DeviceAddress;
use tracing::debug;

use crate::error::Result;
use crate::facade::RegisterBus;
use crate::store::RegisterStore;

/// Bus client over a shared register store
#[derive(Debug, Clone)]
pub struct LocalBus {
    store: Arc<RegisterStore>,
}

impl LocalBus {
    /// Create a client over `store`
    pub fn new(store: Arc<RegisterStore>) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }
}

impl RegisterBus for LocalBus {
    fn read_byte_data(&mut self, address: DeviceAddress, register: u8) -> Result<u8> {
        let value = self.store.get(address, register as usize)?;
        debug!(
            "Read byte data: device={} register={} value={}",
            address, register, value
        );
        Ok(value)
    }

    fn write_byte_data(&mut self, address: DeviceAddress, register: u8, value: u8) -> Result<()> {
        debug!(
            "Write byte data: device={} register={} value={}",
            address, register, value
        );
        self.store.set(address, register as usize, value)
    }

    fn read_block(&mut self, address: DeviceAddress, start: u8, length: usize) -> Result<Vec<u8>> {
        let data = self.store.get_block(address, start as usize, length)?;
        debug!(
            "Read block data: device={} register={} value={:?}",
            address, start, data
        );
        Ok(data)
    }

    fn write_block(&mut self, address: DeviceAddress, start: u8, data: &[u8]) -> Result<()> {
        debug!(
            "Write block data: device={} register={} value={:?}",
            address, start, data
        );
        self.store.set_block(address, start as usize, data)
    }
}
