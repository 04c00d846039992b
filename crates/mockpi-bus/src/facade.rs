//! Uniform bus API
//!
//! [`RegisterBus`] mirrors the SMBus calls a hardware driver already makes,
//! so the same driver code runs against either backend. [`Bus`] selects the
//! backend from configuration.

use mockpi_protocol::DeviceAddress;

use crate::config::{Backend, BusConfig};
use crate::error::Result;
use crate::local::LocalBus;
use crate::relay::RelayBus;
use crate::store::RegisterStore;

/// Register-level bus operations
///
/// `read_byte`/`write_byte` address register 0. Block reads always return
/// exactly `length` bytes.
pub trait RegisterBus {
    /// Read one register
    fn read_byte_data(&mut self, address: DeviceAddress, register: u8) -> Result<u8>;

    /// Write one register
    fn write_byte_data(&mut self, address: DeviceAddress, register: u8, value: u8) -> Result<()>;

    /// Read `length` registers starting at `start`
    fn read_block(&mut self, address: DeviceAddress, start: u8, length: usize) -> Result<Vec<u8>>;

    /// Write `data` starting at `start`
    fn write_block(&mut self, address: DeviceAddress, start: u8, data: &[u8]) -> Result<()>;

    /// Read register 0
    fn read_byte(&mut self, address: DeviceAddress) -> Result<u8> {
        self.read_byte_data(address, 0)
    }

    /// Write register 0
    fn write_byte(&mut self, address: DeviceAddress, value: u8) -> Result<()> {
        self.write_byte_data(address, 0, value)
    }

    /// SMBus spelling of [`read_block`](Self::read_block)
    fn read_i2c_block_data(
        &mut self,
        address: DeviceAddress,
        start: u8,
        length: usize,
    ) -> Result<Vec<u8>> {
        self.read_block(address, start, length)
    }

    /// SMBus spelling of [`write_block`](Self::write_block)
    fn write_i2c_block_data(&mut self, address: DeviceAddress, start: u8, data: &[u8]) -> Result<()> {
        self.write_block(address, start, data)
    }
}

/// A bus backed by whichever backend the configuration selects
#[derive(Debug)]
pub enum Bus {
    /// Process-shared register store
    Local(LocalBus),
    /// Broker-relayed publish/subscribe
    Relay(RelayBus),
}

impl Bus {
    /// Open the configured backend
    ///
    /// The local backend maps the store at `config.local.path`, so every
    /// process opening the same configuration sees the same registers.
    pub async fn open(config: &BusConfig) -> Result<Self> {
        match config.backend {
            Backend::Local => {
                let store = RegisterStore::open(&config.local.path, config.registers)?;
                Ok(Bus::Local(LocalBus::new(store)))
            }
            Backend::Relay => Ok(Bus::Relay(RelayBus::connect(&config.relay).await?)),
        }
    }

    /// Which backend this bus uses
    pub fn backend(&self) -> Backend {
        match self {
            Bus::Local(_) => Backend::Local,
            Bus::Relay(_) => Backend::Relay,
        }
    }

    /// Flush pending writes and release the backend
    pub async fn close(self) {
        if let Bus::Relay(bus) = self {
            bus.close().await;
        }
    }

    fn inner(&mut self) -> &mut dyn RegisterBus {
        match self {
            Bus::Local(bus) => bus,
            Bus::Relay(bus) => bus,
        }
    }
}

impl RegisterBus for Bus {
    fn read_byte_data(&mut self, address: DeviceAddress, register: u8) -> Result<u8> {
        self.inner().read_byte_data(address, register)
    }

    fn write_byte_data(&mut self, address: DeviceAddress, register: u8, value: u8) -> Result<()> {
        self.inner().write_byte_data(address, register, value)
    }

    fn read_block(&mut self, address: DeviceAddress, start: u8, length: usize) -> Result<Vec<u8>> {
        self.inner().read_block(address, start, length)
    }

    fn write_block(&mut self, address: DeviceAddress, start: u8, data: &[u8]) -> Result<()> {
        self.inner().write_block(address, start, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_local_shares_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BusConfig::default();
        config.registers = 16;
        config.local.path = dir.path().join("registers");

        let mut a = Bus::open(&config).await.unwrap();
        let mut b = Bus::open(&config).await.unwrap();
        assert_eq!(a.backend(), Backend::Local);

        a.write_byte(DeviceAddress(1), 42).unwrap();
        assert_eq!(b.read_byte(DeviceAddress(1)).unwrap(), 42);
        assert_eq!(b.read_i2c_block_data(DeviceAddress(1), 0, 2).unwrap(), vec![42, 0]);
    }
}
