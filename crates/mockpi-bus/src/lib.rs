//! Simulated Register Bus
//!
//! This crate lets a hardware-control program and any number of simulators
//! agree on the contents of a small device register space without touching
//! a real I2C bus.
//!
//! # Backends
//!
//! - **Local**: every [`LocalBus`] over the same [`RegisterStore`] sees the
//!   same registers, with strict read-after-write consistency. A store
//!   opened from a path is shared with every process that opens that path.
//! - **Relay**: a [`RelayBus`] publishes writes to a broker and mirrors
//!   register values from the messages it receives, so reads never block
//!
//! Both implement [`RegisterBus`], the SMBus-shaped API the drivers call.
//! [`Bus`] picks one from a [`BusConfig`].
//!
//! # Example
//!
//! ```rust
//! use mockpi_bus::{LocalBus, RegisterBus, RegisterStore};
//! use mockpi_protocol::DeviceAddress;
//!
//! let store = RegisterStore::shared(64);
//! let mut driver = LocalBus::new(store.clone());
//! let mut simulator = LocalBus::new(store);
//!
//! let lasers = DeviceAddress(0x3a);
//! driver.write_byte(lasers, 0b11_0000).unwrap();
//! assert_eq!(simulator.read_byte(lasers).unwrap(), 0b11_0000);
//!
//! simulator.write_block(lasers, 1, &[1, 2, 3]).unwrap();
//! assert_eq!(driver.read_block(lasers, 1, 5).unwrap(), vec![1, 2, 3, 0, 0]);
//! ```

pub mod config;
pub mod error;
pub mod facade;
pub mod local;
pub mod mapped;
pub mod relay;
pub mod store;

pub use config::{Backend, BusConfig, LocalConfig, RelayConfig};
pub use error::{BusError, Result};
pub use facade::{Bus, RegisterBus};
pub use local::LocalBus;
pub use relay::{LastValueCache, RegisterWorker, RelayBus};
pub use store::{RegisterFile, RegisterStore, DEFAULT_REGISTERS};
