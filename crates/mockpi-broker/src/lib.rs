//! Message broker for the relay bus backend
//!
//! The broker listens on four TCP endpoints:
//!
//! - **publish**: clients write newline-terminated frames here
//! - **subscribe**: clients send `SUB <prefix>` / `UNSUB <prefix>` lines and
//!   receive every published frame whose text starts with one of their prefixes
//! - **request**: clients send one frame and wait for one reply
//! - **worker**: register workers receive requests and send back replies
//!
//! Frames are forwarded as opaque bytes; the broker never decodes them.
//!
//! ```no_run
//! use mockpi_broker::{Broker, BrokerConfig};
//!
//! # async fn example() -> Result<(), mockpi_broker::BrokerError> {
//! let broker = Broker::bind(&BrokerConfig::default()).await?;
//! let handle = broker.spawn()?;
//! println!("publish endpoint: {}", handle.addrs().publish);
//! handle.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod broker;
mod config;
mod dispatch;
mod error;
mod fanout;
mod frame;

pub use broker::{Broker, BrokerAddrs, BrokerCommand, BrokerHandle};
pub use config::BrokerConfig;
pub use dispatch::WorkerId;
pub use error::BrokerError;
pub use frame::Frame;
