//! Broker-relayed backend
//!
//! Each process keeps its own register mirror and [`LastValueCache`]; a
//! value becomes visible to a process only after a message carrying it has
//! been delivered there.
//! Messages from one publisher arrive in send order, but there is no
//! ordering between publishers: treat register values as eventually
//! consistent.

pub mod cache;
pub mod client;
mod transport;
pub mod worker;

pub use cache::LastValueCache;
pub use client::RelayBus;
pub use worker::RegisterWorker;
