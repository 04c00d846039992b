//! Register watcher
//!
//! Polls the first registers of each device at a fixed rate and reports a
//! device whenever its block differs from the previous poll.

use std::collections::BTreeMap;
use std::time::Duration;

use mockpi_bus::{RegisterBus, Result};
use mockpi_protocol::DeviceAddress;

/// Registers sampled per device on each poll
pub const WATCH_LEN: usize = 10;

/// Tracks the last block seen for each watched device
#[derive(Debug, Default)]
pub struct Watcher {
    last: BTreeMap<DeviceAddress, Vec<u8>>,
}

impl Watcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll every device once, returning those whose block changed
    ///
    /// The first poll of a device always counts as a change.
    pub fn poll<B: RegisterBus>(
        &mut self,
        bus: &mut B,
        devices: &[DeviceAddress],
    ) -> Result<Vec<(DeviceAddress, Vec<u8>)>> {
        let mut changed = Vec::new();
        for &device in devices {
            let block = bus.read_block(device, 0, WATCH_LEN)?;
            if self.last.get(&device) != Some(&block) {
                self.last.insert(device, block.clone());
                changed.push((device, block));
            }
        }
        Ok(changed)
    }
}

/// Interval between polls for a frame rate (clamped to at least 1 Hz)
pub fn poll_interval(fps: u32) -> Duration {
    Duration::from_secs(1) / fps.max(1)
}

/// Hex rendering of a block: `30 00 ff`
pub fn format_block(block: &[u8]) -> String {
    block
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
