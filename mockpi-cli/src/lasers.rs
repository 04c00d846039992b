//! Laser bank control
//!
//! Six lasers hang off one output byte. The hardware is active-low and
//! the wiring of lasers 4 and 5 is crossed, so the byte written is not the
//! mask the user typed.

use std::time::Duration;

use anyhow::Result;
use mockpi_bus::RegisterBus;
use mockpi_protocol::DeviceAddress;
use tracing::{debug, info};

/// Number of lasers in the bank
pub const LASER_COUNT: usize = 6;

/// Delay between steps of the cycle pattern
pub const CYCLE_STEP: Duration = Duration::from_millis(100);

/// On/off state of each laser
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaserState([bool; LASER_COUNT]);

impl LaserState {
    /// Build from a numeric mask, most significant of the six bits first
    ///
    /// The mask is reduced modulo 64; `0b100000` lights laser 0.
    pub fn from_mask(mask: u64) -> Self {
        let mask = mask % (1 << LASER_COUNT);
        let mut state = [false; LASER_COUNT];
        for (i, lit) in state.iter_mut().enumerate() {
            *lit = mask & (1 << (LASER_COUNT - 1 - i)) != 0;
        }
        Self(state)
    }

    pub fn set(&mut self, laser: usize, lit: bool) {
        self.0[laser % LASER_COUNT] = lit;
    }

    pub fn is_lit(&self, laser: usize) -> bool {
        self.0[laser % LASER_COUNT]
    }

    /// Byte to write to the device
    pub fn to_byte(self) -> u8 {
        let mut bits = self.0.map(|lit| !lit);
        bits.swap(4, 5);
        bits.iter()
            .enumerate()
            .fold(0u8, |byte, (i, &high)| byte | (u8::from(high) << i))
    }
}

/// Write one mask to the laser device
pub fn write_mask<B: RegisterBus>(bus: &mut B, device: DeviceAddress, mask: u64) -> Result<u8> {
    let byte = LaserState::from_mask(mask).to_byte();
    bus.write_byte(device, byte)?;
    info!("Lasers {:06b} -> wrote 0x{:02x} to {}", mask % 64, byte, device);
    Ok(byte)
}

/// Endless cycle: each step lights the next laser and turns off the one
/// two positions behind it
#[derive(Debug, Default)]
pub struct Cycle {
    state: LaserState,
    position: usize,
}

impl Cycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one step and return the new state
    pub fn step(&mut self) -> LaserState {
        self.position = (self.position + 1) % LASER_COUNT;
        self.state.set(self.position, true);
        self.state.set(self.position + LASER_COUNT - 2, false);
        self.state
    }
}

/// Run the cycle pattern until the future is dropped
pub async fn run_cycle<B: RegisterBus>(bus: &mut B, device: DeviceAddress) -> Result<()> {
    bus.write_byte(device, LaserState::default().to_byte())?;

    let mut cycle = Cycle::new();
    let mut ticker = tokio::time::interval(CYCLE_STEP);
    loop {
        ticker.tick().await;
        let state = cycle.step();
        let lit: Vec<usize> = (0..LASER_COUNT).filter(|&i| state.is_lit(i)).collect();
        debug!("Cycle step: lasers {:?} lit", lit);
        bus.write_byte(device, state.to_byte())?;
    }
}
