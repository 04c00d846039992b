//! Command-line arguments

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Simulated I2C register bus
#[derive(Parser, Debug)]
#[command(name = "mockpi", version, about = "Simulated I2C register bus")]
pub struct Cli {
    /// Path to the settings file (default: $XDG_CONFIG_HOME/mockpi/settings.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Use the relay backend regardless of the settings file
    #[arg(long, global = true)]
    pub relay: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the message broker until Ctrl+C
    Broker,

    /// Serve acknowledged writes from a local register store
    Worker,

    /// Read registers from a device
    Read {
        /// Device name or address
        device: String,
        /// First register
        #[arg(default_value = "0", value_parser = parse_byte)]
        register: u8,
        /// Number of registers to read
        #[arg(short, long, default_value_t = 1)]
        len: usize,
        /// How long the relay backend may wait for a value before
        /// falling back to zeros
        #[arg(long, default_value_t = 500)]
        wait_ms: u64,
    },

    /// Write registers on a device
    Write {
        /// Device name or address
        device: String,
        /// First register
        #[arg(value_parser = parse_byte)]
        register: u8,
        /// Values to write, decimal or 0x-prefixed hex
        #[arg(required = true, value_parser = parse_byte)]
        values: Vec<u8>,
        /// Wait for a register worker to confirm the write (relay only)
        #[arg(long)]
        confirm: bool,
    },

    /// Set the laser bank: a decimal mask, or `cycle`
    Lasers {
        pattern: String,
    },

    /// Print device registers whenever they change
    Watch {
        /// Devices to watch (default: every named device)
        devices: Vec<String>,
    },

    /// Print the effective settings
    Config {
        /// Also save them to the settings file
        #[arg(long)]
        write: bool,
    },
}

/// Parse a byte written as decimal or 0x-prefixed hex
pub fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("{s:?} is not a byte: {e}"))
}
