//! mockpi - command-line front end for the simulated register bus
//!
//! Runs the broker and register workers, and issues one-off bus calls
//! (read, write, lasers) or watches devices through whichever backend the
//! settings select.

mod cli;
mod lasers;
mod settings;
mod watch;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mockpi_broker::{Broker, BrokerCommand};
use mockpi_bus::{Backend, Bus, RegisterBus, RegisterStore, RegisterWorker};
use mockpi_protocol::{DeviceAddress, Filter};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Command};
use settings::{LogFormat, Settings};
use watch::{format_block, poll_interval, Watcher};

/// Default log filter, covering every crate in the workspace
const DEFAULT_FILTER: &str = "mockpi=info,mockpi_protocol=info,mockpi_bus=info,mockpi_broker=info";

/// How often `read` re-checks the relay backend while waiting
const READ_POLL: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.relay {
        settings.bus.backend = Backend::Relay;
    }

    init_logging(cli.log_level.as_deref(), settings.logging.format);
    debug!("Settings: {:?}", settings);

    match cli.command {
        Command::Broker => run_broker(&settings).await,
        Command::Worker => run_worker(&settings).await,
        Command::Read {
            device,
            register,
            len,
            wait_ms,
        } => read(&settings, &device, register, len, Duration::from_millis(wait_ms)).await,
        Command::Write {
            device,
            register,
            values,
            confirm,
        } => write(&settings, &device, register, &values, confirm).await,
        Command::Lasers { pattern } => run_lasers(&settings, &pattern).await,
        Command::Watch { devices } => run_watch(&settings, &devices).await,
        Command::Config { write } => show_config(&settings, cli.config.as_deref(), write),
    }
}

/// Install the global subscriber; logs go to stderr so stdout stays clean
fn init_logging(log_level: Option<&str>, format: LogFormat) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
    };
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn open_bus(settings: &Settings) -> Result<Bus> {
    let bus = Bus::open(&settings.bus)
        .await
        .context("Failed to open bus")?;
    if bus.backend() == Backend::Local {
        debug!("Local backend: register store at {}", settings.bus.local.path.display());
    }
    Ok(bus)
}

async fn run_broker(settings: &Settings) -> Result<()> {
    let broker = Broker::bind(&settings.broker)
        .await
        .context("Failed to start broker")?;

    let (cmd_tx, cmd_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl+C received");
                let _ = cmd_tx.send(BrokerCommand::Shutdown).await;
            }
            Err(e) => {
                warn!("Cannot listen for Ctrl+C: {}", e);
                // Hold the sender so the broker keeps running.
                std::future::pending::<()>().await;
            }
        }
    });

    broker.run(cmd_rx).await?;
    Ok(())
}

async fn run_worker(settings: &Settings) -> Result<()> {
    // Confirmed writes land in the same store local-backend processes use.
    let store = RegisterStore::open(&settings.bus.local.path, settings.bus.registers)
        .with_context(|| {
            format!(
                "Failed to open register store {}",
                settings.bus.local.path.display()
            )
        })?;
    let worker = RegisterWorker::connect(
        settings.broker.worker,
        settings.bus.relay.publish,
        store,
        settings.bus.relay.connect_timeout(),
    )
    .await
    .context("Failed to connect worker to broker")?;

    tokio::select! {
        result = worker.run() => result.context("Worker stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Worker stopping"),
    }
    Ok(())
}

async fn read(
    settings: &Settings,
    device: &str,
    register: u8,
    len: usize,
    wait: Duration,
) -> Result<()> {
    let address = settings.resolve_device(device)?;
    let mut bus = open_bus(settings).await?;

    let data = match &mut bus {
        // Relay reads never block, so give in-flight traffic a moment to
        // arrive before settling for the fallback.
        Bus::Relay(relay) => {
            let deadline = Instant::now() + wait;
            loop {
                let data = relay.read_block(address, register, len)?;
                if relay.has_data(address)? || Instant::now() >= deadline {
                    break data;
                }
                tokio::time::sleep(READ_POLL).await;
            }
        }
        Bus::Local(local) => local.read_block(address, register, len)?,
    };

    println!(
        "{} [{}]: {}",
        settings.device_name(address),
        register,
        format_block(&data)
    );
    bus.close().await;
    Ok(())
}

async fn write(
    settings: &Settings,
    device: &str,
    register: u8,
    values: &[u8],
    confirm: bool,
) -> Result<()> {
    let address = settings.resolve_device(device)?;
    let mut bus = open_bus(settings).await?;

    match &mut bus {
        Bus::Relay(relay) if confirm => relay
            .write_block_confirmed(address, register, values)
            .await
            .context("Write was not confirmed")?,
        Bus::Relay(relay) => relay.write_block(address, register, values)?,
        // Local writes are visible as soon as they return.
        Bus::Local(local) => local.write_block(address, register, values)?,
    }

    println!(
        "Wrote {} to {} [{}]",
        format_block(values),
        settings.device_name(address),
        register
    );
    bus.close().await;
    Ok(())
}

async fn run_lasers(settings: &Settings, pattern: &str) -> Result<()> {
    let address = settings.resolve_device("lasers")?;

    if pattern == "cycle" {
        let mut bus = open_bus(settings).await?;
        info!("Cycling lasers on {} (Ctrl+C to stop)", address);
        tokio::select! {
            result = lasers::run_cycle(&mut bus, address) => result?,
            _ = tokio::signal::ctrl_c() => info!("Stopping laser cycle"),
        }
        bus.close().await;
        return Ok(());
    }

    let Ok(mask) = pattern.parse::<u64>() else {
        bail!("{pattern} is not a recognized argument. Pass either 'cycle' or a decimal number");
    };
    let mut bus = open_bus(settings).await?;
    lasers::write_mask(&mut bus, address, mask)?;
    println!("Binary written: {mask:#b}");
    bus.close().await;
    Ok(())
}

async fn run_watch(settings: &Settings, names: &[String]) -> Result<()> {
    let devices: Vec<DeviceAddress> = if names.is_empty() {
        settings.devices.values().copied().collect()
    } else {
        names
            .iter()
            .map(|name| settings.resolve_device(name))
            .collect::<Result<_>>()?
    };
    if devices.is_empty() {
        bail!("No devices to watch; name some or add them to the settings device table");
    }

    let mut bus = open_bus(settings).await?;
    // Keep whole devices subscribed so no change slips past between polls.
    if let Bus::Relay(relay) = &mut bus {
        for &device in &devices {
            relay.subscribe(Filter::Device(device))?;
        }
    }

    let mut watcher = Watcher::new();
    let mut ticker = tokio::time::interval(poll_interval(settings.watch_fps));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("Watching {} device(s) at {} Hz", devices.len(), settings.watch_fps);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (device, block) in watcher.poll(&mut bus, &devices)? {
                    println!("{}: {}", settings.device_name(device), format_block(&block));
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    bus.close().await;
    Ok(())
}

fn show_config(settings: &Settings, path: Option<&Path>, write: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    if write {
        let path = settings.save(path)?;
        eprintln!("Saved settings to {}", path.display());
    }
    Ok(())
}
