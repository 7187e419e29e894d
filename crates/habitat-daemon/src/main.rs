//! Habitat Daemon
//!
//! Runs the device lifecycle state machine and the configured peripherals.

mod config;
mod orchestrator;
mod peripherals;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::ConfigSource;
use orchestrator::Orchestrator;
use peripherals::PeripheralRegistry;
use state::DeviceCommand;

#[derive(Parser)]
#[command(name = "habitatd")]
#[command(about = "Growth enclosure controller daemon")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(default_value = "config/default.toml")]
    config: PathBuf,

    /// Attach simulated transports instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    info!("Using configuration from: {}", args.config.display());

    let registry = PeripheralRegistry::with_builtin();
    let mut orchestrator =
        Orchestrator::new(ConfigSource::File(args.config), registry).with_simulate(args.simulate);
    let state = orchestrator.shared_state();

    let mut machine = tokio::spawn(async move { orchestrator.run().await });

    // Setup Unix signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                info!("Received SIGHUP, resetting");
                state.post_command(DeviceCommand::Reset);
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            result = &mut machine => {
                result?;
                break;
            }
        }
    }

    machine.abort();
    Ok(())
}
