//! Device lifecycle state machine.
//!
//! CONFIG -> SETUP -> INIT -> NOS on a normal boot. ERROR is entered when
//! configuration fails or a configured boot timeout expires; RESET is
//! entered from NOS or ERROR when a reset command is posted, and leads
//! back to CONFIG.

use anyhow::Result;
use habitat_hw::{BusArbiter, SimulatedI2c, Transport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigSource};
use crate::peripherals::{Peripheral, PeripheralContext, PeripheralRegistry};
use crate::state::{DeviceCommand, DeviceState, Environment, PeripheralHealth, SharedState};

/// Creates the transport for a bus id, or `None` when none is available.
pub type TransportFactory = fn(bus: u8, simulate: bool) -> Option<Transport>;

/// Only simulated transports ship with the daemon.
fn default_transport(_bus: u8, simulate: bool) -> Option<Transport> {
    if simulate {
        Some(Box::new(SimulatedI2c::new()))
    } else {
        None
    }
}

/// Why the orchestrator entered ERROR.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Fault {
    #[error("Configuration failed: {0}")]
    Config(String),

    #[error("Boot timed out after {waited:?} waiting for: {}", pending.join(", "))]
    BootTimeout {
        waited: Duration,
        pending: Vec<String>,
    },
}

/// Device orchestrator.
pub struct Orchestrator {
    /// Configuration origin
    source: ConfigSource,

    /// Force simulated transports regardless of configuration
    force_simulate: bool,

    /// Peripheral constructors
    registry: PeripheralRegistry,

    /// Bus transport constructor
    transport: TransportFactory,

    /// Device state and peripheral health
    state: Arc<SharedState>,

    /// Configuration loaded in CONFIG
    config: Option<Config>,

    /// Environment created in SETUP
    env: Arc<Environment>,

    /// Running peripheral tasks
    tasks: Vec<(String, JoinHandle<()>)>,

    /// Reason for the last ERROR entry
    fault: Option<Fault>,
}

impl Orchestrator {
    /// Creates an orchestrator in CONFIG.
    pub fn new(source: ConfigSource, registry: PeripheralRegistry) -> Self {
        Self {
            source,
            force_simulate: false,
            registry,
            transport: default_transport,
            state: Arc::new(SharedState::new()),
            config: None,
            env: Arc::new(Environment::new()),
            tasks: Vec::new(),
            fault: None,
        }
    }

    /// Forces simulated transports.
    pub fn with_simulate(mut self, simulate: bool) -> Self {
        self.force_simulate = simulate;
        self
    }

    /// Replaces the bus transport constructor.
    pub fn with_transport(mut self, transport: TransportFactory) -> Self {
        self.transport = transport;
        self
    }

    /// Returns a handle to the shared state.
    pub fn shared_state(&self) -> Arc<SharedState> {
        self.state.clone()
    }

    /// Returns a handle to the current environment.
    pub fn environment(&self) -> Arc<Environment> {
        self.env.clone()
    }

    /// Returns the reason for the last ERROR entry.
    pub fn last_fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    /// Runs the state machine forever.
    pub async fn run(&mut self) {
        info!("Starting state machine");
        loop {
            self.step().await;
        }
    }

    /// Runs the action of the current state once.
    pub async fn step(&mut self) {
        match self.state.device_state() {
            DeviceState::Config => self.config_state(),
            DeviceState::Setup => self.setup_state(),
            DeviceState::Init => self.init_state().await,
            DeviceState::Nos => self.nos_state().await,
            DeviceState::Reset => self.reset_state().await,
            DeviceState::Error => self.error_state().await,
        }
    }

    fn config(&self) -> Result<&Config> {
        self.config
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Configuration not loaded"))
    }

    fn enter_error(&mut self, fault: Fault) {
        error!("{}", fault);
        self.fault = Some(fault);
        self.state.set_state(DeviceState::Error);
    }

    /// Loads and validates configuration.
    fn config_state(&mut self) {
        debug!("Entered CONFIG state");
        let loaded = self.source.load().and_then(|mut config| {
            config.validate(&self.registry)?;
            config.simulate |= self.force_simulate;
            Ok(config)
        });

        match loaded {
            Ok(config) => {
                info!(
                    "Loaded configuration with {} peripherals{}",
                    config.peripherals.len(),
                    if config.simulate { " (simulated)" } else { "" }
                );
                self.config = Some(config);
                self.state.set_state(DeviceState::Setup);
            }
            Err(e) => self.enter_error(Fault::Config(format!("{:#}", e))),
        }
    }

    fn build_arbiter(&self, config: &Config) -> BusArbiter {
        let mut arbiter = BusArbiter::new();
        for &bus in &config.buses {
            match (self.transport)(bus, config.simulate) {
                Some(transport) => arbiter.attach_transport(bus, transport),
                None => warn!("No transport available for I2C bus {}", bus),
            }
        }
        arbiter
    }

    /// Creates the environment and peripherals, then starts them.
    fn setup_state(&mut self) {
        debug!("Entered SETUP state");
        let config = match self.config() {
            Ok(config) => config.clone(),
            Err(e) => {
                self.enter_error(Fault::Config(e.to_string()));
                return;
            }
        };

        self.env = Arc::new(Environment::new());
        let ctx = PeripheralContext {
            env: self.env.clone(),
            state: self.state.clone(),
            arbiter: Arc::new(self.build_arbiter(&config)),
            simulate: config.simulate,
        };

        let mut created: Vec<Box<dyn Peripheral>> = Vec::new();
        for peripheral in &config.peripherals {
            match self.registry.create(peripheral, &ctx) {
                Ok(instance) => created.push(instance),
                Err(e) => {
                    // Release the boot gate for this one; the rest still start
                    error!("Unable to create peripheral `{}`: {:#}", peripheral.name, e);
                    self.state
                        .set_peripheral_health(&peripheral.name, PeripheralHealth::Error);
                }
            }
        }

        for peripheral in created {
            let name = peripheral.name().to_string();
            debug!("Spawning peripheral `{}`", name);
            self.tasks.push((name, peripheral.run()));
        }

        self.state.set_state(DeviceState::Init);
    }

    /// Waits until every configured peripheral reports ready.
    async fn init_state(&mut self) {
        debug!("Entered INIT state");
        let (names, poll, timeout) = match self.config() {
            Ok(config) => (
                config.peripheral_names(),
                config.init_poll(),
                config.boot_timeout(),
            ),
            Err(e) => {
                self.enter_error(Fault::Config(e.to_string()));
                return;
            }
        };

        if timeout.is_none() {
            info!(
                "Waiting for {} peripherals with no boot timeout",
                names.len()
            );
        }

        let started = Instant::now();
        while !self.state.all_peripherals_ready(&names) {
            let pending = self.state.pending_peripherals(&names);
            debug!("Waiting for peripherals: {}", pending.join(", "));

            if let Some(limit) = timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    let pending = pending.into_iter().map(String::from).collect();
                    self.enter_error(Fault::BootTimeout { waited, pending });
                    return;
                }
            }
            tokio::time::sleep(poll).await;
        }

        self.state.set_state(DeviceState::Nos);
    }

    /// Reports the environment until a reset is requested.
    async fn nos_state(&mut self) {
        debug!("Entered NOS state");
        let sample = match self.config() {
            Ok(config) => config.nos_sample(),
            Err(e) => {
                self.enter_error(Fault::Config(e.to_string()));
                return;
            }
        };

        loop {
            if let Some(DeviceCommand::Reset) = self.state.take_command() {
                self.state.set_state(DeviceState::Reset);
                return;
            }

            match serde_json::to_string(&self.env.snapshot()) {
                Ok(json) => info!("Environment: {}", json),
                Err(e) => warn!("Unable to serialize environment: {}", e),
            }
            tokio::time::sleep(sample).await;
        }
    }

    fn pause(&self) -> Duration {
        self.config
            .as_ref()
            .map(Config::pause)
            .unwrap_or(Duration::from_millis(100))
    }

    /// Stops peripherals and returns to CONFIG.
    async fn reset_state(&mut self) {
        debug!("Entered RESET state");
        tokio::time::sleep(self.pause()).await;

        let tasks: Vec<_> = self.tasks.drain(..).collect();
        for (name, task) in &tasks {
            debug!("Stopping peripheral `{}`", name);
            task.abort();
        }
        // A task mid-poll can still report health until it has stopped
        for (name, task) in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Peripheral `{}` stopped abnormally: {}", name, e);
                }
            }
        }
        self.state.clear_peripheral_health();
        self.config = None;
        self.fault = None;
        self.state.set_state(DeviceState::Config);
    }

    /// Holds until a reset is requested.
    async fn error_state(&mut self) {
        tokio::time::sleep(self.pause()).await;
        if let Some(DeviceCommand::Reset) = self.state.take_command() {
            self.state.set_state(DeviceState::Reset);
        }
    }
}
