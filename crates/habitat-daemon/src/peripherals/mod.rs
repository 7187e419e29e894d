//! Peripheral lifecycle contract.
//!
//! Every hardware handler is constructed through the registry and then
//! started once. After `run()` the handler's own task owns its slice of the
//! environment and its peripheral health entry.

mod led;
mod registry;

pub use led::LedPeripheral;
pub use registry::{PeripheralFactory, PeripheralRegistry};

use habitat_hw::BusArbiter;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::state::{Environment, SharedState};

/// Handles passed to every peripheral at construction.
#[derive(Clone)]
pub struct PeripheralContext {
    /// Shared sensor and actuator values
    pub env: Arc<Environment>,
    /// Device state and peripheral health
    pub state: Arc<SharedState>,
    /// I2C bus serialization point
    pub arbiter: Arc<BusArbiter>,
    /// Running without hardware
    pub simulate: bool,
}

/// Trait for all peripherals.
pub trait Peripheral: Send {
    /// Returns the configured peripheral name.
    fn name(&self) -> &str;

    /// Starts the peripheral's long-lived task.
    ///
    /// The task does not return during normal operation.
    fn run(self: Box<Self>) -> JoinHandle<()>;
}
