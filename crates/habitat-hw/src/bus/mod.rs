//! I2C bus module.
//!
//! Serializes transactions per physical bus and handles mux channel selection.

mod arbiter;
mod simulated;

pub use arbiter::{BusArbiter, BusGuard, Transport};
pub use simulated::SimulatedI2c;
