//! Habitat Hardware Library
//!
//! Provides hardware abstraction for the light subsystem of a
//! controlled-environment enclosure: arbitrated I2C buses, DAC5578
//! register handles, and LED panel arrays built on top of them.

pub mod bus;
pub mod dac;
pub mod error;
pub mod interpolate;
pub mod led;
pub mod spd;

pub use bus::{BusArbiter, BusGuard, SimulatedI2c, Transport};
pub use dac::Dac5578;
pub use error::{Error, Result};
pub use interpolate::{interpolate, ControlPoints};
pub use led::{ChannelMap, LedPanelArray, Panel, PanelConfig, PanelProperties};
pub use spd::{ApproximationError, ChannelOutputs, SpdOutput, SpectralApproximator, Spectrum};

/// Number of output channels on a DAC5578.
pub const DAC_CHANNELS: u8 = 8;

/// Number of downstream channels on a TCA9548A-style I2C mux.
pub const MUX_CHANNELS: u8 = 8;
