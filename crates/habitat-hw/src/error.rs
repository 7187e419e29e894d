//! Error types for the Habitat hardware library.

use embedded_hal::i2c::ErrorKind;
use thiserror::Error;

use crate::spd::ApproximationError;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when interacting with the hardware.
#[derive(Error, Debug)]
pub enum Error {
    /// Every panel of an array is shut down.
    #[error("No active panels {context} ({active} of {expected} active)")]
    NoActivePanels {
        expected: usize,
        active: usize,
        context: &'static str,
    },

    /// Channel name missing from the channel map.
    #[error("Invalid channel name: {0}")]
    InvalidChannelName(String),

    /// Setting several outputs failed before any write was attempted.
    #[error("Unable to set outputs")]
    SetOutputs(#[source] Box<Error>),

    /// Setting a single output failed before any write was attempted.
    #[error("Unable to set output")]
    SetOutput(#[source] Box<Error>),

    /// Spectral approximation failed.
    #[error("Unable to set spd")]
    SetSpd(#[source] ApproximationError),

    /// Write attempted on a panel whose DAC was never opened.
    #[error("Panel `{0}` not initialized")]
    PanelNotInitialized(String),

    /// No transport attached for the bus.
    #[error("I2C bus {0} is not attached")]
    BusNotAttached(u8),

    /// A previous holder of the bus panicked mid-transaction.
    #[error("I2C bus {0} lock poisoned")]
    BusPoisoned(u8),

    /// Transport-level I2C failure.
    #[error("I2C error on bus {bus} at address 0x{address:02X}: {kind:?}")]
    Bus {
        bus: u8,
        address: u8,
        kind: ErrorKind,
    },

    /// Mux channel outside 0-7.
    #[error("Invalid mux channel: {0}")]
    InvalidMuxChannel(u8),

    /// Mux address configured without a channel.
    #[error("Panel `{0}` has a mux address but no mux channel")]
    MissingMuxChannel(String),

    /// DAC port outside 0-7.
    #[error("Invalid DAC port: {0}")]
    InvalidPort(u8),

    /// Setpoint that is not a finite number.
    #[error("Invalid setpoint for `{channel}`: {value}")]
    InvalidSetpoint { channel: String, value: f64 },

    /// DAC/PAR calibration table rejected.
    #[error("Invalid control points: {0}")]
    InvalidControlPoints(String),
}
