//! Spectral power distribution approximation contract.
//!
//! The approximation algorithm lives outside this crate; drivers only
//! consume its result.

use crate::led::PanelProperties;
use std::collections::BTreeMap;
use thiserror::Error;

/// Spectrum as band name to percent.
pub type Spectrum = BTreeMap<String, f64>;

/// Per-channel PAR targets keyed by channel name.
pub type ChannelOutputs = BTreeMap<String, f64>;

/// Failure reported by a spectral approximator.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Spectral approximation failed: {0}")]
pub struct ApproximationError(pub String);

impl ApproximationError {
    /// Creates an error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of a spectral approximation.
#[derive(Debug, Clone, PartialEq)]
pub struct SpdOutput {
    /// Channel targets to apply.
    pub channel_outputs: ChannelOutputs,
    /// Spectrum the targets achieve.
    pub spectrum: Spectrum,
    /// Intensity the targets achieve, in umol/m2/s.
    pub intensity: f64,
}

/// Maps a desired distance, intensity and spectrum to channel targets.
pub trait SpectralApproximator: Send + Sync {
    fn approximate(
        &self,
        properties: &PanelProperties,
        distance: f64,
        intensity: f64,
        spectrum: &Spectrum,
    ) -> Result<SpdOutput, ApproximationError>;
}

impl<F> SpectralApproximator for F
where
    F: Fn(&PanelProperties, f64, f64, &Spectrum) -> Result<SpdOutput, ApproximationError>
        + Send
        + Sync,
{
    fn approximate(
        &self,
        properties: &PanelProperties,
        distance: f64,
        intensity: f64,
        spectrum: &Spectrum,
    ) -> Result<SpdOutput, ApproximationError> {
        self(properties, distance, intensity, spectrum)
    }
}
