//! LED panel array driver.
//!
//! Presents several physically independent panels as one light source.
//! Channel names resolve to DAC ports through the channel map, PAR targets
//! translate to DAC percent through the control-point curve, and a failing
//! panel is shut down without stopping writes to its siblings.

use super::panel::{Panel, PanelConfig};
use crate::bus::BusArbiter;
use crate::interpolate::ControlPoints;
use crate::spd::{ApproximationError, ChannelOutputs, SpdOutput, SpectralApproximator, Spectrum};
use crate::{Error, Result, DAC_CHANNELS};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Channel name to DAC port.
pub type ChannelMap = BTreeMap<String, u8>;

/// Properties shared by every panel of an array.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelProperties {
    /// Logical channel names and their ports.
    pub channels: ChannelMap,
    /// DAC to PAR calibration curve.
    pub dac_map: ControlPoints,
}

impl PanelProperties {
    /// Checks that every channel maps to a DAC port.
    pub fn validate(&self) -> Result<()> {
        match self.channels.values().find(|&&port| port >= DAC_CHANNELS) {
            Some(&port) => Err(Error::InvalidPort(port)),
            None => Ok(()),
        }
    }

    /// Translates PAR setpoints keyed by port to DAC setpoints.
    pub fn translate_setpoints(&self, par_setpoints: &BTreeMap<u8, f64>) -> BTreeMap<u8, f64> {
        par_setpoints
            .iter()
            .map(|(&port, &par)| (port, self.translate_setpoint(par)))
            .collect()
    }

    /// Translates a PAR setpoint to a DAC setpoint.
    pub fn translate_setpoint(&self, par_setpoint: f64) -> f64 {
        self.dac_map.par_to_dac(par_setpoint)
    }
}

/// Array of LED panels controlled as one light.
pub struct LedPanelArray {
    name: String,
    properties: PanelProperties,
    panels: Vec<Panel>,
    simulate: bool,
    approximator: Option<Box<dyn SpectralApproximator>>,
}

impl LedPanelArray {
    /// Creates the array and initializes every panel.
    ///
    /// Panels that fail to initialize are shut down; construction only
    /// fails when none remain. A channel map naming a port the DAC does
    /// not have is rejected before any panel is touched.
    pub fn new(
        name: &str,
        panel_configs: Vec<PanelConfig>,
        properties: PanelProperties,
        arbiter: Arc<BusArbiter>,
        simulate: bool,
    ) -> Result<Self> {
        properties.validate()?;

        let mut panels = Vec::with_capacity(panel_configs.len());
        for config in panel_configs {
            let mut panel = Panel::new(name, config);
            panel.initialize(&arbiter);
            panels.push(panel);
        }

        let array = Self {
            name: name.to_string(),
            properties,
            panels,
            simulate,
            approximator: None,
        };

        let active = array.active_panels();
        if active < 1 {
            return Err(array.no_active_panels("during initialization"));
        }

        info!(
            "LED array `{}` initialized with {} active panels, expected {}{}",
            array.name,
            active,
            array.expected_panels(),
            if simulate { " (simulated)" } else { "" }
        );
        Ok(array)
    }

    /// Installs the spectral approximator used by [`set_spd`](Self::set_spd).
    pub fn with_approximator<A>(mut self, approximator: A) -> Self
    where
        A: SpectralApproximator + 'static,
    {
        self.approximator = Some(Box::new(approximator));
        self
    }

    fn no_active_panels(&self, context: &'static str) -> Error {
        Error::NoActivePanels {
            expected: self.expected_panels(),
            active: 0,
            context,
        }
    }

    fn require_active(&self) -> Result<usize> {
        match self.active_panels() {
            0 => Err(self.no_active_panels("before writing")),
            active => Ok(active),
        }
    }

    /// Returns the number of panels that are not shut down.
    pub fn active_panels(&self) -> usize {
        self.panels.iter().filter(|p| !p.is_shut_down()).count()
    }

    /// Returns the number of configured panels.
    pub fn expected_panels(&self) -> usize {
        self.panels.len()
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &PanelProperties {
        &self.properties
    }

    /// Returns true when the array's buses are simulated.
    pub fn is_simulated(&self) -> bool {
        self.simulate
    }

    /// Sets every channel to 100.
    pub fn turn_on(&mut self) -> Result<ChannelOutputs> {
        debug!("Turning on `{}`", self.name);
        let outputs = self.build_channel_outputs(100.0);
        self.set_outputs(&outputs)?;
        Ok(outputs)
    }

    /// Sets every channel to 0.
    pub fn turn_off(&mut self) -> Result<ChannelOutputs> {
        debug!("Turning off `{}`", self.name);
        let outputs = self.build_channel_outputs(0.0);
        self.set_outputs(&outputs)?;
        Ok(outputs)
    }

    /// Approximates and applies a spectral power distribution.
    pub fn set_spd(
        &mut self,
        distance: f64,
        intensity: f64,
        spectrum: &Spectrum,
    ) -> Result<SpdOutput> {
        debug!(
            "Setting spd on `{}`: distance={}cm, ppfd={}umol/m2/s, spectrum={:?}",
            self.name, distance, intensity, spectrum
        );

        let approximator = self.approximator.as_ref().ok_or_else(|| {
            Error::SetSpd(ApproximationError::new("no spectral approximator installed"))
        })?;
        let output = approximator
            .approximate(&self.properties, distance, intensity, spectrum)
            .map_err(Error::SetSpd)?;

        self.set_outputs(&output.channel_outputs)?;

        debug!(
            "Set spd on `{}`: channels={:?}, spectrum={:?}, intensity={}umol/m2/s",
            self.name, output.channel_outputs, output.spectrum, output.intensity
        );
        Ok(output)
    }

    /// Sets PAR targets on every active panel.
    ///
    /// All channel names and setpoints are checked before any write. A
    /// panel whose write fails is shut down and the remaining panels are
    /// still written.
    pub fn set_outputs(&mut self, par_setpoints: &ChannelOutputs) -> Result<()> {
        debug!("Setting outputs on `{}`: {:?}", self.name, par_setpoints);
        let active = self.require_active()?;
        debug!("Setting outputs on {} active panels", active);

        let converted = par_setpoints
            .iter()
            .map(|(name, &percent)| {
                let port = self.get_channel_number(name)?;
                check_setpoint(name, percent)?;
                Ok((port, percent))
            })
            .collect::<Result<BTreeMap<u8, f64>>>()
            .map_err(|e| Error::SetOutputs(Box::new(e)))?;

        let properties = &self.properties;
        for panel in self.panels.iter_mut().filter(|p| !p.is_shut_down()) {
            // Per-panel so calibration can diverge between panels
            let dac_setpoints = properties.translate_setpoints(&converted);

            match panel.write_outputs(&dac_setpoints) {
                Ok(()) => {}
                Err(Error::PanelNotInitialized(_)) => {
                    error!(
                        "Unable to set outputs on `{}`, panel not initialized",
                        panel.name()
                    );
                }
                Err(e) => {
                    error!("Unable to set outputs on `{}`: {}", panel.name(), e);
                    panel.shut_down();
                }
            }
        }

        if self.active_panels() < 1 {
            return Err(self.no_active_panels("after setting outputs"));
        }
        Ok(())
    }

    /// Sets one PAR target on every active panel.
    pub fn set_output(&mut self, channel_name: &str, par_setpoint: f64) -> Result<()> {
        debug!(
            "Setting `{}` ch {}: {}",
            self.name, channel_name, par_setpoint
        );
        let active = self.require_active()?;
        debug!("Setting output on {} active panels", active);

        let port = self
            .get_channel_number(channel_name)
            .and_then(|port| check_setpoint(channel_name, par_setpoint).map(|()| port))
            .map_err(|e| Error::SetOutput(Box::new(e)))?;

        let properties = &self.properties;
        for panel in self.panels.iter_mut().filter(|p| !p.is_shut_down()) {
            let dac_setpoint = properties.translate_setpoint(par_setpoint);

            match panel.write_output(port, dac_setpoint) {
                Ok(()) => {}
                Err(Error::PanelNotInitialized(_)) => {
                    error!(
                        "Unable to set output on `{}`, panel not initialized",
                        panel.name()
                    );
                }
                Err(e) => {
                    error!("Unable to set output on `{}`: {}", panel.name(), e);
                    panel.shut_down();
                }
            }
        }

        if self.active_panels() < 1 {
            return Err(self.no_active_panels("after setting output"));
        }
        Ok(())
    }

    /// Looks up a channel's DAC port.
    pub fn get_channel_number(&self, channel_name: &str) -> Result<u8> {
        let port = self
            .properties
            .channels
            .get(channel_name)
            .copied()
            .ok_or_else(|| Error::InvalidChannelName(channel_name.to_string()))?;
        if port >= DAC_CHANNELS {
            return Err(Error::InvalidPort(port));
        }
        Ok(port)
    }

    /// Builds a map setting every channel to `value`.
    pub fn build_channel_outputs(&self, value: f64) -> ChannelOutputs {
        self.properties
            .channels
            .keys()
            .map(|name| (name.clone(), value))
            .collect()
    }

    /// Translates PAR setpoints keyed by port to DAC setpoints.
    pub fn translate_setpoints(&self, par_setpoints: &BTreeMap<u8, f64>) -> BTreeMap<u8, f64> {
        self.properties.translate_setpoints(par_setpoints)
    }

    /// Translates a PAR setpoint to a DAC setpoint.
    pub fn translate_setpoint(&self, par_setpoint: f64) -> f64 {
        self.properties.translate_setpoint(par_setpoint)
    }
}

fn check_setpoint(channel_name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidSetpoint {
            channel: channel_name.to_string(),
            value,
        })
    }
}
