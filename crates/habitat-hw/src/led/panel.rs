//! A single LED panel driven by one DAC5578.

use crate::bus::BusArbiter;
use crate::dac::Dac5578;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Where a panel lives on the I2C topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    /// Panel name, unique within its array.
    pub name: String,
    /// Bus id.
    pub bus: u8,
    /// DAC address.
    pub address: u8,
    /// Mux address, if the panel sits behind a mux.
    pub mux: Option<u8>,
    /// Mux channel, required when `mux` is set.
    pub channel: Option<u8>,
    /// Invert output codes.
    pub active_low: bool,
}

/// LED panel.
///
/// Starts shut down and becomes active once its DAC opens. A panel that
/// shuts down stays shut down for the life of the process.
#[derive(Debug)]
pub struct Panel {
    full_name: String,
    config: PanelConfig,
    shut_down: bool,
    dac: Option<Dac5578>,
}

impl Panel {
    /// Creates an uninitialized panel.
    pub fn new(driver_name: &str, config: PanelConfig) -> Self {
        Self {
            full_name: format!("{}-{}", driver_name, config.name),
            config,
            shut_down: true,
            dac: None,
        }
    }

    /// Opens the panel's DAC. Failure shuts the panel down.
    pub fn initialize(&mut self, arbiter: &Arc<BusArbiter>) {
        debug!("Initializing {}", self.config.name);
        match Dac5578::open(
            &self.full_name,
            arbiter.clone(),
            self.config.bus,
            self.config.address,
            self.config.mux,
            self.config.channel,
            self.config.active_low,
        ) {
            Ok(dac) => {
                self.dac = Some(dac);
                self.shut_down = false;
            }
            Err(e) => {
                error!("Unable to initialize `{}`: {}", self.config.name, e);
                self.shut_down = true;
            }
        }
    }

    /// Writes several ports.
    ///
    /// Returns [`Error::PanelNotInitialized`] when the DAC never opened.
    pub fn write_outputs(&self, outputs: &BTreeMap<u8, f64>) -> Result<()> {
        self.dac()?.write_outputs(outputs)
    }

    /// Writes one port.
    pub fn write_output(&self, port: u8, value: f64) -> Result<()> {
        self.dac()?.write_output(port, value)
    }

    fn dac(&self) -> Result<&Dac5578> {
        self.dac
            .as_ref()
            .ok_or_else(|| Error::PanelNotInitialized(self.config.name.clone()))
    }

    /// Permanently excludes the panel from actuation.
    pub fn shut_down(&mut self) {
        self.shut_down = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns `<driver>-<panel>`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedI2c;

    fn config(address: u8) -> PanelConfig {
        PanelConfig {
            name: "top".to_string(),
            bus: 1,
            address,
            mux: None,
            channel: None,
            active_low: false,
        }
    }

    #[test]
    fn test_new_panel_is_shut_down() {
        let panel = Panel::new("light", config(0x47));
        assert!(panel.is_shut_down());
        assert_eq!(panel.full_name(), "light-top");
        assert!(matches!(
            panel.write_output(0, 10.0),
            Err(Error::PanelNotInitialized(_))
        ));
    }

    #[test]
    fn test_initialize() {
        let sim = SimulatedI2c::new();
        sim.absent(0x48);
        let mut arbiter = BusArbiter::new();
        arbiter.attach(1, sim);
        let arbiter = Arc::new(arbiter);

        let mut good = Panel::new("light", config(0x47));
        good.initialize(&arbiter);
        assert!(!good.is_shut_down());
        good.write_output(1, 50.0).unwrap();

        let mut bad = Panel::new("light", config(0x48));
        bad.initialize(&arbiter);
        assert!(bad.is_shut_down());
    }
}
