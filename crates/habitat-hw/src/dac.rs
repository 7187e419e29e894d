//! DAC5578 octal 8-bit DAC register handle.
//!
//! Every transaction holds the bus guard for its full duration and selects
//! the mux channel first when the device sits behind a mux.

use crate::bus::{BusArbiter, BusGuard};
use crate::{Error, Result, DAC_CHANNELS};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Write to input register n and update DAC register n.
const CMD_WRITE_UPDATE: u8 = 0x30;

/// Power-down register.
const CMD_POWER: u8 = 0x40;

/// Full-scale code.
const MAX_CODE: u8 = 0xFF;

/// DAC5578 device controller.
pub struct Dac5578 {
    name: String,
    arbiter: Arc<BusArbiter>,
    bus: u8,
    address: u8,
    mux: Option<(u8, u8)>,
    active_low: bool,
}

impl std::fmt::Debug for Dac5578 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dac5578")
            .field("name", &self.name)
            .field("bus", &self.bus)
            .field("address", &self.address)
            .field("mux", &self.mux)
            .field("active_low", &self.active_low)
            .finish()
    }
}

impl Dac5578 {
    /// Opens the DAC and powers up all channels.
    ///
    /// `mux` must be accompanied by `channel`.
    pub fn open(
        name: &str,
        arbiter: Arc<BusArbiter>,
        bus: u8,
        address: u8,
        mux: Option<u8>,
        channel: Option<u8>,
        active_low: bool,
    ) -> Result<Self> {
        let mux = match (mux, channel) {
            (Some(mux), Some(channel)) => Some((mux, channel)),
            (Some(_), None) => return Err(Error::MissingMuxChannel(name.to_string())),
            (None, _) => None,
        };

        let dac = Self {
            name: name.to_string(),
            arbiter,
            bus,
            address,
            mux,
            active_low,
        };

        // Normal operation on all eight channels
        dac.transact(|guard| guard.write(dac.address, &[CMD_POWER, 0x00, MAX_CODE]))?;

        info!(
            "DAC5578 `{}` opened (bus {}, address 0x{:02X}, mux {:?})",
            dac.name, dac.bus, dac.address, dac.mux
        );
        Ok(dac)
    }

    /// Runs one transaction under the bus guard.
    fn transact<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BusGuard<'_>) -> Result<()>,
    {
        let mut guard = self.arbiter.acquire(self.bus)?;
        if let Some((mux, channel)) = self.mux {
            guard.select_channel(mux, channel)?;
        }
        f(&mut guard)
    }

    /// Converts a percentage to a register code.
    fn percent_to_code(percent: f64, active_low: bool) -> u8 {
        let code = (percent.clamp(0.0, 100.0) * f64::from(MAX_CODE) / 100.0).round() as u8;
        if active_low {
            MAX_CODE - code
        } else {
            code
        }
    }

    /// Builds the 3-byte write-and-update command for a port.
    fn output_command(&self, port: u8, percent: f64) -> Result<[u8; 3]> {
        if port >= DAC_CHANNELS {
            return Err(Error::InvalidPort(port));
        }
        let code = Self::percent_to_code(percent, self.active_low);
        Ok([CMD_WRITE_UPDATE | port, code, 0x00])
    }

    /// Sets one output port to a percentage of full scale.
    pub fn write_output(&self, port: u8, percent: f64) -> Result<()> {
        let command = self.output_command(port, percent)?;
        debug!("Writing {} port {}: {:.2}%", self.name, port, percent);
        self.transact(|guard| guard.write(self.address, &command))
    }

    /// Sets several output ports in a single bus hold.
    pub fn write_outputs(&self, outputs: &BTreeMap<u8, f64>) -> Result<()> {
        let commands = outputs
            .iter()
            .map(|(&port, &percent)| self.output_command(port, percent))
            .collect::<Result<Vec<_>>>()?;
        debug!("Writing {} outputs: {:?}", self.name, outputs);
        self.transact(|guard| {
            for command in &commands {
                guard.write(self.address, command)?;
            }
            Ok(())
        })
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the bus id.
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Returns the device address.
    pub fn address(&self) -> u8 {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedI2c;

    fn arbiter_with(sim: &SimulatedI2c) -> Arc<BusArbiter> {
        let mut arbiter = BusArbiter::new();
        arbiter.attach(1, sim.clone());
        Arc::new(arbiter)
    }

    #[test]
    fn test_percent_to_code() {
        assert_eq!(Dac5578::percent_to_code(0.0, false), 0x00);
        assert_eq!(Dac5578::percent_to_code(100.0, false), 0xFF);
        assert_eq!(Dac5578::percent_to_code(50.0, false), 0x80);
        assert_eq!(Dac5578::percent_to_code(150.0, false), 0xFF);
        assert_eq!(Dac5578::percent_to_code(-5.0, false), 0x00);
        assert_eq!(Dac5578::percent_to_code(100.0, true), 0x00);
        assert_eq!(Dac5578::percent_to_code(0.0, true), 0xFF);
    }

    #[test]
    fn test_open_powers_up() {
        let sim = SimulatedI2c::new();
        let dac = Dac5578::open("led-top", arbiter_with(&sim), 1, 0x47, None, None, false).unwrap();
        assert_eq!(dac.address(), 0x47);
        assert_eq!(sim.writes_to(0x47), vec![vec![CMD_POWER, 0x00, 0xFF]]);
    }

    #[test]
    fn test_open_absent_device() {
        let sim = SimulatedI2c::new();
        sim.absent(0x47);
        let result = Dac5578::open("led-top", arbiter_with(&sim), 1, 0x47, None, None, false);
        assert!(matches!(result, Err(Error::Bus { address: 0x47, .. })));
    }

    #[test]
    fn test_mux_requires_channel() {
        let sim = SimulatedI2c::new();
        let result = Dac5578::open("led-top", arbiter_with(&sim), 1, 0x47, Some(0x77), None, false);
        assert!(matches!(result, Err(Error::MissingMuxChannel(_))));
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn test_mux_selected_before_every_transaction() {
        let sim = SimulatedI2c::new();
        let dac =
            Dac5578::open("led-top", arbiter_with(&sim), 1, 0x47, Some(0x77), Some(2), false)
                .unwrap();
        dac.write_output(3, 100.0).unwrap();

        let writes = sim.writes();
        assert_eq!(
            writes,
            vec![
                (0x77, vec![0b100]),
                (0x47, vec![CMD_POWER, 0x00, 0xFF]),
                (0x77, vec![0b100]),
                (0x47, vec![0x33, 0xFF, 0x00]),
            ]
        );
    }

    #[test]
    fn test_write_outputs_active_low() {
        let sim = SimulatedI2c::new();
        let dac = Dac5578::open("led-top", arbiter_with(&sim), 1, 0x47, None, None, true).unwrap();
        let outputs = BTreeMap::from([(0, 100.0), (5, 0.0)]);
        dac.write_outputs(&outputs).unwrap();

        let writes = sim.writes_to(0x47);
        assert_eq!(writes[1], vec![0x30, 0x00, 0x00]);
        assert_eq!(writes[2], vec![0x35, 0xFF, 0x00]);
    }

    #[test]
    fn test_invalid_port_rejected_before_write() {
        let sim = SimulatedI2c::new();
        let dac = Dac5578::open("led-top", arbiter_with(&sim), 1, 0x47, None, None, false).unwrap();
        let outputs = BTreeMap::from([(0, 10.0), (8, 10.0)]);
        assert!(matches!(
            dac.write_outputs(&outputs),
            Err(Error::InvalidPort(8))
        ));
        assert_eq!(sim.writes_to(0x47).len(), 1);
    }
}
