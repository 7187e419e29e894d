//! LED panel array peripheral.
//!
//! Applies desired PAR targets from the environment (`<name>.<channel>`) and
//! mirrors what was applied into the reported map. Driver I/O blocks on the
//! bus, so on hardware it runs on the blocking pool.

use anyhow::{Context, Result};
use habitat_hw::{
    ChannelMap, ChannelOutputs, ControlPoints, Error as HwError, LedPanelArray, PanelConfig,
    PanelProperties,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Peripheral, PeripheralContext};
use crate::config::PeripheralConfig;
use crate::state::{lock, Environment, PeripheralHealth, SharedState};

/// Parameter block of an LED peripheral.
#[derive(Debug, Deserialize)]
struct LedParameters {
    panels: Vec<PanelEntry>,
    properties: PropertiesEntry,
    #[serde(default = "default_update_interval")]
    update_interval_ms: u64,
}

#[derive(Debug, Deserialize)]
struct PanelEntry {
    name: String,
    bus: u8,
    /// Hex, e.g. "0x47"
    address: String,
    #[serde(default)]
    mux: Option<String>,
    #[serde(default)]
    channel: Option<u8>,
    #[serde(default)]
    active_low: bool,
}

#[derive(Debug, Deserialize)]
struct PropertiesEntry {
    channels: BTreeMap<String, ChannelEntry>,
    /// DAC percent (as key) to PAR percent
    dac_map: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    port: u8,
}

fn default_update_interval() -> u64 {
    1000
}

fn parse_hex(value: &str) -> Result<u8> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u8::from_str_radix(digits, 16).with_context(|| format!("Invalid hex address `{}`", value))
}

impl PanelEntry {
    fn to_config(&self) -> Result<PanelConfig> {
        Ok(PanelConfig {
            name: self.name.clone(),
            bus: self.bus,
            address: parse_hex(&self.address)?,
            mux: self.mux.as_deref().map(parse_hex).transpose()?,
            channel: self.channel,
            active_low: self.active_low,
        })
    }
}

impl PropertiesEntry {
    fn to_properties(&self) -> Result<PanelProperties> {
        let channels: ChannelMap = self
            .channels
            .iter()
            .map(|(name, entry)| (name.clone(), entry.port))
            .collect();

        let points = self
            .dac_map
            .iter()
            .map(|(dac, &par)| {
                let dac: f64 = dac
                    .parse()
                    .with_context(|| format!("Invalid dac percent `{}`", dac))?;
                Ok((dac, par))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PanelProperties {
            channels,
            dac_map: ControlPoints::new(points)?,
        })
    }
}

/// LED peripheral built on an [`LedPanelArray`].
pub struct LedPeripheral {
    name: String,
    driver: Arc<Mutex<LedPanelArray>>,
    channels: Vec<String>,
    simulated: bool,
    env: Arc<Environment>,
    state: Arc<SharedState>,
    update_interval: Duration,
    applied: ChannelOutputs,
}

impl LedPeripheral {
    /// Registry type identifier.
    pub const TYPE: &'static str = "led_dac5578";

    /// Parses the parameter block and initializes the panel array.
    pub fn create(
        config: &PeripheralConfig,
        ctx: &PeripheralContext,
    ) -> Result<Box<dyn Peripheral>> {
        let params: LedParameters = config
            .parameters
            .clone()
            .try_into()
            .with_context(|| format!("Invalid parameters for `{}`", config.name))?;

        let panels = params
            .panels
            .iter()
            .map(PanelEntry::to_config)
            .collect::<Result<Vec<_>>>()?;
        let properties = params.properties.to_properties()?;

        let driver = LedPanelArray::new(
            &config.name,
            panels,
            properties,
            ctx.arbiter.clone(),
            ctx.simulate,
        )
        .with_context(|| format!("Failed to initialize `{}`", config.name))?;

        Ok(Box::new(Self {
            name: config.name.clone(),
            channels: driver.properties().channels.keys().cloned().collect(),
            simulated: driver.is_simulated(),
            driver: Arc::new(Mutex::new(driver)),
            env: ctx.env.clone(),
            state: ctx.state.clone(),
            update_interval: Duration::from_millis(params.update_interval_ms.max(1)),
            applied: ChannelOutputs::new(),
        }))
    }

    /// Runs `f` against the driver, off the async workers unless simulated.
    async fn with_driver<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut LedPanelArray) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.simulated {
            return Some(f(&mut lock(&self.driver)));
        }

        let driver = self.driver.clone();
        match tokio::task::spawn_blocking(move || f(&mut lock(&driver))).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("`{}` driver task failed: {}", self.name, e);
                None
            }
        }
    }

    fn active_panels(&self) -> usize {
        lock(&self.driver).active_panels()
    }

    fn variable(&self, channel: &str) -> String {
        format!("{}.{}", self.name, channel)
    }

    fn report(&mut self, outputs: &ChannelOutputs) {
        for (channel, &value) in outputs {
            self.env.set_reported(&self.variable(channel), value);
            self.applied.insert(channel.clone(), value);
        }
    }

    fn publish_active_panels(&self) {
        self.env.set_sensor(
            &format!("{}.active_panels", self.name),
            self.active_panels() as f64,
        );
    }

    fn handle_error(&mut self, e: HwError) {
        if let HwError::NoActivePanels { .. } = e {
            error!("`{}` lost all panels: {}", self.name, e);
            self.state
                .set_peripheral_health(&self.name, PeripheralHealth::Error);
        } else {
            warn!("`{}` failed to apply outputs: {}", self.name, e);
        }
        self.publish_active_panels();
    }

    /// Collects desired targets that differ from what was last applied.
    fn changed_targets(&self) -> ChannelOutputs {
        self.channels
            .iter()
            .filter_map(|channel| {
                let desired = self.env.desired(&self.variable(channel))?;
                (self.applied.get(channel) != Some(&desired)).then(|| (channel.clone(), desired))
            })
            .collect()
    }

    async fn update(&mut self) {
        if self.state.peripheral_health(&self.name) == Some(PeripheralHealth::Error) {
            return;
        }

        let changed = self.changed_targets();
        if changed.is_empty() {
            return;
        }

        debug!("`{}` applying {:?}", self.name, changed);
        let applied = self
            .with_driver(move |driver| driver.set_outputs(&changed).map(|()| changed))
            .await;
        match applied {
            Some(Ok(applied)) => {
                self.report(&applied);
                self.publish_active_panels();
            }
            Some(Err(e)) => self.handle_error(e),
            None => self
                .state
                .set_peripheral_health(&self.name, PeripheralHealth::Error),
        }
    }

    async fn run_loop(mut self) {
        self.state
            .set_peripheral_health(&self.name, PeripheralHealth::Initializing);

        match self.with_driver(|driver| driver.turn_off()).await {
            Some(Ok(outputs)) => {
                self.report(&outputs);
                self.state
                    .set_peripheral_health(&self.name, PeripheralHealth::Nos);
                info!(
                    "`{}` running with {} of {} panels",
                    self.name,
                    self.active_panels(),
                    lock(&self.driver).expected_panels()
                );
            }
            Some(Err(e)) => {
                error!("`{}` failed to turn off: {}", self.name, e);
                self.state
                    .set_peripheral_health(&self.name, PeripheralHealth::Error);
            }
            None => self
                .state
                .set_peripheral_health(&self.name, PeripheralHealth::Error),
        }
        self.publish_active_panels();

        let mut interval = tokio::time::interval(self.update_interval);
        loop {
            interval.tick().await;
            self.update().await;
        }
    }
}

impl Peripheral for LedPeripheral {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self: Box<Self>) -> JoinHandle<()> {
        tokio::spawn((*self).run_loop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use habitat_hw::{BusArbiter, SimulatedI2c};

    const PARAMETERS: &str = r#"
        update_interval_ms = 10

        [[panels]]
        name = "north"
        bus = 1
        address = "0x47"

        [[panels]]
        name = "south"
        bus = 1
        address = "0x48"
        mux = "0x77"
        channel = 2
        active_low = true

        [properties.channels]
        FR = { port = 0 }
        WW = { port = 1 }

        [properties.dac_map]
        "0" = 0.0
        "50" = 25.0
        "100" = 100.0
    "#;

    fn context(sim: &SimulatedI2c) -> PeripheralContext {
        let mut arbiter = BusArbiter::new();
        arbiter.attach(1, sim.clone());
        PeripheralContext {
            env: Arc::new(Environment::new()),
            state: Arc::new(SharedState::new()),
            arbiter: Arc::new(arbiter),
            simulate: true,
        }
    }

    /// Same bus, but driven as real hardware through the blocking pool.
    fn hardware_context(sim: &SimulatedI2c) -> PeripheralContext {
        PeripheralContext {
            simulate: false,
            ..context(sim)
        }
    }

    fn config(parameters: &str) -> PeripheralConfig {
        PeripheralConfig {
            name: "light".to_string(),
            kind: LedPeripheral::TYPE.to_string(),
            parameters: toml::from_str(parameters).unwrap(),
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("0x47").unwrap(), 0x47);
        assert_eq!(parse_hex("0X7f").unwrap(), 0x7F);
        assert_eq!(parse_hex("20").unwrap(), 0x20);
        assert!(parse_hex("0x1FF").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_create_rejects_missing_panels() {
        let sim = SimulatedI2c::new();
        sim.absent(0x47);
        sim.absent(0x48);
        let result = LedPeripheral::create(&config(PARAMETERS), &context(&sim));
        let err = result.err().expect("construction should fail");
        assert!(err
            .chain()
            .any(|cause| cause.to_string().contains("No active panels")));
    }

    #[test]
    fn test_create_rejects_bad_parameters() {
        let sim = SimulatedI2c::new();
        let bad_dac_map = PARAMETERS.replace("\"50\" = 25.0\n        \"100\" = 100.0", "");
        assert!(LedPeripheral::create(&config(&bad_dac_map), &context(&sim)).is_err());
        assert!(LedPeripheral::create(&config("panels = []"), &context(&sim)).is_err());
    }

    #[tokio::test]
    async fn test_run_applies_desired_targets() {
        let sim = SimulatedI2c::new();
        let ctx = context(&sim);
        let peripheral = LedPeripheral::create(&config(PARAMETERS), &ctx).unwrap();
        let handle = peripheral.run();

        let state = ctx.state.clone();
        wait_for(|| state.peripheral_health("light") == Some(PeripheralHealth::Nos)).await;
        assert_eq!(ctx.env.reported("light.FR"), Some(0.0));
        assert_eq!(ctx.env.sensor("light.active_panels"), Some(2.0));

        ctx.env.set_desired("light.FR", 25.0);
        let env = ctx.env.clone();
        wait_for(|| env.reported("light.FR") == Some(25.0)).await;

        // 25 PAR is 50% DAC; the south panel is active-low
        assert_eq!(sim.writes_to(0x47).last(), Some(&vec![0x30, 0x80, 0x00]));
        assert_eq!(sim.writes_to(0x48).last(), Some(&vec![0x30, 0x7F, 0x00]));
        handle.abort();
    }

    #[tokio::test]
    async fn test_run_on_hardware_uses_blocking_pool() {
        let sim = SimulatedI2c::new();
        let ctx = hardware_context(&sim);
        let peripheral = LedPeripheral::create(&config(PARAMETERS), &ctx).unwrap();
        let handle = peripheral.run();

        let state = ctx.state.clone();
        wait_for(|| state.peripheral_health("light") == Some(PeripheralHealth::Nos)).await;
        ctx.env.set_desired("light.WW", 100.0);
        let env = ctx.env.clone();
        wait_for(|| env.reported("light.WW") == Some(100.0)).await;

        assert_eq!(sim.writes_to(0x47).last(), Some(&vec![0x31, 0xFF, 0x00]));
        handle.abort();
    }

    #[tokio::test]
    async fn test_nan_target_is_not_applied() {
        let sim = SimulatedI2c::new();
        let ctx = context(&sim);
        let peripheral = LedPeripheral::create(&config(PARAMETERS), &ctx).unwrap();
        let handle = peripheral.run();

        let state = ctx.state.clone();
        wait_for(|| state.peripheral_health("light") == Some(PeripheralHealth::Nos)).await;
        let before = sim.writes().len();

        ctx.env.set_desired("light.FR", f64::NAN);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sim.writes().len(), before);
        assert_eq!(ctx.env.reported("light.FR"), Some(0.0));
        assert_eq!(ctx.env.sensor("light.active_panels"), Some(2.0));
        assert_eq!(state.peripheral_health("light"), Some(PeripheralHealth::Nos));
        handle.abort();
    }

    #[test]
    fn test_create_rejects_port_outside_dac() {
        let sim = SimulatedI2c::new();
        let bad_port = PARAMETERS.replace("WW = { port = 1 }", "WW = { port = 9 }");
        let err = LedPeripheral::create(&config(&bad_port), &context(&sim))
            .err()
            .expect("construction should fail");
        assert!(err
            .chain()
            .any(|cause| cause.to_string().contains("Invalid DAC port: 9")));
        assert!(sim.writes().is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_error_when_all_panels_fail() {
        let sim = SimulatedI2c::new();
        let ctx = context(&sim);
        let peripheral = LedPeripheral::create(&config(PARAMETERS), &ctx).unwrap();
        let handle = peripheral.run();

        let state = ctx.state.clone();
        wait_for(|| state.peripheral_health("light") == Some(PeripheralHealth::Nos)).await;

        sim.fail_writes(0x47);
        sim.fail_writes(0x48);
        ctx.env.set_desired("light.WW", 60.0);
        wait_for(|| state.peripheral_health("light") == Some(PeripheralHealth::Error)).await;
        let env = ctx.env.clone();
        wait_for(|| env.sensor("light.active_panels") == Some(0.0)).await;
        assert_eq!(ctx.env.reported("light.WW"), Some(0.0));
        handle.abort();
    }
}
