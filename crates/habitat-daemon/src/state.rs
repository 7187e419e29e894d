//! Process-wide shared state.
//!
//! Every field has one long-lived lock, shared by all readers and writers
//! across the orchestrator and peripheral tasks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Device lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceState {
    /// Loading configuration.
    #[default]
    Config,
    /// Creating and spawning peripherals.
    Setup,
    /// Waiting for peripherals to report ready.
    Init,
    /// Normal operating state.
    Nos,
    /// Tearing down before reconfiguring.
    Reset,
    /// Halted on a fault.
    Error,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Config => write!(f, "CONFIG"),
            DeviceState::Setup => write!(f, "SETUP"),
            DeviceState::Init => write!(f, "INIT"),
            DeviceState::Nos => write!(f, "NOS"),
            DeviceState::Reset => write!(f, "RESET"),
            DeviceState::Error => write!(f, "ERROR"),
        }
    }
}

/// Health reported by a peripheral for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeripheralHealth {
    /// Started but not yet usable.
    Initializing,
    /// Running but not yet at steady state.
    Warming,
    /// Normal operation.
    Nos,
    /// Failed; will not recover without a reset.
    Error,
}

impl PeripheralHealth {
    /// Returns true for statuses that release the boot gate.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            PeripheralHealth::Nos | PeripheralHealth::Warming | PeripheralHealth::Error
        )
    }
}

impl std::fmt::Display for PeripheralHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeripheralHealth::Initializing => write!(f, "INITIALIZING"),
            PeripheralHealth::Warming => write!(f, "WARMING"),
            PeripheralHealth::Nos => write!(f, "NOS"),
            PeripheralHealth::Error => write!(f, "ERROR"),
        }
    }
}

/// Commands posted to the orchestrator from outside its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Tear down peripherals and reload configuration.
    Reset,
}

/// Locks a mutex, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rwlock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rwlock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rwlock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rwlock.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct StateCell {
    current: DeviceState,
    visited: Vec<DeviceState>,
}

/// Device state, peripheral health and pending commands.
#[derive(Debug)]
pub struct SharedState {
    /// Current device state and every state entered so far
    device: Mutex<StateCell>,

    /// Health by peripheral name; absent means unset
    health: Mutex<HashMap<String, PeripheralHealth>>,

    /// Pending command for the orchestrator
    command: Mutex<Option<DeviceCommand>>,
}

impl SharedState {
    /// Creates shared state in CONFIG.
    pub fn new() -> Self {
        Self {
            device: Mutex::new(StateCell {
                current: DeviceState::Config,
                visited: vec![DeviceState::Config],
            }),
            health: Mutex::new(HashMap::new()),
            command: Mutex::new(None),
        }
    }

    /// Gets the current device state.
    pub fn device_state(&self) -> DeviceState {
        lock(&self.device).current
    }

    /// Sets the device state.
    pub fn set_state(&self, next: DeviceState) {
        let mut cell = lock(&self.device);
        info!("Device state {} -> {}", cell.current, next);
        cell.current = next;
        cell.visited.push(next);
    }

    /// Returns every state entered, in order, starting with CONFIG.
    pub fn visited_states(&self) -> Vec<DeviceState> {
        lock(&self.device).visited.clone()
    }

    /// Sets a peripheral's health.
    pub fn set_peripheral_health(&self, name: &str, health: PeripheralHealth) {
        let previous = lock(&self.health).insert(name.to_string(), health);
        if previous != Some(health) {
            info!("Peripheral `{}` health: {}", name, health);
        }
    }

    /// Gets a peripheral's health, if it has reported one.
    pub fn peripheral_health(&self, name: &str) -> Option<PeripheralHealth> {
        lock(&self.health).get(name).copied()
    }

    /// Returns the names from `names` that have not reported ready.
    pub fn pending_peripherals<'a>(&self, names: &'a [String]) -> Vec<&'a str> {
        let health = lock(&self.health);
        names
            .iter()
            .filter(|name| !health.get(name.as_str()).is_some_and(|h| h.is_ready()))
            .map(String::as_str)
            .collect()
    }

    /// Returns true once every named peripheral has reported ready.
    pub fn all_peripherals_ready(&self, names: &[String]) -> bool {
        self.pending_peripherals(names).is_empty()
    }

    /// Forgets all peripheral health entries.
    pub fn clear_peripheral_health(&self) {
        lock(&self.health).clear();
    }

    /// Posts a command, replacing any pending one.
    pub fn post_command(&self, command: DeviceCommand) {
        info!("Command posted: {:?}", command);
        *lock(&self.command) = Some(command);
    }

    /// Takes the pending command, if any.
    pub fn take_command(&self) -> Option<DeviceCommand> {
        lock(&self.command).take()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest sensor and actuator values shared between peripherals.
#[derive(Debug, Default)]
pub struct Environment {
    /// Measured values
    sensor: RwLock<HashMap<String, f64>>,

    /// Actuator targets
    desired: RwLock<HashMap<String, f64>>,

    /// Actuator values actually applied
    reported: RwLock<HashMap<String, f64>>,
}

/// Point-in-time copy of the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvironmentSnapshot {
    pub sensor: HashMap<String, f64>,
    pub desired: HashMap<String, f64>,
    pub reported: HashMap<String, f64>,
}

impl Environment {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sensor(&self, variable: &str, value: f64) {
        write(&self.sensor).insert(variable.to_string(), value);
    }

    pub fn sensor(&self, variable: &str) -> Option<f64> {
        read(&self.sensor).get(variable).copied()
    }

    pub fn set_desired(&self, variable: &str, value: f64) {
        write(&self.desired).insert(variable.to_string(), value);
    }

    pub fn desired(&self, variable: &str) -> Option<f64> {
        read(&self.desired).get(variable).copied()
    }

    pub fn set_reported(&self, variable: &str, value: f64) {
        write(&self.reported).insert(variable.to_string(), value);
    }

    pub fn reported(&self, variable: &str) -> Option<f64> {
        read(&self.reported).get(variable).copied()
    }

    /// Copies all three maps.
    pub fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            sensor: read(&self.sensor).clone(),
            desired: read(&self.desired).clone(),
            reported: read(&self.reported).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_state_records_history() {
        let state = SharedState::new();
        assert_eq!(state.device_state(), DeviceState::Config);
        state.set_state(DeviceState::Setup);
        state.set_state(DeviceState::Init);
        assert_eq!(state.device_state(), DeviceState::Init);
        assert_eq!(
            state.visited_states(),
            vec![DeviceState::Config, DeviceState::Setup, DeviceState::Init]
        );
    }

    #[test]
    fn test_set_state_from_many_threads() {
        let state = Arc::new(SharedState::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let next = if i % 2 == 0 {
                            DeviceState::Nos
                        } else {
                            DeviceState::Init
                        };
                        state.set_state(next);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.visited_states().len(), 1 + 8 * 100);
    }

    #[test]
    fn test_peripheral_readiness() {
        let state = SharedState::new();
        let names = vec!["light".to_string(), "climate".to_string()];
        assert!(!state.all_peripherals_ready(&names));

        state.set_peripheral_health("light", PeripheralHealth::Initializing);
        state.set_peripheral_health("climate", PeripheralHealth::Warming);
        assert_eq!(state.pending_peripherals(&names), vec!["light"]);

        state.set_peripheral_health("light", PeripheralHealth::Error);
        assert!(state.all_peripherals_ready(&names));

        state.clear_peripheral_health();
        assert_eq!(state.peripheral_health("light"), None);
        assert!(!state.all_peripherals_ready(&names));
    }

    #[test]
    fn test_command_taken_once() {
        let state = SharedState::new();
        assert_eq!(state.take_command(), None);
        state.post_command(DeviceCommand::Reset);
        assert_eq!(state.take_command(), Some(DeviceCommand::Reset));
        assert_eq!(state.take_command(), None);
    }

    #[test]
    fn test_environment_snapshot() {
        let env = Environment::new();
        env.set_sensor("air_temperature", 22.5);
        env.set_desired("light.FR", 40.0);
        env.set_reported("light.FR", 40.0);

        let snapshot = env.snapshot();
        assert_eq!(snapshot.sensor.get("air_temperature"), Some(&22.5));
        assert_eq!(env.desired("light.FR"), Some(40.0));
        assert_eq!(env.reported("light.WW"), None);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["desired"]["light.FR"], 40.0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(DeviceState::Nos.to_string(), "NOS");
        assert_eq!(PeripheralHealth::Warming.to_string(), "WARMING");
    }
}
