//! Configuration management.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::peripherals::PeripheralRegistry;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Attach simulated transports instead of hardware
    #[serde(default)]
    pub simulate: bool,

    /// I2C bus ids to attach
    #[serde(default)]
    pub buses: Vec<u8>,

    /// INIT readiness poll interval in milliseconds
    #[serde(default = "default_init_poll")]
    pub init_poll_ms: u64,

    /// NOS environment sample interval in milliseconds
    #[serde(default = "default_nos_sample")]
    pub nos_sample_ms: u64,

    /// RESET/ERROR pause in milliseconds
    #[serde(default = "default_pause")]
    pub pause_ms: u64,

    /// Give up waiting in INIT after this many milliseconds (unset = wait forever)
    #[serde(default)]
    pub boot_timeout_ms: Option<u64>,

    /// Peripherals to create, in start order
    #[serde(default)]
    pub peripherals: Vec<PeripheralConfig>,
}

/// One configured peripheral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeripheralConfig {
    /// Unique peripheral name
    pub name: String,

    /// Registry type identifier
    #[serde(rename = "type")]
    pub kind: String,

    /// Handler-specific parameters
    #[serde(default = "default_parameters")]
    pub parameters: toml::Value,
}

// Default value functions
fn default_init_poll() -> u64 {
    2000
}

fn default_nos_sample() -> u64 {
    3000
}

fn default_pause() -> u64 {
    100
}

fn default_parameters() -> toml::Value {
    toml::Value::Table(toml::Table::new())
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "Failed to read configuration file {}",
                path.as_ref().display()
            )
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse configuration")
    }

    /// Checks peripheral names and types against the registry.
    pub fn validate(&self, registry: &PeripheralRegistry) -> Result<()> {
        if self.peripherals.is_empty() {
            bail!("No peripherals configured");
        }

        let mut names = HashSet::new();
        for peripheral in &self.peripherals {
            if !names.insert(peripheral.name.as_str()) {
                bail!("Duplicate peripheral name `{}`", peripheral.name);
            }
            if !registry.contains(&peripheral.kind) {
                bail!(
                    "Unknown type `{}` for peripheral `{}` (known: {})",
                    peripheral.kind,
                    peripheral.name,
                    registry.list().join(", ")
                );
            }
        }
        Ok(())
    }

    /// Returns the configured peripheral names in order.
    pub fn peripheral_names(&self) -> Vec<String> {
        self.peripherals.iter().map(|p| p.name.clone()).collect()
    }

    pub fn init_poll(&self) -> Duration {
        Duration::from_millis(self.init_poll_ms)
    }

    pub fn nos_sample(&self) -> Duration {
        Duration::from_millis(self.nos_sample_ms)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn boot_timeout(&self) -> Option<Duration> {
        self.boot_timeout_ms.map(Duration::from_millis)
    }
}

/// Where CONFIG gets its configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Re-read from disk on every CONFIG entry
    File(PathBuf),
    /// Fixed, already parsed
    Static(Config),
}

impl ConfigSource {
    /// Produces the configuration.
    pub fn load(&self) -> Result<Config> {
        match self {
            ConfigSource::File(path) => Config::load(path),
            ConfigSource::Static(config) => Ok(config.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        simulate = true
        buses = [1]
        boot_timeout_ms = 30000

        [[peripherals]]
        name = "light"
        type = "led_dac5578"

        [peripherals.parameters]
        update_interval_ms = 500

        [[peripherals]]
        name = "spare-light"
        type = "led_dac5578"
    "#;

    #[test]
    fn test_parse_with_defaults() {
        let config = Config::parse(SAMPLE).unwrap();
        assert!(config.simulate);
        assert_eq!(config.buses, vec![1]);
        assert_eq!(config.init_poll(), Duration::from_secs(2));
        assert_eq!(config.nos_sample(), Duration::from_secs(3));
        assert_eq!(config.pause(), Duration::from_millis(100));
        assert_eq!(config.boot_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.peripheral_names(), vec!["light", "spare-light"]);
        assert_eq!(config.peripherals[0].kind, "led_dac5578");
        assert!(config.peripherals[1]
            .parameters
            .as_table()
            .is_some_and(|t| t.is_empty()));
    }

    #[test]
    fn test_boot_timeout_defaults_to_unbounded() {
        let config = Config::parse("[[peripherals]]\nname = \"a\"\ntype = \"x\"\n").unwrap();
        assert_eq!(config.boot_timeout(), None);
        assert!(!config.simulate);
    }

    #[test]
    fn test_validate() {
        let registry = PeripheralRegistry::with_builtin();
        Config::parse(SAMPLE).unwrap().validate(&registry).unwrap();

        let unknown = Config::parse("[[peripherals]]\nname = \"a\"\ntype = \"sht25\"\n").unwrap();
        let err = unknown.validate(&registry).unwrap_err();
        assert!(err.to_string().contains("Unknown type `sht25`"));

        let duplicate = Config::parse(
            "[[peripherals]]\nname = \"a\"\ntype = \"led_dac5578\"\n\
             [[peripherals]]\nname = \"a\"\ntype = \"led_dac5578\"\n",
        )
        .unwrap();
        assert!(duplicate.validate(&registry).is_err());

        let empty = Config::parse("simulate = true\n").unwrap();
        assert!(empty.validate(&registry).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let source = ConfigSource::File(PathBuf::from("/nonexistent/habitat.toml"));
        assert!(source.load().is_err());
    }
}
