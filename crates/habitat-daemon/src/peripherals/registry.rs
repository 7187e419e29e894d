//! Peripheral type registry.
//!
//! Maps the `type` identifier from configuration to a constructor. Built at
//! startup and handed to the orchestrator by value; nothing is resolved from
//! strings at runtime beyond this lookup.

use anyhow::{anyhow, Result};
use std::collections::HashMap;

use super::{LedPeripheral, Peripheral, PeripheralContext};
use crate::config::PeripheralConfig;

/// Factory function type for creating peripheral instances.
pub type PeripheralFactory =
    fn(&PeripheralConfig, &PeripheralContext) -> Result<Box<dyn Peripheral>>;

/// Registry of available peripheral types.
pub struct PeripheralRegistry {
    factories: HashMap<&'static str, PeripheralFactory>,
}

impl PeripheralRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with every built-in peripheral type.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(LedPeripheral::TYPE, LedPeripheral::create);
        registry
    }

    /// Register a peripheral factory.
    ///
    /// # Panics
    /// Panics if a type with the same identifier is already registered.
    pub fn register(&mut self, kind: &'static str, factory: PeripheralFactory) {
        if self.factories.contains_key(kind) {
            panic!("Peripheral type '{kind}' is already registered");
        }
        self.factories.insert(kind, factory);
    }

    /// Returns true if the type identifier is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// List all registered type identifiers, sorted.
    pub fn list(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Create a peripheral from its configuration.
    pub fn create(
        &self,
        config: &PeripheralConfig,
        ctx: &PeripheralContext,
    ) -> Result<Box<dyn Peripheral>> {
        let factory = self
            .factories
            .get(config.kind.as_str())
            .ok_or_else(|| anyhow!("Unknown peripheral type `{}`", config.kind))?;
        factory(config, ctx)
    }
}

impl Default for PeripheralRegistry {
    fn default() -> Self {
        Self::new()
    }
}
