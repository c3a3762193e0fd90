//! Dependency-injected unit registry.
//!
//! Built per engine instance and passed into the orchestrator, so tests
//! construct isolated registries per case instead of sharing process-wide
//! state. A missing registration at dispatch time is a programmer error,
//! distinct from an operational `RunError`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::EngineError;
use crate::unit::Unit;

/// Label -> handler mapping. Must be fully populated before a run starts.
#[derive(Default)]
pub struct UnitRegistry {
    units: HashMap<String, Arc<dyn Unit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, label: impl Into<String>, unit: Arc<dyn Unit>) {
        self.units.insert(label.into(), unit);
    }

    /// Builder-style registration.
    pub fn with_unit(mut self, label: impl Into<String>, unit: Arc<dyn Unit>) -> Self {
        self.register(label, unit);
        self
    }

    /// Resolve a label or fail with a programmer error.
    pub fn get(&self, label: &str) -> Result<Arc<dyn Unit>, EngineError> {
        self.units
            .get(label)
            .cloned()
            .ok_or_else(|| EngineError::UnitNotRegistered {
                label: label.to_string(),
            })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.units.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
