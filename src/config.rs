//! Per-unit engine configuration and JSON loading.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::executor::RetryPolicy;

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

/// Execution budget and domain tuning for one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitConfig {
    /// Time budget per attempt, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Additional attempts after the first (so `retry_count = 2` means at
    /// most three attempts).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Base of the exponential backoff between attempts.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Domain-specific tuning, opaque to the engine.
    #[serde(default)]
    pub tuning: HashMap<String, Value>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            base_delay_ms: default_base_delay_ms(),
            tuning: HashMap::new(),
        }
    }
}

impl UnitConfig {
    /// The wrapper-facing view of this configuration.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            retry_count: self.retry_count,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

/// Engine-wide configuration: per-label overrides over a shared default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub defaults: UnitConfig,
    #[serde(default)]
    pub units: HashMap<String, UnitConfig>,
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config: {}", path.display()))?;

        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse engine config JSON: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize engine config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write engine config: {}", path.display()))?;

        Ok(())
    }

    /// Configuration for a unit, falling back to the shared default.
    pub fn for_unit(&self, label: &str) -> &UnitConfig {
        self.units.get(label).unwrap_or(&self.defaults)
    }

    pub fn set_unit(&mut self, label: impl Into<String>, config: UnitConfig) {
        self.units.insert(label.into(), config);
    }
}
