//! TOML configuration.
//!
//! Every section is optional; missing keys fall back to the engine
//! defaults. Unknown top-level sections are rejected so typos surface.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use homewatch_core::{ConfirmerConfig, HealthPolicy, MotionConfig};
use homewatch_daemon::{MonitorConfig, PresenceConfig, ThrottleConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Presence evaluation interval.
    pub tick_ms: u64,
    /// Resolved alerts older than this are pruned from the ledger.
    pub alert_retention_ms: u64,
    /// Capacity of the arm/disarm/power-event queue to the motion task.
    pub control_queue: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            alert_retention_ms: 3_600_000,
            control_queue: 64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub presence: PresenceConfig,
    pub person: ConfirmerConfig,
    pub motion: MotionConfig,
    pub throttle: ThrottleConfig,
    pub health: HealthPolicy,
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// Load from `path`, or defaults when `None`. Always validated.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                Self::from_toml(&raw).with_context(|| format!("in {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("parsing config")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runtime.tick_ms == 0 {
            anyhow::bail!("invalid configuration: runtime.tick_ms must be greater than zero");
        }
        if self.runtime.control_queue == 0 {
            anyhow::bail!("invalid configuration: runtime.control_queue must be greater than zero");
        }
        self.monitor_config()
            .validate()
            .context("validating config")?;
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            presence: self.presence,
            person: self.person,
            motion: self.motion,
            throttle: self.throttle,
            health: self.health,
        }
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("rendering config")
    }
}
